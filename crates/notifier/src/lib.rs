//! Delivery transports for release notifications.
//!
//! Discord is the only platform today: payloads are sent as a single embed in the
//! recipient's direct-message channel. Platform errors are classified so the
//! orchestrator can tell a recipient that can never be reached from a hiccup.

pub mod discord;

pub use discord::{DiscordConfig, DiscordTransport};
