pub mod changelog;
pub mod orchestrator;
pub mod payload;
pub mod preferences;
pub mod releases;
pub mod version;
