pub mod config;
pub mod error;
pub mod redis_pool;
pub mod storage;
pub mod types;
