pub mod confidence;
pub mod config;
pub mod error;
pub mod failover_set;
pub mod logging;
pub mod message;
pub mod primary_file;
pub mod redis_probe;
pub mod state;
pub mod token;
pub mod watch;
