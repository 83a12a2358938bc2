pub mod cli;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod watch;
