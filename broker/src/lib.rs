pub mod cli;
pub mod error;
pub mod fetch;
mod metrics;
pub mod server;
pub mod shard;
pub mod storage;

pub use crate::cli::Cli;
pub use crate::server::Broker;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
