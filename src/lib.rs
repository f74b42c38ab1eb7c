pub mod blocking;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, CommandError};
pub use protocol::{Command, RespParser, RespValue};
pub use server::{Handler, Server, ServerContext};
pub use storage::{Store, StoreError};
