//! RESP2 wire protocol: values, request frames, framed reading and reply sinks.

pub mod command;
pub mod framed;
pub mod resp;
pub mod sink;

pub use command::Command;
pub use framed::{FrameSource, FramedReader, Incoming};
pub use resp::*;
pub use sink::ReplySink;
