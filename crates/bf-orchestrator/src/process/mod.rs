//! Child processes and their output

mod handle;
mod multiplexer;

pub use handle::{ChildProcessHandle, ProcessSpec, Termination};
pub use multiplexer::{LogLine, LogSink, OutputMultiplexer};
