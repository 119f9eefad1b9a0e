//! Foundational types shared by every other crate in the runtime: the
//! reactor handle, configuration, typed errors, the msgid allocator, and
//! the stream framing codec.

pub mod config;
pub mod error;
pub mod framing;
pub mod msgid;
mod reactor;

pub use config::{Address, CommType, Config, ConfigBuilder, PerformanceMode, TransportKind};
pub use error::{Error, ErrorKind, Result};
pub use msgid::MsgIdAllocator;
pub use reactor::{Reactor, ReactorHandle};
