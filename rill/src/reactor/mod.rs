mod buffer;
mod context;
mod core;
mod endpoint;
mod event;
mod future;
mod poller;
mod timer;

pub use context::{Context, FileMode, Io};
pub use core::{Reactor, ReactorBuilder};
pub use future::ReadExact;
pub use timer::TimerHandle;
