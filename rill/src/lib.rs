//! Single-threaded event reactor with suspendable reads.
//!
//! This crate multiplexes many byte-stream endpoints (outbound TCP
//! connections, a TCP listener, local files) behind a callback surface.
//! Handler code reads as if synchronously: the per-endpoint read future
//! suspends when bytes are not yet available and is resumed by the reactor
//! when readiness returns from `poll(2)`.
//!
//! # Architecture
//!
//! - **Reactor**: owns the readiness loop, the endpoint registry, the timer
//!   queue and the user-event queue; runs until [`Context::stop`]
//! - **Context**: the reactor facade handed to every callback (connect,
//!   listen, open, timers, user events, lookups, stop)
//! - **Io**: the per-endpoint facade (exact reads, buffered writes, seek)
//! - **Handler**: the callback contract the surrounding system implements
//! - **RateEstimator**: windowed units-per-second over timestamped samples
//!
//! The reactor is strictly single-threaded: callbacks, coroutine bodies and
//! the readiness loop interleave on the one calling thread, and at most one
//! callback executes at any instant.

mod error;
mod handler;
mod rate;
mod reactor;

pub use error::{Error, Result};
pub use handler::{done, Coroutine, Handler};
pub use rate::RateEstimator;
pub use reactor::{Context, FileMode, Io, ReadExact, Reactor, ReactorBuilder, TimerHandle};
