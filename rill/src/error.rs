use std::io;

use thiserror::Error;

/// Errors surfaced by the reactor and its facades.
///
/// Retryable conditions (would-block, interrupted) never appear here; they
/// are absorbed by suspending the read or by leaving buffered output for the
/// next writability event.
#[derive(Debug, Error)]
pub enum Error {
    /// An outbound connect did not complete before its deadline.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// The peer closed the stream while more bytes were expected.
    #[error("connection closed by peer")]
    Closed,

    /// A read was attempted through a facade obtained during a timer
    /// callback. Timer callbacks may write but never read.
    #[error("cannot read from a timer callback")]
    ReadFromTimer,

    /// An operating system error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
