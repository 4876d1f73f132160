pub(crate) mod common;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(unix)]
mod poll;

#[cfg(unix)]
pub(crate) type Poller = poll::PollPoller;
