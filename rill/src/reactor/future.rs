use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::{io, mem};

use crate::error::{Error, Result};
use crate::handler::Handler;

use super::endpoint::{EndpointRef, State};
use super::poller::platform::sys_read;

/// Resolves with exactly the requested number of bytes.
///
/// The future reads directly from the endpoint's handle, accumulating into
/// an owned buffer. When the handle reports would-block the future yields;
/// the reactor resumes the owning coroutine on the next readiness event and
/// the read picks up where it left off. It never resolves short: the
/// outcome is the full byte count or an error.
///
/// End-of-stream and hard errors poison the endpoint, marking its state as
/// errored so the reactor disposes it once the coroutine winds down.
pub struct ReadExact<H: Handler> {
    endpoint: EndpointRef<H>,
    wanted: usize,
    collected: Vec<u8>,
    denied: bool,
}

impl<H: Handler> ReadExact<H> {
    pub(crate) fn new(endpoint: EndpointRef<H>, wanted: usize, denied: bool) -> Self {
        Self {
            endpoint,
            wanted,
            collected: Vec::with_capacity(wanted),
            denied,
        }
    }
}

impl<H: Handler> Future for ReadExact<H> {
    type Output = Result<Vec<u8>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.denied {
            return Poll::Ready(Err(Error::ReadFromTimer));
        }

        let mut endpoint = this.endpoint.borrow_mut();

        while this.collected.len() < this.wanted {
            let mut chunk = [0u8; 4096];
            let want = (this.wanted - this.collected.len()).min(chunk.len());

            let n = sys_read(endpoint.fd, &mut chunk[..want]);

            if n > 0 {
                this.collected.extend_from_slice(&chunk[..n as usize]);
                continue;
            }

            if n == 0 {
                endpoint.state = State::Error;
                endpoint.last_read_error = Some(Error::Closed);
                return Poll::Ready(Err(Error::Closed));
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => {
                    return Poll::Pending;
                }
                io::ErrorKind::Interrupted => continue,
                _ => {
                    endpoint.state = State::Error;
                    endpoint.last_read_error = Some(Error::Io(copy_os_error(&err)));
                    return Poll::Ready(Err(Error::Io(err)));
                }
            }
        }

        Poll::Ready(Ok(mem::take(&mut this.collected)))
    }
}

/// Duplicates an OS error so one copy can ride on the endpoint record while
/// the other resolves the future.
fn copy_os_error(err: &io::Error) -> io::Error {
    match err.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => err.kind().into(),
    }
}
