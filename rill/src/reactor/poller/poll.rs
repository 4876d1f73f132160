//! `poll(2)`-based readiness backend.
//!
//! This is the one readiness primitive that accepts every endpoint kind the
//! reactor drives: sockets, pipes and regular files (which kernel-queue
//! interfaces reject and which `poll` reports as permanently ready).
//!
//! Responsibilities:
//! - Track registered file descriptors with read/write interests
//! - Block waiting for readiness, bounded by the timer-derived timeout
//! - Keep the wakeup pipe's read end permanently in the read set
//! - Translate revents into reactor events, gated by requested interest
//!
//! The descriptor array handed to `poll` is rebuilt from the registry on
//! every call, so interest changes take effect on the next pass without a
//! kernel round trip.

use super::common::{Interest, Waker};
use super::platform::{sys_close, sys_pipe, sys_read};
use crate::reactor::event::Event;

use libc::{nfds_t, pollfd, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Poller over `poll(2)` with a self-pipe wakeup.
pub(crate) struct PollPoller {
    /// Registered descriptors: `fd → (token, interest)`.
    registry: HashMap<RawFd, (usize, Interest)>,

    /// Wakeup pipe, read end. Always polled for readability.
    wake_recv: RawFd,

    /// Wakeup pipe, write end.
    wake_send: RawFd,

    /// Waker wrapping the pipe's write end.
    waker: Rc<Waker>,
}

impl PollPoller {
    /// Creates the poller and its wakeup pipe.
    ///
    /// Both pipe ends are non-blocking so a wake never stalls the caller
    /// and draining never stalls the poll loop.
    pub(crate) fn new() -> io::Result<Self> {
        let (wake_recv, wake_send) = sys_pipe()?;

        Ok(Self {
            registry: HashMap::new(),
            wake_recv,
            wake_send,
            waker: Rc::new(Waker(wake_send)),
        })
    }

    /// Returns the poller waker.
    pub(crate) fn waker(&self) -> Rc<Waker> {
        self.waker.clone()
    }

    /// Registers a file descriptor with the poller.
    pub(crate) fn register(&mut self, fd: RawFd, token: usize, interest: Interest) {
        self.registry.insert(fd, (token, interest));
    }

    /// Updates interest flags for a registered descriptor.
    pub(crate) fn reregister(&mut self, fd: RawFd, token: usize, interest: Interest) {
        self.registry.insert(fd, (token, interest));
    }

    /// Removes a file descriptor from the poller.
    pub(crate) fn deregister(&mut self, fd: RawFd) {
        self.registry.remove(&fd);
    }

    /// Polls for readiness events.
    ///
    /// Blocks until at least one registered descriptor is ready, the wakeup
    /// pipe is written, or the optional timeout expires. An interrupted
    /// call returns an empty batch so the loop can recompute its timers
    /// and retry.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Event>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        events.clear();

        let mut fds: Vec<pollfd> = Vec::with_capacity(self.registry.len() + 1);

        fds.push(pollfd {
            fd: self.wake_recv,
            events: POLLIN,
            revents: 0,
        });

        for (&fd, &(_, interest)) in self.registry.iter() {
            // Descriptors with no interest stay out of the array entirely;
            // poll would still report POLLERR/POLLHUP for them.
            if interest.is_empty() {
                continue;
            }

            let mut requested = 0;
            if interest.read {
                requested |= POLLIN;
            }
            if interest.write {
                requested |= POLLOUT;
            }

            fds.push(pollfd {
                fd,
                events: requested,
                revents: 0,
            });
        }

        let timeout_ms = match timeout {
            None => -1,
            Some(t) => {
                // Round up so a timer is never polled at below-millisecond
                // granularity into a busy loop.
                let ms = t.as_millis();
                let ms = if t > Duration::from_millis(ms as u64) {
                    ms + 1
                } else {
                    ms
                };
                ms.min(i32::MAX as u128) as i32
            }
        };

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        // Drain the wakeup pipe so it cannot keep the level-triggered
        // poll spinning.
        if fds[0].revents & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0 {
            let mut sink = [0u8; 64];
            while sys_read(self.wake_recv, &mut sink) > 0 {}
        }

        for pfd in fds.iter().skip(1) {
            let revents = pfd.revents;
            if revents == 0 {
                continue;
            }

            if let Some(&(token, interest)) = self.registry.get(&pfd.fd) {
                let readable =
                    interest.read && revents & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0;
                let writable =
                    interest.write && revents & (POLLOUT | POLLERR | POLLHUP | POLLNVAL) != 0;

                if readable || writable {
                    events.push(Event {
                        token,
                        readable,
                        writable,
                    });
                }
            }
        }

        Ok(())
    }
}

impl Drop for PollPoller {
    fn drop(&mut self) {
        sys_close(self.wake_recv);
        sys_close(self.wake_send);
    }
}
