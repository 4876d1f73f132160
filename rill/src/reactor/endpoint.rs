use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::Error;
use crate::handler::{Coroutine, Handler};

use super::buffer::OutputBuffer;
use super::poller::platform::sys_close;
use super::timer::TimerHandle;

/// Lifecycle states of a registered endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    /// An outbound connect is in flight.
    Connecting,

    /// The endpoint is established and participates in read dispatch.
    Connected,

    /// A listening socket; readability means a connection to accept.
    Listening,

    /// A hard read error was observed; the endpoint is about to be
    /// disposed.
    Error,
}

/// Per-endpoint record: one per live I/O handle.
///
/// Records are shared between the reactor registry and any suspended
/// coroutine through `Rc<RefCell<..>>`; everything runs on the one reactor
/// thread, so borrows are short and never overlap a suspension.
pub(crate) struct Endpoint<H: Handler> {
    /// The raw handle. Set to `-1` once closed.
    pub(crate) fd: RawFd,

    /// Registry slot, assigned at registration.
    pub(crate) token: usize,

    /// Caller-supplied metadata for handler-side identification.
    pub(crate) tag: H::Tag,

    pub(crate) state: State,

    /// Whether the handle supports seeking; controls the buffer variant
    /// and the facade's seek behavior.
    pub(crate) seekable: bool,

    /// Logical write head of a seekable endpoint.
    pub(crate) cursor: u64,

    pub(crate) buffer: OutputBuffer,

    /// The suspended read coroutine, at most one alive per endpoint.
    pub(crate) coroutine: Option<Coroutine>,

    /// Hard read error recorded by the read future before it resolved.
    pub(crate) last_read_error: Option<Error>,

    /// One-shot timer bounding a pending connect, if any.
    pub(crate) connect_timer: Option<TimerHandle>,

    /// When false, read and write errors bypass the handler's `error`
    /// callback and surface at the loop boundary instead.
    pub(crate) use_error_handler: bool,
}

pub(crate) type EndpointRef<H> = Rc<RefCell<Endpoint<H>>>;

impl<H: Handler> Endpoint<H> {
    pub(crate) fn new(
        fd: RawFd,
        tag: H::Tag,
        state: State,
        seekable: bool,
        use_error_handler: bool,
    ) -> Self {
        Self {
            fd,
            token: usize::MAX,
            tag,
            state,
            seekable,
            cursor: 0,
            buffer: if seekable {
                OutputBuffer::seekable()
            } else {
                OutputBuffer::stream()
            },
            coroutine: None,
            last_read_error: None,
            connect_timer: None,
            use_error_handler,
        }
    }

    /// Queues bytes behind the write head.
    pub(crate) fn queue_write(&mut self, bytes: &[u8]) {
        if self.seekable {
            let at = self.cursor;
            self.buffer.append_at(at, bytes);
            self.cursor += bytes.len() as u64;
        } else {
            self.buffer.append(bytes);
        }
    }

    /// Closes the handle exactly once, discarding any close error.
    pub(crate) fn close_fd(&mut self) {
        if self.fd >= 0 {
            sys_close(self.fd);
            self.fd = -1;
        }
    }
}

impl<H: Handler> Drop for Endpoint<H> {
    fn drop(&mut self) {
        self.close_fd();
    }
}
