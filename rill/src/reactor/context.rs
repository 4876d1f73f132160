use std::cell::RefCell;
use std::ffi::CString;
use std::io::{self, SeekFrom};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::handler::Handler;

use super::core::{CallbackKind, Core};
use super::endpoint::{Endpoint, EndpointRef, State};
use super::future::ReadExact;
use super::poller::platform::{
    connect_in_progress, sys_bind, sys_close, sys_connect, sys_listen, sys_open, sys_seek,
    sys_set_reuseaddr, sys_sockname, sys_socket, APPEND_FLAGS, READ_FLAGS, READ_WRITE_FLAGS,
    WRITE_FLAGS,
};
use super::timer::{TimerHandle, TimerKind};

/// File access modes for [`Context::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only.
    Read,
    /// Write-only, created if missing, truncated otherwise.
    Write,
    /// Write-only, created if missing, writes go to the end.
    Append,
    /// Read and write, created if missing.
    ReadWrite,
}

impl FileMode {
    fn flags(self) -> i32 {
        match self {
            FileMode::Read => READ_FLAGS,
            FileMode::Write => WRITE_FLAGS,
            FileMode::Append => APPEND_FLAGS,
            FileMode::ReadWrite => READ_WRITE_FLAGS,
        }
    }
}

/// The reactor facade handed to every handler callback.
///
/// A `Context` is a cheap handle onto the reactor's shared state; cloning
/// it never clones the reactor. All operations must run on the reactor
/// thread, which is where callbacks already execute.
pub struct Context<H: Handler> {
    pub(crate) core: Rc<RefCell<Core<H>>>,
    pub(crate) handler: Rc<H>,
}

impl<H: Handler> Clone for Context<H> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<H: Handler> Context<H> {
    /// Initiates a non-blocking TCP connect.
    ///
    /// If the kernel completes the connect immediately, `client_init` runs
    /// synchronously before this returns. Otherwise the endpoint sits in
    /// the connecting state until writability resolves it; with a timeout,
    /// an internal one-shot timer disposes the endpoint and reports
    /// [`Error::ConnectTimeout`] through the `error` callback if the
    /// deadline passes first.
    ///
    /// Failures the kernel reports at call time are routed through
    /// `connect_error`, not the return value.
    pub fn connect(
        &self,
        addr: Ipv4Addr,
        port: u16,
        tag: H::Tag,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let fd = sys_socket()?;
        let target = SocketAddrV4::new(addr, port);

        match sys_connect(fd, &target) {
            Ok(()) => {
                debug!(%target, "outbound connect completed immediately");
                let (token, endpoint) =
                    self.register(Endpoint::new(fd, tag, State::Connected, false, true));
                let coroutine = self.handler.clone().client_init(self.io(&endpoint, false));
                self.resume(token, &endpoint, coroutine);
                Ok(())
            }
            Err(err) if connect_in_progress(&err) => {
                debug!(%target, "outbound connect pending");
                let (token, endpoint) =
                    self.register(Endpoint::new(fd, tag, State::Connecting, false, true));
                if let Some(limit) = timeout {
                    let handle = self.core.borrow_mut().timers.add(
                        limit,
                        TimerKind::Connect(token),
                        false,
                        false,
                    );
                    endpoint.borrow_mut().connect_timer = Some(handle);
                }
                Ok(())
            }
            Err(err) => {
                sys_close(fd);
                debug!(%target, %err, "outbound connect refused at call time");
                self.handler.connect_error(self, tag, Error::Io(err));
                Ok(())
            }
        }
    }

    /// Creates a listening TCP socket and registers it.
    ///
    /// The socket gets `SO_REUSEADDR` and the configured backlog. Returns
    /// the bound address, so listening on port 0 yields a usable port.
    pub fn listen(&self, addr: Ipv4Addr, port: u16, tag: H::Tag) -> Result<SocketAddr> {
        let fd = sys_socket()?;
        let backlog = self.core.borrow().backlog;

        let bound = SocketAddrV4::new(addr, port);
        let prepared = sys_set_reuseaddr(fd)
            .and_then(|_| sys_bind(fd, &bound))
            .and_then(|_| sys_listen(fd, backlog))
            .and_then(|_| sys_sockname(fd));

        let local = match prepared {
            Ok(local) => local,
            Err(err) => {
                sys_close(fd);
                return Err(err.into());
            }
        };

        self.register(Endpoint::new(fd, tag, State::Listening, false, true));
        debug!(%local, "listening");
        Ok(local)
    }

    /// Opens a local file as a seekable endpoint in the connected state.
    ///
    /// With `use_error_handler` false, read and write errors on this
    /// endpoint skip the `error` callback and surface at the loop boundary.
    pub fn open(
        &self,
        path: &Path,
        mode: FileMode,
        tag: H::Tag,
        use_error_handler: bool,
    ) -> Result<()> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = sys_open(c_path.as_ptr(), mode.flags(), 0o644);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let mut endpoint = Endpoint::new(fd, tag, State::Connected, true, use_error_handler);
        if mode == FileMode::Append {
            endpoint.cursor = match sys_seek(fd, SeekFrom::End(0)) {
                Ok(at) => at,
                Err(err) => {
                    sys_close(fd);
                    return Err(err.into());
                }
            };
        }

        self.register(endpoint);
        debug!(path = %path.display(), "opened file endpoint");
        Ok(())
    }

    /// Schedules a timer and returns its cancellation handle.
    ///
    /// An immediate timer expires at once and fires on the next loop pass.
    pub fn schedule_timer(
        &self,
        duration: Duration,
        tag: Option<H::Tag>,
        recurring: bool,
        immediate: bool,
    ) -> TimerHandle {
        self.core
            .borrow_mut()
            .timers
            .add(duration, TimerKind::User(tag), recurring, immediate)
    }

    /// Marks a timer cancelled. Equivalent to [`TimerHandle::cancel`].
    pub fn cancel_timer(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Queues an event for the handler's `user_event` callback on the next
    /// loop pass. Events are delivered in FIFO order.
    pub fn add_user_event(&self, event: H::Event) {
        self.core.borrow_mut().user_events.push_back(event);
    }

    /// Requests shutdown.
    ///
    /// New reads stop immediately; the loop keeps flushing buffered output
    /// and exits once every output buffer is empty, then closes all
    /// remaining endpoints.
    pub fn stop(&self) {
        let waker = {
            let mut core = self.core.borrow_mut();
            core.stopped = true;
            core.poller.waker()
        };
        waker.wake();
    }

    /// The endpoint whose callback is currently executing, if any.
    pub fn current_io(&self) -> Option<Io<H>> {
        let (endpoint, write_only) = {
            let core = self.core.borrow();
            let token = core.current?;
            let endpoint = core.endpoints.get(token)?.clone();
            (endpoint, core.active == CallbackKind::Timer)
        };

        Some(self.io(&endpoint, write_only))
    }

    /// Finds a registered endpoint by its tag.
    ///
    /// During a timer callback the returned facade is write-only; reading
    /// through it fails with [`Error::ReadFromTimer`]. This keeps a timer
    /// from resuming a suspended read mid-message and swallowing the data
    /// the timer logic was scheduled to act on.
    pub fn find_io_by_tag(&self, tag: &H::Tag) -> Option<Io<H>> {
        let (endpoint, write_only) = {
            let core = self.core.borrow();
            let endpoint = core
                .endpoints
                .iter()
                .map(|(_, endpoint)| endpoint)
                .find(|endpoint| endpoint.borrow().tag == *tag)?
                .clone();
            (endpoint, core.active == CallbackKind::Timer)
        };

        Some(self.io(&endpoint, write_only))
    }

    /// Disposes the endpoint whose callback is currently executing.
    pub fn close(&self) {
        let token = self.core.borrow().current;
        if let Some(token) = token {
            self.dispose(token);
        }
    }

    pub(crate) fn io(&self, endpoint: &EndpointRef<H>, write_only: bool) -> Io<H> {
        Io {
            cx: self.clone(),
            endpoint: endpoint.clone(),
            write_only,
        }
    }

    /// Inserts a record into the registry and the poller.
    pub(crate) fn register(&self, endpoint: Endpoint<H>) -> (usize, EndpointRef<H>) {
        let mut core = self.core.borrow_mut();
        let fd = endpoint.fd;
        let shared = Rc::new(RefCell::new(endpoint));

        let token = core.endpoints.insert(shared.clone());
        shared.borrow_mut().token = token;

        let interest = core.interest_of(&shared.borrow());
        core.poller.register(fd, token, interest);

        (token, shared)
    }
}

/// The per-endpoint facade handed to handler code.
///
/// Reads look synchronous: `io.read(n).await` resolves with exactly `n`
/// bytes, suspending the enclosing coroutine whenever the handle has no
/// more to give. Writes never block and never suspend; they queue into the
/// endpoint's output buffer, which the reactor drains on writability.
pub struct Io<H: Handler> {
    cx: Context<H>,
    endpoint: EndpointRef<H>,
    write_only: bool,
}

impl<H: Handler> Clone for Io<H> {
    fn clone(&self) -> Self {
        Self {
            cx: self.cx.clone(),
            endpoint: self.endpoint.clone(),
            write_only: self.write_only,
        }
    }
}

impl<H: Handler> Io<H> {
    /// Returns a future resolving with exactly `n` bytes.
    ///
    /// Only meaningful inside a coroutine callback. On a facade obtained
    /// during a timer callback the future fails with
    /// [`Error::ReadFromTimer`].
    pub fn read(&self, n: usize) -> ReadExact<H> {
        ReadExact::new(self.endpoint.clone(), n, self.write_only)
    }

    /// Queues bytes for writing behind this endpoint's write head.
    pub fn write(&self, bytes: &[u8]) {
        self.endpoint.borrow_mut().queue_write(bytes);
    }

    /// Repositions the write head of a seekable endpoint and returns the
    /// new offset. On a non-seekable endpoint this is a no-op reporting
    /// the current logical position.
    pub fn seek(&self, position: SeekFrom) -> Result<u64> {
        let mut endpoint = self.endpoint.borrow_mut();
        if !endpoint.seekable {
            return Ok(endpoint.cursor);
        }

        let at = sys_seek(endpoint.fd, position)?;
        endpoint.cursor = at;
        Ok(at)
    }

    /// The endpoint's metadata tag.
    pub fn tag(&self) -> H::Tag {
        self.endpoint.borrow().tag.clone()
    }

    /// Replaces the endpoint's metadata tag. Accepted connections inherit
    /// their listener's tag, so `server_init` typically re-tags here.
    pub fn set_tag(&self, tag: H::Tag) {
        self.endpoint.borrow_mut().tag = tag;
    }

    /// Disposes this endpoint: best-effort flush, close, deregister.
    pub fn close(&self) {
        let token = self.endpoint.borrow().token;
        self.cx.dispose(token);
    }

    /// The reactor facade, for scheduling and lookups from inside a
    /// coroutine.
    pub fn context(&self) -> &Context<H> {
        &self.cx
    }
}
