//! The reactor's readiness loop.
//!
//! Responsibilities:
//! - Rebuild every endpoint's readiness interests at the top of each pass
//! - Fire due timers and derive the poll timeout from the earliest survivor
//! - Deliver queued user events in FIFO order
//! - Block on the poller, then dispatch reads before writes
//! - Drive each endpoint's coroutine, one resumption per readiness event
//! - Drain buffered output after `stop` and dispose everything on exit
//!
//! The loop is strictly single-threaded. Handler callbacks run inline on
//! the loop thread; a callback failure is logged at the loop boundary and
//! the loop continues. Only a poller failure ends [`Reactor::start`] with
//! an error.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::ops::Deref;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::task::noop_waker_ref;
use slab::Slab;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::handler::{Coroutine, Handler};

use super::context::Context;
use super::endpoint::{Endpoint, EndpointRef, State};
use super::event::Event;
use super::poller::common::Interest;
use super::poller::platform::{sys_accept, sys_get_socket_error, sys_peername};
use super::poller::Poller;
use super::timer::{TimerEntry, TimerKind, TimerQueue};

/// Default accept backlog for listening sockets.
const DEFAULT_BACKLOG: i32 = 10;

/// The kind of handler callback currently executing, if any.
///
/// Timer callbacks are special-cased: lookups performed while one runs
/// hand out write-only facades.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackKind {
    None,
    Io,
    Timer,
}

/// Shared mutable state behind every [`Context`] clone.
pub(crate) struct Core<H: Handler> {
    pub(crate) poller: Poller,
    pub(crate) events: Vec<Event>,
    pub(crate) endpoints: Slab<EndpointRef<H>>,
    pub(crate) timers: TimerQueue<H>,
    pub(crate) user_events: VecDeque<H::Event>,
    pub(crate) stopped: bool,

    /// Token of the endpoint whose callback is executing. Non-`None` only
    /// while a callback is on the stack.
    pub(crate) current: Option<usize>,
    pub(crate) active: CallbackKind,

    pub(crate) backlog: i32,
}

impl<H: Handler> Core<H> {
    fn new(backlog: i32) -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Vec::with_capacity(64),
            endpoints: Slab::new(),
            timers: TimerQueue::new(),
            user_events: VecDeque::new(),
            stopped: false,
            current: None,
            active: CallbackKind::None,
            backlog,
        })
    }

    /// Readiness interests for one endpoint, derived from its state.
    ///
    /// Reads are wanted unless a connect is pending or the reactor is
    /// draining for shutdown; writes are wanted while output is buffered
    /// or a connect awaits its writability signal. Listeners never join
    /// the write set.
    pub(crate) fn interest_of(&self, endpoint: &Endpoint<H>) -> Interest {
        Interest {
            read: !self.stopped && endpoint.state != State::Connecting,
            write: (!endpoint.buffer.is_empty() || endpoint.state == State::Connecting)
                && endpoint.state != State::Listening,
        }
    }

    /// Refreshes every registration; true when anything wants writability.
    fn rebuild_interests(&mut self) -> bool {
        let mut any_write = false;

        let mut fresh: Vec<(i32, usize, Interest)> = Vec::with_capacity(self.endpoints.len());
        for (token, endpoint) in self.endpoints.iter() {
            let endpoint = endpoint.borrow();
            let interest = self.interest_of(&endpoint);

            any_write |= interest.write;
            fresh.push((endpoint.fd, token, interest));
        }

        for (fd, token, interest) in fresh {
            self.poller.reregister(fd, token, interest);
        }

        any_write
    }

    /// Timeout for the next poll: zero while user events wait, otherwise
    /// the time until the earliest live timer, otherwise unbounded.
    fn poll_timeout(&mut self) -> Option<Duration> {
        if !self.user_events.is_empty() {
            return Some(Duration::ZERO);
        }

        self.timers
            .next_expiry()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let Core { poller, events, .. } = self;
        poller.poll(events, timeout)
    }
}

/// Configuration for a [`Reactor`].
pub struct ReactorBuilder {
    backlog: i32,
}

impl ReactorBuilder {
    pub fn new() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
        }
    }

    /// Sets the accept backlog used by [`Context::listen`].
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn backlog(mut self, n: u32) -> Self {
        assert!(n > 0, "backlog must be > 0");

        self.backlog = n as i32;
        self
    }

    /// Builds the reactor around the given handler.
    pub fn build<H: Handler>(self, handler: H) -> Result<Reactor<H>> {
        let core = Core::new(self.backlog)?;

        Ok(Reactor {
            cx: Context {
                core: Rc::new(RefCell::new(core)),
                handler: Rc::new(handler),
            },
        })
    }
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-threaded event reactor.
///
/// Endpoints are registered through the [`Context`] operations (available
/// directly on the reactor as well), then [`start`](Self::start) runs the
/// readiness loop until [`Context::stop`] and the final output drain.
pub struct Reactor<H: Handler> {
    cx: Context<H>,
}

impl<H: Handler> Reactor<H> {
    /// Creates a reactor with default configuration.
    pub fn new(handler: H) -> Result<Self> {
        ReactorBuilder::new().build(handler)
    }

    pub fn builder() -> ReactorBuilder {
        ReactorBuilder::new()
    }

    /// A clonable handle onto the reactor facade.
    pub fn context(&self) -> Context<H> {
        self.cx.clone()
    }

    /// The handler driving this reactor.
    pub fn handler(&self) -> &H {
        &self.cx.handler
    }

    /// Runs the readiness loop until stopped and drained.
    ///
    /// Handler callback failures are logged and the loop continues; only a
    /// failure of the readiness primitive itself is returned.
    pub fn start(&self) -> Result<()> {
        let cx = &self.cx;
        debug!("reactor loop starting");

        loop {
            let drained = {
                let mut core = cx.core.borrow_mut();
                let any_write = core.rebuild_interests();
                core.stopped && !any_write
            };
            if drained {
                break;
            }

            cx.fire_due_timers();
            cx.deliver_user_events();

            let timeout = cx.core.borrow_mut().poll_timeout();
            cx.core.borrow_mut().poll(timeout)?;

            // Timers that came due while the poller was blocked fire
            // before any readiness dispatch.
            cx.fire_due_timers();

            let events: Vec<Event> = {
                let mut core = cx.core.borrow_mut();
                core.events.drain(..).collect()
            };

            for event in events.iter().filter(|event| event.readable) {
                cx.dispatch_read(event.token);
            }
            for event in events.iter().filter(|event| event.writable) {
                cx.dispatch_write(event.token);
            }
        }

        cx.dispose_all();
        debug!("reactor loop stopped");
        Ok(())
    }
}

impl<H: Handler> Deref for Reactor<H> {
    type Target = Context<H>;

    fn deref(&self) -> &Context<H> {
        &self.cx
    }
}

/// Loop internals. Everything here runs on the reactor thread with no core
/// borrow held across a handler callback.
impl<H: Handler> Context<H> {
    fn endpoint(&self, token: usize) -> Option<EndpointRef<H>> {
        self.core.borrow().endpoints.get(token).cloned()
    }

    fn still_registered(&self, token: usize, endpoint: &EndpointRef<H>) -> bool {
        self.core
            .borrow()
            .endpoints
            .get(token)
            .map_or(false, |found| Rc::ptr_eq(found, endpoint))
    }

    /// Fires every timer whose expiry has passed.
    pub(crate) fn fire_due_timers(&self) {
        loop {
            let due = self.core.borrow_mut().timers.next_due(Instant::now());
            let Some(entry) = due else { break };
            self.process_timer(entry);
        }
    }

    fn process_timer(&self, entry: TimerEntry<H>) {
        match entry.kind {
            TimerKind::Connect(token) => {
                let Some(endpoint) = self.endpoint(token) else {
                    return;
                };
                if endpoint.borrow().state != State::Connecting {
                    return;
                }

                let tag = endpoint.borrow().tag.clone();
                warn!(token, "outbound connect timed out");
                self.handler.error(self, tag, Error::ConnectTimeout);
                self.dispose(token);
            }
            TimerKind::User(tag) => {
                let previous = {
                    let mut core = self.core.borrow_mut();
                    let previous = core.active;
                    core.active = CallbackKind::Timer;
                    previous
                };

                let outcome = self.handler.timer_expired(self, tag);
                self.core.borrow_mut().active = previous;

                if let Err(err) = outcome {
                    warn!(%err, "timer callback failed");
                }
            }
        }
    }

    /// Delivers queued user events in FIFO order.
    pub(crate) fn deliver_user_events(&self) {
        loop {
            let next = self.core.borrow_mut().user_events.pop_front();
            let Some(event) = next else { break };

            if let Err(err) = self.handler.user_event(self, event) {
                warn!(%err, "user event callback failed");
            }
        }
    }

    pub(crate) fn dispatch_read(&self, token: usize) {
        let Some(endpoint) = self.endpoint(token) else {
            return;
        };

        let state = endpoint.borrow().state;
        match state {
            State::Listening => self.accept_ready(&endpoint),
            State::Connecting => {}
            State::Connected | State::Error => {
                let suspended = endpoint.borrow_mut().coroutine.take();
                let coroutine = suspended.unwrap_or_else(|| {
                    self.handler.clone().recv_data(self.io(&endpoint, false))
                });
                self.resume(token, &endpoint, coroutine);
            }
        }
    }

    pub(crate) fn dispatch_write(&self, token: usize) {
        let Some(endpoint) = self.endpoint(token) else {
            return;
        };

        let state = endpoint.borrow().state;
        match state {
            State::Connecting => self.finalize_connect(token, &endpoint),
            State::Listening => {}
            State::Connected | State::Error => self.flush_endpoint(token, &endpoint),
        }
    }

    fn accept_ready(&self, listener: &EndpointRef<H>) {
        let (listener_fd, listener_tag) = {
            let listener = listener.borrow();
            (listener.fd, listener.tag.clone())
        };

        match sys_accept(listener_fd) {
            Ok((fd, peer)) => {
                debug!(%peer, "accepted inbound connection");
                let (token, endpoint) =
                    self.register(Endpoint::new(fd, listener_tag, State::Connected, false, true));
                let coroutine = self
                    .handler
                    .clone()
                    .server_init(self.io(&endpoint, false), peer);
                self.resume(token, &endpoint, coroutine);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => warn!(%err, "accept failed"),
        }
    }

    /// A writable connecting endpoint either became established or carries
    /// a pending socket error.
    fn finalize_connect(&self, token: usize, endpoint: &EndpointRef<H>) {
        let fd = endpoint.borrow().fd;

        match sys_peername(fd) {
            Ok(peer) => {
                debug!(%peer, "outbound connect established");
                {
                    let mut endpoint = endpoint.borrow_mut();
                    endpoint.state = State::Connected;
                    if let Some(timer) = endpoint.connect_timer.take() {
                        timer.cancel();
                    }
                }

                let coroutine = self.handler.clone().client_init(self.io(endpoint, false));
                self.resume(token, endpoint, coroutine);
            }
            Err(_) => {
                let err = match sys_get_socket_error(fd) {
                    Err(err) => err,
                    Ok(()) => io::Error::other("connect failed"),
                };
                let tag = endpoint.borrow().tag.clone();

                debug!(%err, "outbound connect failed");
                self.handler.connect_error(self, tag, Error::Io(err));
                self.dispose(token);
            }
        }
    }

    fn flush_endpoint(&self, token: usize, endpoint: &EndpointRef<H>) {
        let outcome = {
            let mut endpoint = endpoint.borrow_mut();
            if endpoint.buffer.is_empty() {
                return;
            }
            let fd = endpoint.fd;
            endpoint.buffer.flush(fd)
        };

        if let Err(err) = outcome {
            let (tag, use_error_handler) = {
                let endpoint = endpoint.borrow();
                (endpoint.tag.clone(), endpoint.use_error_handler)
            };

            if use_error_handler {
                self.handler.error(self, tag, Error::Io(err));
            } else {
                error!(%err, "write failed");
            }
            self.dispose(token);
        }
    }

    /// Polls a coroutine once on behalf of its endpoint.
    ///
    /// The endpoint is marked current for the duration so facade lookups
    /// resolve; a pending coroutine is parked back on the record, and a
    /// finished one is routed through the error surface when the endpoint
    /// was poisoned by its read.
    pub(crate) fn resume(&self, token: usize, endpoint: &EndpointRef<H>, mut coroutine: Coroutine) {
        let previous = {
            let mut core = self.core.borrow_mut();
            let previous = (core.current, core.active);
            core.current = Some(token);
            core.active = CallbackKind::Io;
            previous
        };

        let mut task_cx = TaskContext::from_waker(noop_waker_ref());
        let polled = coroutine.as_mut().poll(&mut task_cx);

        {
            let mut core = self.core.borrow_mut();
            (core.current, core.active) = previous;
        }

        match polled {
            Poll::Pending => {
                // The callback may have closed its own endpoint, or the
                // slot may have been reused; park only on the same record.
                if self.still_registered(token, endpoint) {
                    endpoint.borrow_mut().coroutine = Some(coroutine);
                }
            }
            Poll::Ready(outcome) => self.coroutine_finished(token, endpoint, outcome),
        }
    }

    fn coroutine_finished(&self, token: usize, endpoint: &EndpointRef<H>, outcome: Result<()>) {
        if !self.still_registered(token, endpoint) {
            if let Err(err) = outcome {
                warn!(%err, "callback failed on a closed endpoint");
            }
            return;
        }

        let poisoned = endpoint.borrow().state == State::Error;
        if poisoned {
            let (tag, use_error_handler) = {
                let endpoint = endpoint.borrow();
                (endpoint.tag.clone(), endpoint.use_error_handler)
            };
            let err = match outcome {
                Err(err) => err,
                Ok(()) => endpoint
                    .borrow_mut()
                    .last_read_error
                    .take()
                    .unwrap_or(Error::Closed),
            };

            if use_error_handler {
                self.handler.error(self, tag, err);
            } else {
                error!(%err, "read failed");
            }
            self.dispose(token);
        } else if let Err(err) = outcome {
            warn!(%err, "handler callback failed");
        }
    }

    /// Removes an endpoint: best-effort flush, guaranteed close,
    /// deregistration, connect-timer cancellation, coroutine drop.
    pub(crate) fn dispose(&self, token: usize) {
        let removed = self.core.borrow_mut().endpoints.try_remove(token);
        let Some(endpoint) = removed else { return };

        let mut endpoint = endpoint.borrow_mut();
        let fd = endpoint.fd;
        if fd >= 0 {
            let _ = endpoint.buffer.flush(fd);
            self.core.borrow_mut().poller.deregister(fd);
            endpoint.close_fd();
        }

        if let Some(timer) = endpoint.connect_timer.take() {
            timer.cancel();
        }
        endpoint.coroutine = None;

        debug!(token, "endpoint disposed");
    }

    /// Disposes every remaining endpoint. Run once the loop exits.
    pub(crate) fn dispose_all(&self) {
        let tokens: Vec<usize> = {
            let core = self.core.borrow();
            core.endpoints.iter().map(|(token, _)| token).collect()
        };

        for token in tokens {
            self.dispose(token);
        }
    }
}
