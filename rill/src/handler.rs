use std::future::ready;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::error::{Error, Result};
use crate::reactor::{Context, Io};

/// A suspendable callback body owned by one endpoint.
///
/// The reactor polls a coroutine once per readiness event for its endpoint.
/// Suspension happens only inside [`Io::read`]; everything else in the body
/// runs to completion on the reactor thread.
pub type Coroutine = LocalBoxFuture<'static, Result<()>>;

/// Returns a coroutine that completes immediately.
pub fn done() -> Coroutine {
    Box::pin(ready(Ok(())))
}

/// The callback contract between the reactor and the surrounding system.
///
/// All callbacks are optional; the defaults do nothing. The three data-path
/// callbacks return a [`Coroutine`] so they can await [`Io::read`]; they take
/// the handler by `Rc` so the suspended future stays `'static`, which means
/// handler state lives in `Cell`/`RefCell` fields. Because at most one
/// callback executes at any instant, such borrows never overlap as long as
/// they are not held across an awaited read.
///
/// The remaining callbacks are synchronous and run to completion. A timer
/// callback must not read: [`Context::find_io_by_tag`] hands it a write-only
/// facade, and reads through that facade fail with
/// [`Error::ReadFromTimer`].
pub trait Handler: Sized + 'static {
    /// Metadata attached to endpoints and timers for handler-side
    /// identification.
    type Tag: Clone + PartialEq + 'static;

    /// Payload type of queued user events.
    type Event: 'static;

    /// An outbound connect succeeded; `io` is the new connection.
    fn client_init(self: Rc<Self>, _io: Io<Self>) -> Coroutine {
        done()
    }

    /// An inbound connection was accepted; `io` is the new socket, which
    /// inherits the listener's tag until re-tagged with [`Io::set_tag`].
    fn server_init(self: Rc<Self>, _io: Io<Self>, _peer: SocketAddr) -> Coroutine {
        done()
    }

    /// The endpoint has data available to read.
    fn recv_data(self: Rc<Self>, _io: Io<Self>) -> Coroutine {
        done()
    }

    /// A user timer fired, carrying the metadata it was scheduled with.
    fn timer_expired(&self, _cx: &Context<Self>, _tag: Option<Self::Tag>) -> Result<()> {
        Ok(())
    }

    /// A queued user event is being delivered.
    fn user_event(&self, _cx: &Context<Self>, _event: Self::Event) -> Result<()> {
        Ok(())
    }

    /// A read, write or connect-timeout error occurred on an endpoint.
    /// The endpoint is disposed right after this returns.
    fn error(&self, _cx: &Context<Self>, _tag: Self::Tag, _err: Error) {}

    /// An outbound connect failed. The endpoint is disposed right after
    /// this returns.
    fn connect_error(&self, _cx: &Context<Self>, _tag: Self::Tag, _err: Error) {}
}
