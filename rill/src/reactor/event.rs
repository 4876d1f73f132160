/// A readiness event reported by the poller.
///
/// The token identifies the endpoint inside the reactor registry; the two
/// flags say which of the endpoint's requested interests are ready.
pub(crate) struct Event {
    /// Token of the registered endpoint this event belongs to.
    pub(crate) token: usize,

    /// The endpoint can be read without blocking.
    pub(crate) readable: bool,

    /// The endpoint can be written without blocking.
    pub(crate) writable: bool,
}
