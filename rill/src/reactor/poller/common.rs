use std::os::fd::RawFd;

use super::platform::sys_write;

#[derive(Clone, Copy, Default)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// Write end of the poller's wakeup pipe.
pub(crate) struct Waker(pub(crate) RawFd);

impl Waker {
    /// Unblocks a pending poll by writing one sentinel byte.
    pub(crate) fn wake(&self) {
        let _ = sys_write(self.0, &[1u8]);
    }
}
