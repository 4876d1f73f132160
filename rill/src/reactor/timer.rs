use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::handler::Handler;

/// Cancellation handle for a scheduled timer.
///
/// Cancellation is lazy: the entry stays in the queue until it reaches the
/// top, where it is discarded instead of fired. Cancelling a recurring
/// timer also stops its future recurrences.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// What a timer entry does when it fires.
pub(crate) enum TimerKind<H: Handler> {
    /// Bounds a pending outbound connect on the endpoint at this token.
    Connect(usize),

    /// A caller-scheduled timer carrying its metadata.
    User(Option<H::Tag>),
}

impl<H: Handler> Clone for TimerKind<H> {
    fn clone(&self) -> Self {
        match self {
            TimerKind::Connect(token) => TimerKind::Connect(*token),
            TimerKind::User(tag) => TimerKind::User(tag.clone()),
        }
    }
}

pub(crate) struct TimerEntry<H: Handler> {
    pub(crate) expiry: Instant,
    pub(crate) duration: Duration,
    pub(crate) recurring: bool,
    pub(crate) kind: TimerKind<H>,
    pub(crate) cancelled: Rc<Cell<bool>>,
}

impl<H: Handler> Eq for TimerEntry<H> {}

impl<H: Handler> PartialEq for TimerEntry<H> {
    fn eq(&self, other: &Self) -> bool {
        self.expiry.eq(&other.expiry)
    }
}

impl<H: Handler> Ord for TimerEntry<H> {
    /// Orders entries by expiry, **reversed** so the binary heap behaves as
    /// a min-heap and pops the earliest deadline first. The tie-break for
    /// equal expiries is whatever the heap happens to do.
    fn cmp(&self, other: &Self) -> Ordering {
        other.expiry.cmp(&self.expiry)
    }
}

impl<H: Handler> PartialOrd for TimerEntry<H> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of timer entries with lazy cancellation.
pub(crate) struct TimerQueue<H: Handler> {
    heap: BinaryHeap<TimerEntry<H>>,
}

impl<H: Handler> TimerQueue<H> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    /// Schedules an entry and returns its cancellation handle.
    ///
    /// Immediate entries expire right away and fire on the next pass.
    pub(crate) fn add(
        &mut self,
        duration: Duration,
        kind: TimerKind<H>,
        recurring: bool,
        immediate: bool,
    ) -> TimerHandle {
        let now = Instant::now();
        let expiry = if immediate { now } else { now + duration };
        let cancelled = Rc::new(Cell::new(false));

        self.heap.push(TimerEntry {
            expiry,
            duration,
            recurring,
            kind,
            cancelled: cancelled.clone(),
        });

        TimerHandle { cancelled }
    }

    /// Discards cancelled entries at the top, then reports the earliest
    /// live expiry.
    pub(crate) fn next_expiry(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if top.cancelled.get() {
                self.heap.pop();
            } else {
                return Some(top.expiry);
            }
        }

        None
    }

    /// Pops the earliest live entry if it is due.
    ///
    /// A recurring entry is re-armed at `now + duration` before being
    /// returned, sharing its cancellation flag with the new arming.
    pub(crate) fn next_due(&mut self, now: Instant) -> Option<TimerEntry<H>> {
        loop {
            match self.heap.peek() {
                None => return None,
                Some(top) if top.cancelled.get() => {
                    self.heap.pop();
                }
                Some(top) if top.expiry > now => return None,
                Some(_) => {
                    let entry = self.heap.pop()?;

                    if entry.recurring {
                        self.heap.push(TimerEntry {
                            expiry: now + entry.duration,
                            duration: entry.duration,
                            recurring: true,
                            kind: entry.kind.clone(),
                            cancelled: entry.cancelled.clone(),
                        });
                    }

                    return Some(entry);
                }
            }
        }
    }
}
