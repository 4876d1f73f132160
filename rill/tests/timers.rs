use std::cell::Cell;
use std::time::{Duration, Instant};

use rill::{Context, Handler, Reactor, Result};

struct Ticker {
    ticks: Cell<u32>,
    dead_fired: Cell<bool>,
}

impl Ticker {
    fn new() -> Self {
        Self {
            ticks: Cell::new(0),
            dead_fired: Cell::new(false),
        }
    }
}

impl Handler for Ticker {
    type Tag = &'static str;
    type Event = ();

    fn timer_expired(&self, cx: &Context<Self>, tag: Option<Self::Tag>) -> Result<()> {
        match tag {
            Some("tick") => self.ticks.set(self.ticks.get() + 1),
            Some("dead") => self.dead_fired.set(true),
            Some("stop") => cx.stop(),
            other => panic!("unexpected timer tag {other:?}"),
        }
        Ok(())
    }
}

#[test]
fn recurring_timer_fires_at_cadence() {
    let reactor = Reactor::new(Ticker::new()).expect("failed to build reactor");

    reactor.schedule_timer(Duration::from_millis(100), Some("tick"), true, false);
    reactor.schedule_timer(Duration::from_millis(550), Some("stop"), false, false);

    reactor.start().expect("reactor failed");

    let ticks = reactor.handler().ticks.get();
    assert!(
        (4..=6).contains(&ticks),
        "expected about 5 firings in 550ms, got {ticks}"
    );
}

#[test]
fn cancelled_timer_never_fires() {
    let reactor = Reactor::new(Ticker::new()).expect("failed to build reactor");

    reactor.schedule_timer(Duration::from_millis(100), Some("tick"), false, false);
    let doomed = reactor.schedule_timer(Duration::from_millis(100), Some("dead"), false, false);
    reactor.cancel_timer(&doomed);
    reactor.schedule_timer(Duration::from_millis(250), Some("stop"), false, false);

    reactor.start().expect("reactor failed");

    assert_eq!(reactor.handler().ticks.get(), 1);
    assert!(!reactor.handler().dead_fired.get());
}

#[test]
fn timer_never_fires_early() {
    let reactor = Reactor::new(Ticker::new()).expect("failed to build reactor");

    let began = Instant::now();
    reactor.schedule_timer(Duration::from_millis(150), Some("stop"), false, false);
    reactor.start().expect("reactor failed");

    assert!(
        began.elapsed() >= Duration::from_millis(150),
        "timer fired before its deadline"
    );
}

#[test]
fn immediate_timer_fires_on_first_pass() {
    let reactor = Reactor::new(Ticker::new()).expect("failed to build reactor");

    reactor.schedule_timer(Duration::from_secs(3600), Some("stop"), false, true);

    let began = Instant::now();
    reactor.start().expect("reactor failed");

    assert!(
        began.elapsed() < Duration::from_secs(1),
        "immediate timer waited for its nominal duration"
    );
}
