use std::cell::Cell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rill::{done, Context, Coroutine, Error, Handler, Io, Reactor};

struct NeverConnects {
    client_init_ran: Cell<bool>,
    failed: Cell<bool>,
}

impl Handler for NeverConnects {
    type Tag = &'static str;
    type Event = ();

    fn client_init(self: Rc<Self>, io: Io<Self>) -> Coroutine {
        self.client_init_ran.set(true);
        io.context().stop();
        done()
    }

    fn error(&self, cx: &Context<Self>, tag: Self::Tag, _err: Error) {
        assert_eq!(tag, "target");
        self.failed.set(true);
        cx.stop();
    }

    fn connect_error(&self, cx: &Context<Self>, tag: Self::Tag, _err: Error) {
        assert_eq!(tag, "target");
        self.failed.set(true);
        cx.stop();
    }
}

#[test]
fn unreachable_connect_surfaces_an_error() {
    let reactor = Reactor::new(NeverConnects {
        client_init_ran: Cell::new(false),
        failed: Cell::new(false),
    })
    .expect("failed to build reactor");

    reactor
        .connect(
            Ipv4Addr::new(10, 255, 255, 1),
            80,
            "target",
            Some(Duration::from_millis(250)),
        )
        .expect("connect call itself must not fail");

    let began = Instant::now();
    reactor.start().expect("reactor failed");

    let handler = reactor.handler();
    assert!(!handler.client_init_ran.get(), "connect cannot have succeeded");
    assert!(handler.failed.get(), "no failure was reported");
    assert!(
        began.elapsed() < Duration::from_secs(5),
        "failure took longer than the connect timeout allows"
    );
}
