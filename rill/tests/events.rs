use std::cell::RefCell;

use rill::{Context, Handler, Reactor, Result};

struct Collector {
    seen: RefCell<Vec<u32>>,
}

impl Handler for Collector {
    type Tag = ();
    type Event = u32;

    fn user_event(&self, cx: &Context<Self>, event: Self::Event) -> Result<()> {
        self.seen.borrow_mut().push(event);
        if event == 3 {
            cx.stop();
        }
        Ok(())
    }
}

#[test]
fn user_events_are_delivered_in_fifo_order() {
    let reactor = Reactor::new(Collector {
        seen: RefCell::new(Vec::new()),
    })
    .expect("failed to build reactor");

    reactor.add_user_event(1);
    reactor.add_user_event(2);
    reactor.add_user_event(3);

    reactor.start().expect("reactor failed");

    assert_eq!(&*reactor.handler().seen.borrow(), &[1, 2, 3]);
}
