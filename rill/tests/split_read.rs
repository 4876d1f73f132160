use std::cell::{Cell, RefCell};
use std::io::Write;
use std::net::{Ipv4Addr, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use rill::{Coroutine, Handler, Io, Reactor};

struct SplitRead {
    got: RefCell<Vec<u8>>,
    recv_calls: Cell<u32>,
}

impl Handler for SplitRead {
    type Tag = &'static str;
    type Event = ();

    fn recv_data(self: Rc<Self>, io: Io<Self>) -> Coroutine {
        self.recv_calls.set(self.recv_calls.get() + 1);
        Box::pin(async move {
            let bytes = io.read(10).await?;
            *self.got.borrow_mut() = bytes;
            io.context().stop();
            Ok(())
        })
    }
}

#[test]
fn one_read_spans_two_delayed_sends() {
    let reactor = Reactor::new(SplitRead {
        got: RefCell::new(Vec::new()),
        recv_calls: Cell::new(0),
    })
    .expect("failed to build reactor");

    let addr = reactor
        .listen(Ipv4Addr::LOCALHOST, 0, "listener")
        .expect("failed to listen");

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("failed to connect");
        stream.write_all(b"hello").expect("failed to send first half");
        thread::sleep(Duration::from_millis(50));
        stream.write_all(b"world").expect("failed to send second half");

        // Hold the socket open until the reactor has read everything.
        thread::sleep(Duration::from_millis(200));
    });

    reactor.start().expect("reactor failed");
    peer.join().expect("peer thread panicked");

    let handler = reactor.handler();
    assert_eq!(&*handler.got.borrow(), b"helloworld");
    assert_eq!(
        handler.recv_calls.get(),
        1,
        "the split read must complete inside a single recv_data callback"
    );
}
