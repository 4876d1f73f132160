use std::cell::Cell;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::rc::Rc;
use std::thread;

use rill::{Coroutine, Handler, Io, Reactor};

struct Echo {
    echoed: Cell<bool>,
}

impl Handler for Echo {
    type Tag = &'static str;
    type Event = ();

    fn recv_data(self: Rc<Self>, io: Io<Self>) -> Coroutine {
        Box::pin(async move {
            let bytes = io.read(4).await?;
            io.write(&bytes);
            self.echoed.set(true);
            io.context().stop();
            Ok(())
        })
    }
}

#[test]
fn echo_round_trip_drains_before_shutdown() {
    let reactor = Reactor::<Echo>::builder()
        .backlog(16)
        .build(Echo {
            echoed: Cell::new(false),
        })
        .expect("failed to build reactor");

    let addr = reactor
        .listen(Ipv4Addr::LOCALHOST, 0, "listener")
        .expect("failed to listen");

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("failed to connect");
        stream.write_all(b"ping").expect("failed to send");

        let mut buffer = [0u8; 4];
        stream.read_exact(&mut buffer).expect("failed to read echo");
        buffer
    });

    reactor.start().expect("reactor failed");

    assert!(reactor.handler().echoed.get(), "recv_data never completed");
    assert_eq!(&peer.join().expect("peer thread panicked"), b"ping");
}
