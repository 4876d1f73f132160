use std::cell::{Cell, RefCell};
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use rill::{Coroutine, Handler, Io, Reactor};

/// Clears the in-callback flag when the callback section ends.
struct Entered<'a>(&'a Cell<bool>);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct Duplex {
    client_started: Cell<bool>,
    server_got: RefCell<Vec<u8>>,
    client_got: RefCell<Vec<u8>>,
    in_callback: Cell<bool>,
}

impl Duplex {
    fn enter(&self) -> Entered<'_> {
        assert!(
            !self.in_callback.get(),
            "two callbacks were executing at once"
        );
        self.in_callback.set(true);
        Entered(&self.in_callback)
    }
}

impl Handler for Duplex {
    type Tag = &'static str;
    type Event = ();

    fn client_init(self: Rc<Self>, io: Io<Self>) -> Coroutine {
        Box::pin(async move {
            let _entered = self.enter();
            self.client_started.set(true);

            let current = io
                .context()
                .current_io()
                .expect("client_init must run with a current endpoint");
            assert_eq!(current.tag(), io.tag());

            io.write(b"ping");
            Ok(())
        })
    }

    fn recv_data(self: Rc<Self>, io: Io<Self>) -> Coroutine {
        Box::pin(async move {
            match io.tag() {
                "server" => {
                    let bytes = io.read(4).await?;
                    let _entered = self.enter();
                    assert_eq!(&bytes, b"ping");
                    *self.server_got.borrow_mut() = bytes;
                    io.write(b"pong");
                }
                "client" => {
                    let bytes = io.read(4).await?;
                    let _entered = self.enter();
                    assert_eq!(&bytes, b"pong");
                    *self.client_got.borrow_mut() = bytes;
                    io.context().stop();
                }
                other => panic!("unexpected endpoint tag {other}"),
            }
            Ok(())
        })
    }
}

#[test]
fn loopback_client_and_server_exchange_messages() {
    let reactor = Reactor::new(Duplex {
        client_started: Cell::new(false),
        server_got: RefCell::new(Vec::new()),
        client_got: RefCell::new(Vec::new()),
        in_callback: Cell::new(false),
    })
    .expect("failed to build reactor");

    let addr = reactor
        .listen(Ipv4Addr::LOCALHOST, 0, "server")
        .expect("failed to listen");
    let port = match addr {
        SocketAddr::V4(v4) => v4.port(),
        other => panic!("unexpected listen address {other}"),
    };

    reactor
        .connect(
            Ipv4Addr::LOCALHOST,
            port,
            "client",
            Some(Duration::from_secs(5)),
        )
        .expect("failed to start connect");

    reactor.start().expect("reactor failed");

    let handler = reactor.handler();
    assert!(handler.client_started.get(), "client_init never ran");
    assert_eq!(&*handler.server_got.borrow(), b"ping");
    assert_eq!(&*handler.client_got.borrow(), b"pong");
}
