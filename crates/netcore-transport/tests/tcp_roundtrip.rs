use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use netcore_codec::ZeroCopyMessage;
use netcore_dispatcher::{Dispatcher, Event};
use netcore_memory::Pool;
use netcore_reactor::ReactorPool;
use netcore_transport::{TcpAcceptor, connect_tcp};

#[test]
fn tcp_roundtrip() {
    let bind_addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0));
    let buffer_pool = Pool::default();

    let reactor_pool = Arc::new(ReactorPool::new(2, buffer_pool.clone()).unwrap());
    reactor_pool.spawn(false);
    let dispatcher = Arc::new(Dispatcher::new(false));

    let server_received = Arc::new(Mutex::new(None));
    let recv = server_received.clone();
    dispatcher.register_handler(
        1,
        Box::new(move |_peer_id, msg: &ZeroCopyMessage| {
            *recv.lock().unwrap() = Some(msg.body().to_vec());
        }),
    );

    let acceptor = TcpAcceptor::bind(bind_addr, reactor_pool.clone(), buffer_pool.clone(), dispatcher.clone(), 1 << 20)
        .unwrap();
    let addr = acceptor.local_addr().unwrap();

    let d = dispatcher.clone();
    let dispatcher_thread = std::thread::spawn(move || d.start());

    let (peer_tx, peer_rx) = std::sync::mpsc::channel();
    dispatcher.register_event_handler(
        netcore_dispatcher::ADD_EVENT,
        Box::new(move |ev: &Event| {
            let _ = peer_tx.send(ev.peer_id);
        }),
    );

    let client_reactor_pool = Arc::new(ReactorPool::new(1, buffer_pool.clone()).unwrap());
    client_reactor_pool.spawn(false);
    let client_dispatcher = Arc::new(Dispatcher::new(false));
    let cd = client_dispatcher.clone();
    let client_dispatcher_thread = std::thread::spawn(move || cd.start());

    let client_peer =
        connect_tcp(addr, &client_reactor_pool, buffer_pool.clone(), client_dispatcher.clone(), 1 << 20, 1).unwrap();

    let server_peer_id = peer_rx.recv_timeout(Duration::from_secs(2)).expect("server observed the connection");
    assert!(server_peer_id > 0);

    client_peer.send_message(b"ping-from-client", 1).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if server_received.lock().unwrap().is_some() || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(server_received.lock().unwrap().as_deref(), Some(b"ping-from-client".as_slice()));
    assert_eq!(acceptor.stats().accepts, 1);

    client_peer.close();
    dispatcher.stop();
    client_dispatcher.stop();
    dispatcher_thread.join().unwrap();
    client_dispatcher_thread.join().unwrap();
    reactor_pool.stop_all();
    client_reactor_pool.stop_all();
}
