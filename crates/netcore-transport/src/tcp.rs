use std::{
    collections::HashMap,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use netcore_dispatcher::{Dispatcher, Event, PeerId, REMOVE_EVENT};
use netcore_memory::Pool;
use netcore_peer::{Peer, Transport};
use netcore_reactor::{AsyncIoHandler, Fd, Interest, Reactor, ReactorPool};
use tracing::{info, warn};

use crate::error::AcceptError;

#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(windows)]
use std::os::windows::io::AsRawSocket;

/// The byte-moving half of a TCP [`Peer`][netcore_peer::Peer]: a
/// non-blocking `std::net::TcpStream` registered with one reactor.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        (&self.stream).write(buf)
    }

    fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<Fd> {
        Some(self.stream.as_raw_fd())
    }

    #[cfg(windows)]
    fn raw_fd(&self) -> Option<Fd> {
        Some(self.stream.as_raw_socket() as Fd)
    }
}

/// Live accept/connection counters exposed for observability, per §4.7.
#[derive(Default)]
struct AcceptorStats {
    accepts: AtomicU64,
    live_connections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptorStatsSnapshot {
    pub accepts: u64,
    pub live_connections: u64,
}

/// Sets `TCP_NODELAY` and enables keepalive on a freshly accepted socket,
/// mirroring the original's `SetNoDelay(true)`/`SetKeepAlive(true)`.
fn tune_accepted_socket(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);
    if let Err(err) = sock.set_nodelay(true) {
        warn!(%err, "failed to set TCP_NODELAY on accepted socket");
    }
    if let Err(err) = sock.set_keepalive(true) {
        warn!(%err, "failed to set SO_KEEPALIVE on accepted socket");
    }
}

/// Binds a TCP listener, registers it for readable interest on one reactor,
/// and on each readiness notification accepts until `EAGAIN`, assigning
/// every new connection to a reactor chosen round-robin from the pool.
pub struct TcpAcceptor {
    listener: TcpListener,
    reactor_pool: Arc<ReactorPool>,
    buffer_pool: Pool,
    dispatcher: Arc<Dispatcher>,
    max_message_length: usize,
    next_peer_id: AtomicU64,
    stats: AcceptorStats,
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
}

impl TcpAcceptor {
    /// Binds `addr`, registers the listener's readable interest on the
    /// first reactor in `reactor_pool`, and installs a `REMOVE_EVENT`
    /// handler on `dispatcher` so `live_connections` tracks peer closes.
    pub fn bind(
        addr: SocketAddr,
        reactor_pool: Arc<ReactorPool>,
        buffer_pool: Pool,
        dispatcher: Arc<Dispatcher>,
        max_message_length: usize,
    ) -> Result<Arc<Self>, AcceptError> {
        let listener = TcpListener::bind(addr).map_err(AcceptError::Bind)?;
        listener.set_nonblocking(true)?;

        let acceptor = Arc::new(TcpAcceptor {
            listener,
            reactor_pool,
            buffer_pool,
            dispatcher,
            max_message_length,
            next_peer_id: AtomicU64::new(1),
            stats: AcceptorStats::default(),
            peers: Mutex::new(HashMap::new()),
        });

        let accept_reactor = acceptor.reactor_pool.next();
        #[cfg(unix)]
        let fd = acceptor.listener.as_raw_fd();
        #[cfg(windows)]
        let fd = acceptor.listener.as_raw_socket() as Fd;
        accept_reactor.add(fd, Interest::READ, acceptor.clone() as Arc<dyn AsyncIoHandler>)?;

        let stats_acceptor = acceptor.clone();
        acceptor.dispatcher.register_event_handler(
            REMOVE_EVENT,
            Box::new(move |event: &Event| {
                if stats_acceptor.peers.lock().unwrap().remove(&event.peer_id).is_some() {
                    stats_acceptor.stats.live_connections.fetch_sub(1, Ordering::Relaxed);
                }
            }),
        );

        Ok(acceptor)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> AcceptorStatsSnapshot {
        AcceptorStatsSnapshot {
            accepts: self.stats.accepts.load(Ordering::Relaxed),
            live_connections: self.stats.live_connections.load(Ordering::Relaxed),
        }
    }

    fn accept_one(&self, stream: TcpStream, peer_addr: SocketAddr) {
        tune_accepted_socket(&stream);

        let transport = match TcpTransport::new(stream) {
            Ok(t) => Arc::new(t),
            Err(err) => {
                warn!(%err, %peer_addr, "failed to ready accepted socket");
                return;
            }
        };

        let reactor = self.reactor_pool.next();
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let peer = Peer::new(
            peer_id,
            transport,
            Some(reactor as Arc<dyn Reactor>),
            self.dispatcher.clone(),
            self.buffer_pool.clone(),
            self.max_message_length,
        );

        self.peers.lock().unwrap().insert(peer_id, peer);
        self.stats.accepts.fetch_add(1, Ordering::Relaxed);
        self.stats.live_connections.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.submit_event(Event::add(peer_id));
        info!(peer_id, %peer_addr, "accepted tcp connection");
    }
}

impl AsyncIoHandler for TcpAcceptor {
    fn on_read(&self, _fd: Fd, _bytes: &[u8]) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.accept_one(stream, addr),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "tcp accept error");
                    break;
                }
            }
        }
    }

    fn on_write(&self, _fd: Fd) {}

    fn on_close(&self, _fd: Fd) {
        warn!("tcp listener socket closed");
    }

    fn on_error(&self, _fd: Fd, err: std::io::Error) {
        warn!(%err, "tcp listener socket error");
    }
}

/// A non-blocking outbound TCP connection, for the application's own
/// client-side use of the core (the `Peer` abstraction supports outbound
/// connections symmetrically with accepted ones; only the construction
/// path differs).
pub fn connect(
    addr: SocketAddr,
    reactor_pool: &ReactorPool,
    buffer_pool: Pool,
    dispatcher: Arc<Dispatcher>,
    max_message_length: usize,
    peer_id: PeerId,
) -> Result<Arc<Peer>, AcceptError> {
    let stream = TcpStream::connect(addr)?;
    tune_accepted_socket(&stream);
    let transport = Arc::new(TcpTransport::new(stream)?);
    let reactor = reactor_pool.next();
    let peer = Peer::new(
        peer_id,
        transport,
        Some(reactor as Arc<dyn Reactor>),
        dispatcher.clone(),
        buffer_pool,
        max_message_length,
    );
    dispatcher.submit_event(Event::add(peer_id));
    Ok(peer)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpStream as StdTcpStream,
        time::Duration,
    };

    use netcore_codec::HEADER_LEN;
    use netcore_dispatcher::Dispatcher;

    use super::*;

    #[test]
    fn accepts_connection_and_emits_add_event() {
        let reactor_pool = Arc::new(ReactorPool::new(1, Pool::default()).unwrap());
        reactor_pool.spawn(false);
        let dispatcher = Arc::new(Dispatcher::new(false));

        let acceptor = TcpAcceptor::bind(
            "127.0.0.1:0".parse().unwrap(),
            reactor_pool.clone(),
            Pool::default(),
            dispatcher.clone(),
            1 << 20,
        )
        .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let d = dispatcher.clone();
        let handle = std::thread::spawn(move || d.start());

        let (add_tx, add_rx) = std::sync::mpsc::channel();
        dispatcher.register_event_handler(
            netcore_dispatcher::ADD_EVENT,
            Box::new(move |ev: &Event| {
                let _ = add_tx.send(ev.peer_id);
            }),
        );

        let mut client = StdTcpStream::connect(addr).unwrap();
        let peer_id = add_rx.recv_timeout(Duration::from_secs(2)).expect("add event");
        assert!(peer_id > 0);
        assert_eq!(acceptor.stats().accepts, 1);

        // exercise the framed round trip too.
        let mut frame = vec![0u8; HEADER_LEN + 3];
        netcore_codec::MessageHead { length: 3, id: 9 }.encode(&mut frame);
        frame[HEADER_LEN..].copy_from_slice(b"abc");
        client.write_all(&frame).unwrap();
        let mut discard = [0u8; 1];
        let _ = client.set_read_timeout(Some(Duration::from_millis(50)));
        let _ = client.read(&mut discard);

        dispatcher.stop();
        handle.join().unwrap();
        reactor_pool.stop_all();
    }
}
