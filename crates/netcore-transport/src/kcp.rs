use std::{
    collections::HashMap,
    io,
    net::{SocketAddr, UdpSocket},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration as StdDuration, Instant as StdInstant},
};

use kcp::Kcp;
use netcore_dispatcher::{Dispatcher, Event};
use netcore_memory::Pool;
use netcore_peer::{Peer, Transport};
use netcore_reactor::{AsyncIoHandler, Fd};
use tracing::{debug, warn};

use crate::error::AcceptError;

/// `nodelay=(1,10,2,1)`, MTU 1400, window 4096/4096, ack-no-delay — the
/// session tuning mandated by §4.8. Read buffer/write buffer sizing and
/// DSCP are applied to the shared UDP socket rather than per-session,
/// since KCP sessions share one socket multiplexed by peer address.
const KCP_MTU: usize = 1400;
const KCP_WND_SIZE: u16 = 4096;
const SESSION_TICK: StdDuration = StdDuration::from_millis(10);
const SOCKET_POLL_TIMEOUT: StdDuration = StdDuration::from_millis(100);

/// Writes go straight to the UDP socket addressed at one peer; this is what
/// the `kcp` crate calls to flush its internal segments.
struct KcpOutput {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

impl io::Write for KcpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send_to(buf, self.addr)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn configure_kcp(kcp: &mut Kcp<KcpOutput>) {
    kcp.set_nodelay(true, 10, 2, true);
    kcp.set_wndsize(KCP_WND_SIZE, KCP_WND_SIZE);
    let _ = kcp.set_mtu(KCP_MTU);
}

/// The byte-moving half of a KCP [`Peer`]. KCP has no file descriptor of
/// its own — sends go straight into the session's ARQ state machine, which
/// flushes through the shared UDP socket.
pub struct KcpTransport {
    kcp: Arc<Mutex<Kcp<KcpOutput>>>,
}

impl Transport for KcpTransport {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut kcp = self.kcp.lock().unwrap();
        kcp.send(buf).map_err(|err| io::Error::other(err.to_string()))?;
        kcp.flush().map_err(|err| io::Error::other(err.to_string()))?;
        Ok(buf.len())
    }

    fn close(&self) {}

    /// KCP peers are virtual: no reactor registration, per §4.8.
    fn raw_fd(&self) -> Option<Fd> {
        None
    }
}

struct Session {
    input_tx: crossbeam_channel::Sender<Vec<u8>>,
}

/// Listens on one UDP socket for KCP sessions, demuxed by source address
/// (mirroring `kcp-go`'s listener multiplexing). Each session gets its own
/// reader task that drains inbound datagrams, ticks the ARQ state machine,
/// and bridges decoded bytes into the shared streaming frame parser via
/// `peer.on_read`, per §4.8/§4.9's "virtual fd" dispatch pattern.
pub struct KcpAcceptor {
    socket: Arc<UdpSocket>,
    sessions: Mutex<HashMap<SocketAddr, Session>>,
    dispatcher: Arc<Dispatcher>,
    buffer_pool: Pool,
    max_message_length: usize,
    next_peer_id: AtomicU64,
    next_conv: AtomicU32,
    running: Arc<AtomicBool>,
}

impl KcpAcceptor {
    pub fn bind(
        addr: SocketAddr,
        buffer_pool: Pool,
        dispatcher: Arc<Dispatcher>,
        max_message_length: usize,
    ) -> Result<Arc<Self>, AcceptError> {
        let socket = UdpSocket::bind(addr).map_err(AcceptError::Bind)?;
        socket.set_read_timeout(Some(SOCKET_POLL_TIMEOUT))?;
        apply_socket_tuning(&socket);

        Ok(Arc::new(KcpAcceptor {
            socket: Arc::new(socket),
            sessions: Mutex::new(HashMap::new()),
            dispatcher,
            buffer_pool,
            max_message_length,
            next_peer_id: AtomicU64::new(1),
            next_conv: AtomicU32::new(1),
            running: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Blocks the calling thread, demuxing inbound datagrams to per-session
    /// reader tasks until [`stop`](Self::stop) is called. Mirrors the
    /// reactor's bounded-timeout loop shape so shutdown is observed
    /// promptly.
    pub fn run(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut buf = vec![0u8; 64 * 1024];

        while self.running.load(Ordering::SeqCst) {
            match self.socket.recv_from(&mut buf) {
                Ok((n, addr)) => self.dispatch(addr, &buf[..n]),
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut => {}
                Err(err) => warn!(%err, "kcp socket recv error"),
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn dispatch(self: &Arc<Self>, addr: SocketAddr, bytes: &[u8]) {
        let existing = self.sessions.lock().unwrap().get(&addr).map(|s| s.input_tx.clone());
        if let Some(tx) = existing {
            let _ = tx.try_send(bytes.to_vec());
            return;
        }
        self.spawn_session(addr, bytes);
    }

    fn spawn_session(self: &Arc<Self>, addr: SocketAddr, first_datagram: &[u8]) {
        let conv = self.next_conv.fetch_add(1, Ordering::Relaxed);
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let output = KcpOutput { socket: self.socket.clone(), addr };
        let mut kcp = Kcp::new(conv, output);
        configure_kcp(&mut kcp);
        let kcp = Arc::new(Mutex::new(kcp));

        let transport = Arc::new(KcpTransport { kcp: kcp.clone() });
        let peer = Peer::new(
            peer_id,
            transport,
            None,
            self.dispatcher.clone(),
            self.buffer_pool.clone(),
            self.max_message_length,
        );

        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        self.sessions.lock().unwrap().insert(addr, Session { input_tx: input_tx.clone() });
        let _ = input_tx.try_send(first_datagram.to_vec());

        self.dispatcher.submit_event(Event::add(peer_id));
        debug!(peer_id, %addr, conv, "kcp session established");

        let acceptor = self.clone();
        std::thread::Builder::new()
            .name(format!("netcore-kcp-session-{conv}"))
            .spawn(move || run_session(kcp, input_rx, peer, acceptor, addr))
            .expect("failed to spawn kcp session thread");
    }
}

fn run_session(
    kcp: Arc<Mutex<Kcp<KcpOutput>>>,
    input_rx: crossbeam_channel::Receiver<Vec<u8>>,
    peer: Arc<Peer>,
    acceptor: Arc<KcpAcceptor>,
    addr: SocketAddr,
) {
    let start = StdInstant::now();
    let mut recv_buf = vec![0u8; 64 * 1024];

    loop {
        match input_rx.recv_timeout(SESSION_TICK) {
            Ok(bytes) => {
                if let Err(err) = kcp.lock().unwrap().input(&bytes) {
                    debug!(%err, %addr, "kcp input rejected, ignoring datagram");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        let current = start.elapsed().as_millis() as u32;
        {
            let mut guard = kcp.lock().unwrap();
            let _ = guard.update(current);
        }
        loop {
            let received = {
                let mut guard = kcp.lock().unwrap();
                guard.recv(&mut recv_buf)
            };
            match received {
                Ok(n) => peer.on_read(0, &recv_buf[..n]),
                Err(_) => break,
            }
        }

        if peer.state() != netcore_peer::PeerState::Connected {
            break;
        }
    }

    acceptor.sessions.lock().unwrap().remove(&addr);
    peer.close();
}

fn apply_socket_tuning(socket: &UdpSocket) {
    let sock = socket2::SockRef::from(socket);
    if let Err(err) = sock.set_recv_buffer_size(4 * 1024 * 1024) {
        warn!(%err, "failed to set kcp socket recv buffer");
    }
    if let Err(err) = sock.set_send_buffer_size(4 * 1024 * 1024) {
        warn!(%err, "failed to set kcp socket send buffer");
    }
    if let Err(err) = sock.set_tos(0) {
        debug!(%err, "failed to set DSCP/TOS on kcp socket");
    }
}
