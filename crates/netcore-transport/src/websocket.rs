use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use netcore_dispatcher::{Dispatcher, Event};
use netcore_memory::Pool;
use netcore_peer::{Peer, Transport};
use netcore_reactor::{AsyncIoHandler, Fd};
use tracing::{debug, warn};
use tungstenite::{Message, WebSocket};

use crate::error::AcceptError;

/// Binary-frame-only: the codec has no notion of text frames, so anything
/// else received over the socket is treated as a protocol violation and
/// closes the peer.
pub struct WebSocketTransport {
    socket: Mutex<WebSocket<TcpStream>>,
}

impl Transport for WebSocketTransport {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut socket = self.socket.lock().unwrap();
        socket
            .send(Message::Binary(buf.to_vec().into()))
            .map_err(to_io_error)?;
        socket.flush().map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn close(&self) {
        let _ = self.socket.lock().unwrap().close(None);
    }

    /// The websocket upgrade owns its stream's lifecycle via the dedicated
    /// read thread rather than reactor registration, per §4.9.
    fn raw_fd(&self) -> Option<Fd> {
        None
    }
}

fn to_io_error(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(io_err) => io_err,
        other => io::Error::other(other.to_string()),
    }
}

/// Listens for TCP connections and performs the websocket handshake on
/// each, mirroring the original's `http.Handle("/ws", ...)` upgrade path
/// but without pulling in a full HTTP server — `tungstenite::accept`
/// speaks just enough HTTP to complete the handshake.
pub struct WebSocketAcceptor {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    buffer_pool: Pool,
    max_message_length: usize,
    next_peer_id: AtomicU64,
}

impl WebSocketAcceptor {
    pub fn bind(
        addr: SocketAddr,
        buffer_pool: Pool,
        dispatcher: Arc<Dispatcher>,
        max_message_length: usize,
    ) -> Result<Arc<Self>, AcceptError> {
        let listener = TcpListener::bind(addr).map_err(AcceptError::Bind)?;
        Ok(Arc::new(WebSocketAcceptor {
            listener,
            dispatcher,
            buffer_pool,
            max_message_length,
            next_peer_id: AtomicU64::new(1),
        }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks the calling thread, accepting and upgrading connections until
    /// the listener errors out. Each accepted connection hands off to its
    /// own read-loop thread immediately, so a slow handshake on one client
    /// never stalls acceptance of the next.
    pub fn run(self: &Arc<Self>) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.spawn_connection(stream, addr),
                Err(err) => {
                    warn!(%err, "websocket listener accept error");
                    break;
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let acceptor = self.clone();
        std::thread::Builder::new()
            .name("netcore-ws-upgrade".to_string())
            .spawn(move || acceptor.handle_connection(stream, addr))
            .expect("failed to spawn websocket upgrade thread");
    }

    fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let socket = match tungstenite::accept(stream) {
            Ok(socket) => socket,
            Err(err) => {
                debug!(%addr, %err, "websocket handshake failed");
                return;
            }
        };

        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::new(WebSocketTransport { socket: Mutex::new(socket) });
        let peer = Peer::new(
            peer_id,
            transport.clone(),
            None,
            self.dispatcher.clone(),
            self.buffer_pool.clone(),
            self.max_message_length,
        );

        self.dispatcher.submit_event(Event::add(peer_id));
        debug!(peer_id, %addr, "websocket peer established");

        read_loop(peer, transport);
    }
}

/// Drives one websocket connection's inbound side: every binary frame
/// becomes a read event on the peer, routed through the same streaming
/// frame parser TCP and KCP peers use. Anything else (text, a close
/// frame, a transport error) ends the loop and closes the peer.
///
/// Takes the concrete transport alongside the peer rather than recovering
/// it from `peer`'s `Arc<dyn Transport>` — the blocking `read()` call isn't
/// part of the `Transport` trait, only `WebSocketTransport` itself exposes
/// it.
fn read_loop(peer: Arc<Peer>, transport: Arc<WebSocketTransport>) {
    loop {
        if peer.state() != netcore_peer::PeerState::Connected {
            break;
        }

        let frame = {
            let mut socket = transport.socket.lock().unwrap();
            socket.read()
        };

        match frame {
            Ok(Message::Binary(bytes)) => peer.on_read(0, &bytes),
            Ok(Message::Close(_)) => {
                debug!(peer_id = peer.id(), "websocket peer sent close frame");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Ok(Message::Text(_)) => {
                warn!(peer_id = peer.id(), "text frame on binary-only websocket peer, closing");
                break;
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => break,
            Err(err) => {
                warn!(peer_id = peer.id(), %err, "websocket read error, closing peer");
                break;
            }
        }
    }

    peer.close();
}

#[cfg(test)]
mod tests {
    use std::{net::TcpStream as StdTcpStream, time::Duration};

    use netcore_dispatcher::Dispatcher;

    use super::*;

    #[test]
    fn accepts_and_upgrades_websocket_connection() {
        let dispatcher = Arc::new(Dispatcher::new(false));
        let acceptor = WebSocketAcceptor::bind(
            "127.0.0.1:0".parse().unwrap(),
            Pool::default(),
            dispatcher.clone(),
            1 << 20,
        )
        .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let a = acceptor.clone();
        std::thread::spawn(move || a.run());

        let d = dispatcher.clone();
        let handle = std::thread::spawn(move || d.start());

        let (add_tx, add_rx) = std::sync::mpsc::channel();
        dispatcher.register_event_handler(
            netcore_dispatcher::ADD_EVENT,
            Box::new(move |ev: &Event| {
                let _ = add_tx.send(ev.peer_id);
            }),
        );

        let stream = StdTcpStream::connect(addr).unwrap();
        let (mut client, _response) = tungstenite::client(format!("ws://{addr}/"), stream).unwrap();
        client.send(Message::Binary(vec![1, 2, 3].into())).unwrap();

        let peer_id = add_rx.recv_timeout(Duration::from_secs(2)).expect("add event");
        assert!(peer_id > 0);

        dispatcher.stop();
        handle.join().unwrap();
    }
}
