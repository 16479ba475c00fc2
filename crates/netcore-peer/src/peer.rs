use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use netcore_codec::{FrameReader, write_message};
use netcore_dispatcher::{Dispatcher, Event, PeerId};
use netcore_memory::{Pool, RingBuffer};
use netcore_reactor::{AsyncIoHandler, Fd, Interest, Reactor};
use netcore_timing::Duration;
use tracing::{debug, warn};

use crate::{
    error::PeerError,
    stats::{PeerStats, PeerStatsSnapshot},
    state::{PeerState, PeerStateCell},
    transport::Transport,
};

struct WriteRequest {
    buffer: netcore_memory::Buffer,
    offset: usize,
    started_at: std::time::Instant,
}

/// Bounds how long a stuck writer (peer not draining its receive window)
/// can hold a write in flight before the peer is failed.
const WRITE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);

/// A single connection: binds a [`Transport`] and, for real file
/// descriptors, a [`Reactor`]. Reads are parsed by a streaming
/// [`FrameReader`] and routed to a [`Dispatcher`]; writes are serialized
/// through a lock-free ring drained by at most one task at a time.
pub struct Peer {
    id: PeerId,
    auth_id: AtomicU64,
    state: PeerStateCell,
    transport: Arc<dyn Transport>,
    reactor: Option<Arc<dyn Reactor>>,
    dispatcher: Mutex<Arc<Dispatcher>>,
    pending_dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    has_pending_redirect: AtomicBool,
    frame_reader: Mutex<FrameReader>,
    pool: Pool,
    write_queue: RingBuffer<WriteRequest>,
    // `RingBuffer` is single-producer/single-consumer; application code may
    // call `send_message`/`send_buffer`/`transmit` from more than one
    // thread, so producer-side pushes are serialized here. The consumer
    // side stays single by construction: `drain`'s `writer_active` flag
    // lets only one thread at a time pop from the ring.
    write_push_lock: Mutex<()>,
    in_flight_write: Mutex<Option<WriteRequest>>,
    writer_active: AtomicBool,
    stats: PeerStats,
}

const WRITE_RING_CAPACITY: usize = 1024;

impl Peer {
    pub fn new(
        id: PeerId,
        transport: Arc<dyn Transport>,
        reactor: Option<Arc<dyn Reactor>>,
        dispatcher: Arc<Dispatcher>,
        pool: Pool,
        max_message_length: usize,
    ) -> Arc<Self> {
        let frame_reader = FrameReader::new(pool.clone(), max_message_length);

        let peer = Arc::new(Peer {
            id,
            auth_id: AtomicU64::new(0),
            state: PeerStateCell::new(),
            transport,
            reactor,
            dispatcher: Mutex::new(dispatcher),
            pending_dispatcher: Mutex::new(None),
            has_pending_redirect: AtomicBool::new(false),
            frame_reader: Mutex::new(frame_reader),
            pool,
            write_queue: RingBuffer::new(WRITE_RING_CAPACITY),
            write_push_lock: Mutex::new(()),
            in_flight_write: Mutex::new(None),
            writer_active: AtomicBool::new(false),
            stats: PeerStats::default(),
        });

        if let (Some(reactor), Some(fd)) = (&peer.reactor, peer.transport.raw_fd()) {
            if let Err(err) = reactor.add(fd, Interest::READ_WRITE, peer.clone() as Arc<dyn AsyncIoHandler>) {
                warn!(peer_id = id, %err, "failed to register peer with reactor");
            }
        }

        peer
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn auth_id(&self) -> u64 {
        self.auth_id.load(Ordering::Acquire)
    }

    pub fn set_auth_id(&self, auth_id: u64) {
        self.auth_id.store(auth_id, Ordering::Release);
    }

    pub fn state(&self) -> PeerState {
        self.state.get()
    }

    pub fn stats(&self) -> PeerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Serializes `payload` under `id` and enqueues it for writing.
    pub fn send_message(&self, payload: &[u8], id: i32) -> Result<(), PeerError> {
        let buffer = write_message(&self.pool, payload, id)?;
        self.enqueue_write(buffer)
    }

    /// Enqueues already-framed bytes unchanged.
    pub fn send_buffer(&self, framed_bytes: &[u8]) -> Result<(), PeerError> {
        let mut buffer = self.pool.acquire();
        buffer.append(framed_bytes)?;
        self.enqueue_write(buffer)
    }

    /// Forwards an already-framed buffer (e.g. relayed between peers)
    /// unchanged.
    pub fn transmit(&self, buffer: netcore_memory::Buffer) -> Result<(), PeerError> {
        self.enqueue_write(buffer)
    }

    fn enqueue_write(&self, buffer: netcore_memory::Buffer) -> Result<(), PeerError> {
        if self.state.get() != PeerState::Connected {
            return Err(PeerError::NotConnected);
        }
        let request = WriteRequest { buffer, offset: 0, started_at: std::time::Instant::now() };
        {
            let _guard = self.write_push_lock.lock().unwrap();
            self.write_queue.push(request).map_err(|_| PeerError::WriteQueueFull)?;
        }
        self.drain();
        Ok(())
    }

    /// `redirect(new_dispatcher)` atomically stores the new dispatcher; the
    /// reader swaps it into the live slot at the next message boundary.
    pub fn redirect(self: &Arc<Self>, new_dispatcher: Arc<Dispatcher>) {
        *self.pending_dispatcher.lock().unwrap() = Some(new_dispatcher);
        self.has_pending_redirect.store(true, Ordering::Release);
    }

    fn swap_in_pending_dispatcher(&self) {
        if self.has_pending_redirect.swap(false, Ordering::AcqRel) {
            if let Some(next) = self.pending_dispatcher.lock().unwrap().take() {
                *self.dispatcher.lock().unwrap() = next;
            }
        }
    }

    /// Schedules a deferred check on the dispatcher thread: if `auth_id` is
    /// still zero once `duration` elapses, the peer is closed.
    pub fn check_after(self: &Arc<Self>, duration: Duration) {
        let peer = self.clone();
        let std_duration: std::time::Duration = duration.into();
        std::thread::spawn(move || {
            std::thread::sleep(std_duration);
            let dispatcher = peer.dispatcher.lock().unwrap().clone();
            let check_peer = peer.clone();
            dispatcher.submit_deferred(Box::new(move || {
                if check_peer.auth_id() == 0 {
                    debug!(peer_id = check_peer.id(), "auth timeout, closing peer");
                    check_peer.close();
                }
            }));
        });
    }

    /// Drains the write ring. At most one draining task runs per peer at a
    /// time, guarded by `writer_active`. Releasing the flag and rechecking
    /// the ring before returning closes a race where a concurrent
    /// `enqueue_write` pushes and sees the flag still held, finding nothing
    /// to do since the draining task is mid-exit: without the recheck that
    /// item would sit unpicked until some unrelated future write happened
    /// to call `drain()` again.
    pub fn drain(&self) {
        if self.writer_active.swap(true, Ordering::AcqRel) {
            return;
        }

        loop {
            loop {
                let mut in_flight = self.in_flight_write.lock().unwrap();
                if in_flight.is_none() {
                    match self.write_queue.pop() {
                        Some(req) => *in_flight = Some(req),
                        None => break,
                    }
                }

                let req = in_flight.as_mut().expect("just populated");
                match self.write_step(req) {
                    WriteStep::Done => {
                        *in_flight = None;
                    }
                    WriteStep::WouldBlock => {
                        self.writer_active.store(false, Ordering::Release);
                        return;
                    }
                    WriteStep::Fatal(err) => {
                        warn!(peer_id = self.id, %err, "fatal write error");
                        *in_flight = None;
                        drop(in_flight);
                        self.writer_active.store(false, Ordering::Release);
                        self.fail();
                        return;
                    }
                }
            }

            self.writer_active.store(false, Ordering::Release);
            if self.write_queue.is_empty() || self.writer_active.swap(true, Ordering::AcqRel) {
                return;
            }
        }
    }

    fn write_step(&self, req: &mut WriteRequest) -> WriteStep {
        let bytes = req.buffer.bytes();
        while req.offset < bytes.len() {
            match self.transport.write(&bytes[req.offset..]) {
                Ok(0) => return self.would_block_or_timeout(req),
                Ok(n) => {
                    req.offset += n;
                    req.started_at = std::time::Instant::now();
                    self.stats.record_write(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return self.would_block_or_timeout(req),
                Err(e) => return WriteStep::Fatal(e),
            }
        }
        WriteStep::Done
    }

    fn would_block_or_timeout(&self, req: &WriteRequest) -> WriteStep {
        if req.started_at.elapsed() >= WRITE_DEADLINE {
            WriteStep::Fatal(std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded"))
        } else {
            WriteStep::WouldBlock
        }
    }

    /// Reactor-driven or explicit close: transitions `Connected -> Closing`
    /// exactly once, tears down registration and queued state, then
    /// publishes `Closed` and emits `RemoveEvent` exactly once.
    pub fn close(&self) {
        if !self.state.begin_closing() {
            return;
        }

        if let (Some(reactor), Some(fd)) = (&self.reactor, self.transport.raw_fd()) {
            if let Err(err) = reactor.remove(fd) {
                warn!(peer_id = self.id, %err, "failed to remove peer from reactor");
            }
        }

        *self.in_flight_write.lock().unwrap() = None;
        while self.write_queue.pop().is_some() {}

        self.transport.close();
        self.state.finish_closed();

        self.dispatcher.lock().unwrap().submit_event(Event::remove(self.id));
    }

    fn fail(&self) {
        self.close();
    }
}

enum WriteStep {
    Done,
    WouldBlock,
    Fatal(std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex as StdMutex, atomic::AtomicBool};

    use netcore_memory::Pool;

    use super::*;

    struct RecordingTransport {
        written: StdMutex<Vec<u8>>,
        closed: AtomicBool,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(RecordingTransport { written: StdMutex::new(Vec::new()), closed: AtomicBool::new(false) })
        }
    }

    impl Transport for RecordingTransport {
        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn raw_fd(&self) -> Option<Fd> {
            None
        }
    }

    fn test_peer() -> (Arc<Peer>, Arc<RecordingTransport>) {
        let transport = RecordingTransport::new();
        let dispatcher = Arc::new(Dispatcher::new(true));
        let peer = Peer::new(1, transport.clone(), None, dispatcher, Pool::default(), 1024 * 1024);
        (peer, transport)
    }

    #[test]
    fn send_message_writes_framed_bytes_synchronously() {
        let (peer, transport) = test_peer();
        peer.send_message(b"hello", 7).unwrap();

        let written = transport.written.lock().unwrap();
        assert_eq!(written.len(), netcore_codec::HEADER_LEN + 5);
        assert_eq!(&written[netcore_codec::HEADER_LEN..], b"hello");
    }

    #[test]
    fn close_is_idempotent_and_closes_transport_once() {
        let (peer, transport) = test_peer();
        peer.close();
        peer.close();

        assert_eq!(peer.state(), PeerState::Closed);
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn send_after_close_fails_with_not_connected() {
        let (peer, _transport) = test_peer();
        peer.close();

        let err = peer.send_message(b"late", 1).unwrap_err();
        assert!(matches!(err, PeerError::NotConnected));
    }

    #[test]
    fn on_read_parses_and_routes_frame() {
        let (peer, _transport) = test_peer();
        let framed = write_message(&Pool::default(), b"payload", 42).unwrap();
        peer.on_read(0, framed.bytes());

        let snapshot = peer.stats();
        assert_eq!(snapshot.bytes_read, framed.len() as u64);
    }

    struct BlockingTransport;

    impl Transport for BlockingTransport {
        fn write(&self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::WouldBlock))
        }

        fn close(&self) {}

        fn raw_fd(&self) -> Option<Fd> {
            None
        }
    }

    /// Saturates the write ring (capacity 1024) against a transport
    /// that never drains; the next `send_message` returns
    /// `WriteQueueFull` and subsequent attempts keep failing the same
    /// way, i.e. the ring is never silently grown or corrupted.
    #[test]
    fn send_fails_with_write_queue_full_once_ring_saturates() {
        let dispatcher = Arc::new(Dispatcher::new(true));
        let peer = Peer::new(1, Arc::new(BlockingTransport), None, dispatcher, Pool::default(), 1024 * 1024);

        let mut accepted = 0;
        loop {
            match peer.send_message(b"x", 1) {
                Ok(()) => {
                    accepted += 1;
                    assert!(accepted <= 2048, "ring never reported full");
                }
                Err(PeerError::WriteQueueFull) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert!(accepted >= WRITE_RING_CAPACITY - 1);
        assert!(matches!(peer.send_message(b"y", 1), Err(PeerError::WriteQueueFull)));
    }
}

impl AsyncIoHandler for Peer {
    fn on_read(&self, fd: Fd, bytes: &[u8]) {
        if self.state.get() != PeerState::Connected {
            return;
        }

        self.swap_in_pending_dispatcher();
        self.stats.record_read(bytes.len());

        let messages = {
            let mut reader = self.frame_reader.lock().unwrap();
            reader.feed(bytes)
        };

        match messages {
            Ok(messages) => {
                let dispatcher = self.dispatcher.lock().unwrap().clone();
                for msg in messages {
                    dispatcher.route(self.id, msg);
                }
            }
            Err(err) => {
                warn!(peer_id = self.id, fd, %err, "frame parse error, closing peer");
                self.close();
            }
        }
    }

    fn on_write(&self, _fd: Fd) {
        self.drain();
    }

    fn on_close(&self, _fd: Fd) {
        self.close();
    }

    fn on_error(&self, _fd: Fd, err: std::io::Error) {
        debug!(peer_id = self.id, %err, "reactor reported error");
        self.close();
    }
}
