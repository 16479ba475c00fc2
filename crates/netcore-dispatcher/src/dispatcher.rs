use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, select};
use netcore_codec::ZeroCopyMessage;
use tracing::warn;

use crate::event::{Event, PeerId};

const MESSAGE_MAILBOX_CAPACITY: usize = 1024;
const EVENT_MAILBOX_CAPACITY: usize = 1024;
const DEFERRED_MAILBOX_CAPACITY: usize = 64;

type MessageHandler = Box<dyn Fn(PeerId, &ZeroCopyMessage) + Send + Sync>;
type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;
type TickHandler = Box<dyn Fn() + Send + Sync>;
type Deferred = Box<dyn FnOnce() + Send>;

struct QueuedMessage {
    peer_id: PeerId,
    body: ZeroCopyMessage,
}

/// One dispatcher loop, run on its own thread. Routes inbound messages to
/// per-id handlers, out-of-band events to event handlers, one-shot deferred
/// closures, and a periodic tick — matching the original processor's
/// select-over-mailboxes loop.
pub struct Dispatcher {
    message_tx: Sender<QueuedMessage>,
    message_rx: Receiver<QueuedMessage>,
    event_tx: Sender<Event>,
    event_rx: Receiver<Event>,
    deferred_tx: Sender<Deferred>,
    deferred_rx: Receiver<Deferred>,

    handlers: RwLock<HashMap<i32, MessageHandler>>,
    fallback: RwLock<Option<MessageHandler>>,
    event_handlers: RwLock<HashMap<u32, EventHandler>>,
    tick_period: RwLock<Option<Duration>>,
    tick_handler: RwLock<Option<TickHandler>>,

    /// When true, `route` invokes the handler inline on the caller's thread
    /// (typically a reactor's reader thread) instead of enqueueing. Callers
    /// who enable this accept responsibility for handler thread-safety.
    immediate_mode: bool,
}

impl Dispatcher {
    pub fn new(immediate_mode: bool) -> Self {
        let (message_tx, message_rx) = crossbeam_channel::bounded(MESSAGE_MAILBOX_CAPACITY);
        let (event_tx, event_rx) = crossbeam_channel::bounded(EVENT_MAILBOX_CAPACITY);
        let (deferred_tx, deferred_rx) = crossbeam_channel::bounded(DEFERRED_MAILBOX_CAPACITY);
        Dispatcher {
            message_tx,
            message_rx,
            event_tx,
            event_rx,
            deferred_tx,
            deferred_rx,
            handlers: RwLock::new(HashMap::new()),
            fallback: RwLock::new(None),
            event_handlers: RwLock::new(HashMap::new()),
            tick_period: RwLock::new(None),
            tick_handler: RwLock::new(None),
            immediate_mode,
        }
    }

    pub fn immediate_mode(&self) -> bool {
        self.immediate_mode
    }

    pub fn register_handler(&self, id: i32, handler: MessageHandler) {
        self.handlers.write().unwrap().insert(id, handler);
    }

    pub fn unregister_handler(&self, id: i32) {
        self.handlers.write().unwrap().remove(&id);
    }

    pub fn set_fallback_handler(&self, handler: MessageHandler) {
        *self.fallback.write().unwrap() = Some(handler);
    }

    pub fn register_event_handler(&self, event_id: u32, handler: EventHandler) {
        self.event_handlers.write().unwrap().insert(event_id, handler);
    }

    pub fn unregister_event_handler(&self, event_id: u32) {
        self.event_handlers.write().unwrap().remove(&event_id);
    }

    pub fn set_tick(&self, period: Duration, handler: TickHandler) {
        *self.tick_period.write().unwrap() = Some(period);
        *self.tick_handler.write().unwrap() = Some(handler);
    }

    /// Routes a parsed message to its handler. When `immediate_mode` is
    /// set, runs inline on the calling thread; otherwise enqueues for the
    /// dispatcher loop. A full message mailbox drops the message and logs —
    /// backpressure here is lossy by design, to protect reader throughput.
    pub fn route(&self, peer_id: PeerId, body: ZeroCopyMessage) {
        if self.immediate_mode {
            Self::dispatch_one(&self.handlers, &self.fallback, peer_id, &body);
            return;
        }
        if self.message_tx.try_send(QueuedMessage { peer_id, body }).is_err() {
            warn!(peer_id, "message mailbox full, dropping message");
        }
    }

    pub fn submit_event(&self, event: Event) {
        if self.event_tx.try_send(event).is_err() {
            warn!(event_id = event.id, "event mailbox full, dropping event");
        }
    }

    pub fn submit_deferred(&self, f: Deferred) {
        if self.deferred_tx.try_send(f).is_err() {
            warn!("deferred mailbox full, dropping deferred closure");
        }
    }

    fn dispatch_one(
        handlers: &RwLock<HashMap<i32, MessageHandler>>,
        fallback: &RwLock<Option<MessageHandler>>,
        peer_id: PeerId,
        body: &ZeroCopyMessage,
    ) {
        let id = body.id();
        if let Some(handler) = handlers.read().unwrap().get(&id) {
            handler(peer_id, body);
            return;
        }
        if let Some(handler) = fallback.read().unwrap().as_ref() {
            handler(peer_id, body);
            return;
        }
        warn!(peer_id, id, "no handler registered, dropping message");
    }

    /// Runs the dispatcher loop on the calling thread until an `EXIT_EVENT`
    /// is received or the event mailbox's sender side is entirely dropped.
    pub fn start(&self) {
        // Built once (and only rebuilt if `tick_period` changes underneath
        // us) rather than inside the loop body: a `crossbeam_channel::tick`
        // resets its deadline to "now + period" the instant it's
        // constructed, so rebuilding it every iteration would let any
        // sustained traffic on the other mailboxes starve the tick handler
        // forever.
        let mut cached_period = *self.tick_period.read().unwrap();
        let mut tick_rx = match cached_period {
            Some(period) => crossbeam_channel::tick(period),
            None => crossbeam_channel::never(),
        };

        loop {
            let tick_period = *self.tick_period.read().unwrap();
            if tick_period != cached_period {
                cached_period = tick_period;
                tick_rx = match cached_period {
                    Some(period) => crossbeam_channel::tick(period),
                    None => crossbeam_channel::never(),
                };
            }

            select! {
                recv(self.message_rx) -> msg => {
                    if let Ok(QueuedMessage { peer_id, body }) = msg {
                        Self::dispatch_one(&self.handlers, &self.fallback, peer_id, &body);
                    }
                }
                recv(self.event_rx) -> ev => {
                    match ev {
                        Ok(event) if event.id == crate::event::EXIT_EVENT => return,
                        Ok(event) => {
                            if let Some(handler) = self.event_handlers.read().unwrap().get(&event.id) {
                                handler(&event);
                            }
                        }
                        Err(_) => return,
                    }
                }
                recv(self.deferred_rx) -> f => {
                    if let Ok(f) = f {
                        f();
                    }
                }
                recv(tick_rx) -> _ => {
                    if let Some(handler) = self.tick_handler.read().unwrap().as_ref() {
                        handler();
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.submit_event(Event::exit());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};

    use netcore_memory::Pool;

    use super::*;

    fn zero_copy_message(id: i32, body: &[u8]) -> ZeroCopyMessage {
        let writer_buf = netcore_codec::write_message(&Pool::default(), body, id).unwrap();
        let mut reader = netcore_codec::FrameReader::new(Pool::default(), 1 << 20);
        reader.feed(writer_buf.bytes()).unwrap().remove(0)
    }

    #[test]
    fn routes_to_registered_handler() {
        let dispatcher = Arc::new(Dispatcher::new(false));
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = hit.clone();
        dispatcher.register_handler(
            42,
            Box::new(move |_peer, msg| {
                assert_eq!(msg.body(), b"hi");
                hit2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let d = dispatcher.clone();
        let handle = std::thread::spawn(move || d.start());

        dispatcher.route(1, zero_copy_message(42, b"hi"));
        std::thread::sleep(std::time::Duration::from_millis(50));
        dispatcher.stop();
        handle.join().unwrap();

        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_mode_runs_inline() {
        let dispatcher = Dispatcher::new(true);
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = hit.clone();
        dispatcher.register_handler(1, Box::new(move |_peer, _msg| { hit2.fetch_add(1, Ordering::SeqCst); }));
        dispatcher.route(7, zero_copy_message(1, b"x"));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn falls_back_when_no_specific_handler() {
        let dispatcher = Dispatcher::new(true);
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = hit.clone();
        dispatcher.set_fallback_handler(Box::new(move |_peer, _msg| { hit2.fetch_add(1, Ordering::SeqCst); }));
        dispatcher.route(7, zero_copy_message(99, b"y"));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    /// Two peers concurrently sending monotonically increasing counters
    /// into one non-immediate dispatcher: each peer's delivered sequence
    /// must stay strictly increasing, even though the lossy mailbox may
    /// drop some messages under load.
    #[test]
    fn per_peer_delivery_order_is_preserved_under_concurrent_senders() {
        use std::collections::HashMap;

        let dispatcher = Arc::new(Dispatcher::new(false));
        let seen: Arc<std::sync::Mutex<HashMap<PeerId, Vec<u32>>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));

        let recorder = seen.clone();
        dispatcher.register_handler(
            1,
            Box::new(move |peer_id, msg| {
                let counter = u32::from_le_bytes(msg.body().try_into().unwrap());
                recorder.lock().unwrap().entry(peer_id).or_default().push(counter);
            }),
        );

        let d = dispatcher.clone();
        let handle = std::thread::spawn(move || d.start());

        const N: u32 = 10_000;
        let senders: Vec<_> = [1u64, 2u64]
            .into_iter()
            .map(|peer_id| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for i in 0..N {
                        dispatcher.route(peer_id, zero_copy_message(1, &i.to_le_bytes()));
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.join().unwrap();
        }

        std::thread::sleep(std::time::Duration::from_millis(500));
        dispatcher.stop();
        handle.join().unwrap();

        let snapshot = seen.lock().unwrap();
        assert_eq!(snapshot.len(), 2);
        for sequence in snapshot.values() {
            assert!(!sequence.is_empty());
            assert!(sequence.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
