use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

use netcore_dispatcher::{Dispatcher, PeerId};
use netcore_memory::Pool;
use netcore_peer::Peer;
use netcore_reactor::ReactorPool;
use netcore_timing::Duration;
use netcore_transport::{KcpAcceptor, TcpAcceptor, WebSocketAcceptor, connect_tcp};
use tracing::info;

use crate::error::RuntimeError;

const DEFAULT_MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// Assembles a [`ReactorPool`], buffer [`Pool`], and [`Dispatcher`] the way
/// an application would otherwise have to by hand, then hands out
/// acceptors against that shared plumbing. Every knob is an explicit
/// builder argument — no env var or config file is read here.
pub struct RuntimeBuilder {
    workers: usize,
    pin_cores: bool,
    immediate_mode: bool,
    max_message_length: usize,
    buffer_default_size: usize,
    buffer_ceiling: usize,
    tick: Option<(Duration, Box<dyn Fn() + Send + Sync>)>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        RuntimeBuilder {
            workers: 0,
            pin_cores: false,
            immediate_mode: false,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            buffer_default_size: netcore_memory::CDEFAULT,
            buffer_ceiling: netcore_memory::CMAX,
            tick: None,
        }
    }
}

impl RuntimeBuilder {
    /// `0` (the default) means one reactor per logical CPU.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn pin_cores(mut self, pin_cores: bool) -> Self {
        self.pin_cores = pin_cores;
        self
    }

    /// When set, message routing runs inline on whichever thread observed
    /// the read (typically a reactor thread) instead of being enqueued to
    /// the dispatcher's own loop.
    pub fn immediate_mode(mut self, immediate_mode: bool) -> Self {
        self.immediate_mode = immediate_mode;
        self
    }

    pub fn max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    pub fn buffer_pool_sizes(mut self, default_size: usize, ceiling: usize) -> Self {
        self.buffer_default_size = default_size;
        self.buffer_ceiling = ceiling;
        self
    }

    pub fn tick(mut self, period: Duration, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.tick = Some((period, Box::new(handler)));
        self
    }

    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let buffer_pool = Pool::new(self.buffer_default_size, self.buffer_ceiling);
        let reactor_pool = Arc::new(ReactorPool::new(self.workers, buffer_pool.clone())?);
        let dispatcher = Arc::new(Dispatcher::new(self.immediate_mode));

        if let Some((period, handler)) = self.tick {
            dispatcher.set_tick(period.into(), handler);
        }

        Ok(Runtime {
            reactor_pool,
            dispatcher,
            buffer_pool,
            max_message_length: self.max_message_length,
            pin_cores: self.pin_cores,
            background: Mutex::new(Vec::new()),
        })
    }
}

/// The application-facing assembly point: one [`ReactorPool`], one
/// [`Dispatcher`], one buffer [`Pool`], shared by every acceptor bound
/// against it. Owns no protocol logic of its own.
pub struct Runtime {
    reactor_pool: Arc<ReactorPool>,
    dispatcher: Arc<Dispatcher>,
    buffer_pool: Pool,
    max_message_length: usize,
    pin_cores: bool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn reactor_pool(&self) -> &Arc<ReactorPool> {
        &self.reactor_pool
    }

    pub fn buffer_pool(&self) -> &Pool {
        &self.buffer_pool
    }

    /// Starts one event-loop thread per reactor and the dispatcher's own
    /// loop thread. Must be called before any bound acceptor will actually
    /// make progress.
    pub fn spawn(&self) {
        self.reactor_pool.spawn(self.pin_cores);

        let dispatcher = self.dispatcher.clone();
        let handle = std::thread::Builder::new()
            .name("netcore-dispatcher".to_string())
            .spawn(move || dispatcher.start())
            .expect("failed to spawn dispatcher thread");
        self.background.lock().unwrap().push(handle);

        info!(workers = self.reactor_pool.len(), "runtime spawned");
    }

    pub fn bind_tcp(&self, addr: SocketAddr) -> Result<Arc<TcpAcceptor>, RuntimeError> {
        Ok(TcpAcceptor::bind(
            addr,
            self.reactor_pool.clone(),
            self.buffer_pool.clone(),
            self.dispatcher.clone(),
            self.max_message_length,
        )?)
    }

    /// Binds a KCP (UDP/ARQ) acceptor and spawns its demux loop on a
    /// dedicated background thread, since [`KcpAcceptor::run`] blocks.
    pub fn bind_kcp(&self, addr: SocketAddr) -> Result<Arc<KcpAcceptor>, RuntimeError> {
        let acceptor = KcpAcceptor::bind(addr, self.buffer_pool.clone(), self.dispatcher.clone(), self.max_message_length)?;
        let run_loop = acceptor.clone();
        let handle = std::thread::Builder::new()
            .name("netcore-kcp-acceptor".to_string())
            .spawn(move || run_loop.run())
            .expect("failed to spawn kcp acceptor thread");
        self.background.lock().unwrap().push(handle);
        Ok(acceptor)
    }

    /// Binds a WebSocket acceptor and spawns its accept loop on a
    /// dedicated background thread, since [`WebSocketAcceptor::run`]
    /// blocks.
    pub fn bind_websocket(&self, addr: SocketAddr) -> Result<Arc<WebSocketAcceptor>, RuntimeError> {
        let acceptor =
            WebSocketAcceptor::bind(addr, self.buffer_pool.clone(), self.dispatcher.clone(), self.max_message_length)?;
        let run_loop = acceptor.clone();
        let handle = std::thread::Builder::new()
            .name("netcore-ws-acceptor".to_string())
            .spawn(move || run_loop.run())
            .expect("failed to spawn websocket acceptor thread");
        self.background.lock().unwrap().push(handle);
        Ok(acceptor)
    }

    /// Opens a client-initiated TCP connection against the runtime's
    /// shared reactor pool and dispatcher.
    pub fn connect_tcp(&self, addr: SocketAddr, peer_id: PeerId) -> Result<Arc<Peer>, RuntimeError> {
        Ok(connect_tcp(
            addr,
            &self.reactor_pool,
            self.buffer_pool.clone(),
            self.dispatcher.clone(),
            self.max_message_length,
            peer_id,
        )?)
    }

    /// Stops the dispatcher loop and every reactor. Acceptor threads bound
    /// to listening sockets are not force-closed — dropping the runtime's
    /// last `Arc` to an acceptor is what tears its listener down.
    pub fn stop(&self) {
        self.dispatcher.stop();
        self.reactor_pool.stop_all();
    }
}
