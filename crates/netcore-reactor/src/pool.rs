use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use netcore_memory::Pool as BufferPool;
use netcore_utils::thread_boot;
use tracing::info;

use crate::{DefaultReactor, ReactorError, reactor::Reactor};

/// Round-robins peers across a fixed set of reactors, one per CPU by
/// default. Each reactor runs its own event loop thread; per-connection
/// state stays confined to whichever reactor the connection was assigned
/// to.
pub struct ReactorPool {
    reactors: Vec<Arc<DefaultReactor>>,
    next: AtomicUsize,
}

impl ReactorPool {
    /// `workers == 0` means "one reactor per logical CPU", mirroring the
    /// original's `NewIOReactorPool(0)` convention.
    pub fn new(workers: usize, buffer_pool: BufferPool) -> Result<Self, ReactorError> {
        let workers = if workers == 0 { num_cpus() } else { workers };
        let mut reactors = Vec::with_capacity(workers);
        for _ in 0..workers {
            reactors.push(Arc::new(DefaultReactor::new(buffer_pool.clone())?));
        }
        Ok(ReactorPool { reactors, next: AtomicUsize::new(0) })
    }

    /// Spawns one event-loop thread per reactor, pinned round-robin across
    /// cores when affinity pinning is requested.
    pub fn spawn(&self, pin_cores: bool) {
        for (i, reactor) in self.reactors.iter().cloned().enumerate() {
            let core = pin_cores.then_some(i % num_cpus());
            std::thread::Builder::new()
                .name(format!("netcore-reactor-{i}"))
                .spawn(move || {
                    thread_boot(core, netcore_utils::ThreadPriority::OSDefault);
                    info!(reactor = i, "reactor loop starting");
                    reactor.run();
                })
                .expect("failed to spawn reactor thread");
        }
    }

    /// The next reactor in round-robin order, for assigning a freshly
    /// accepted or connected peer.
    pub fn next(&self) -> Arc<DefaultReactor> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        self.reactors[i].clone()
    }

    pub fn len(&self) -> usize {
        self.reactors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reactors.is_empty()
    }

    pub fn stop_all(&self) {
        for reactor in &self.reactors {
            reactor.stop();
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}
