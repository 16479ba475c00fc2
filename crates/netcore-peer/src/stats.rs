use std::sync::atomic::{AtomicU64, Ordering};

use netcore_timing::{Nanos, global_clock};

#[derive(Default)]
pub struct PeerStats {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    last_active_ts: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct PeerStatsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub last_active_ts: Nanos,
}

impl PeerStats {
    pub fn record_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_write(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.last_active_ts.store(global_clock().now().0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            last_active_ts: Nanos(self.last_active_ts.load(Ordering::Relaxed)),
        }
    }
}
