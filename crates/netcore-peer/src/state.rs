use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Connected = 0,
    Closing = 1,
    Closed = 2,
}

impl PeerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PeerState::Connected,
            1 => PeerState::Closing,
            _ => PeerState::Closed,
        }
    }
}

/// Monotonic `Connected -> Closing -> Closed` state, CAS-serialized so
/// concurrent close attempts (explicit and reactor-driven) race benignly.
pub struct PeerStateCell(AtomicU8);

impl PeerStateCell {
    pub fn new() -> Self {
        PeerStateCell(AtomicU8::new(PeerState::Connected as u8))
    }

    pub fn get(&self) -> PeerState {
        PeerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempts the one-way `Connected -> Closing` transition; returns
    /// `true` only for the caller that wins the race, so "remove from
    /// reactor / emit RemoveEvent" logic runs exactly once.
    pub fn begin_closing(&self) -> bool {
        self.0
            .compare_exchange(
                PeerState::Connected as u8,
                PeerState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn finish_closed(&self) {
        self.0.store(PeerState::Closed as u8, Ordering::Release);
    }
}

impl Default for PeerStateCell {
    fn default() -> Self {
        Self::new()
    }
}
