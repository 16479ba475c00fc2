use bitflags::bitflags;

bitflags! {
    /// Readiness interest registered for a file descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

impl Interest {
    pub const READ_WRITE: Interest = Interest::READ.union(Interest::WRITE);
}
