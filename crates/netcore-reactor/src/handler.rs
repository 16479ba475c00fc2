use crate::Fd;

/// Callbacks a reactor delivers for one registered file descriptor. Never
/// blocks and never panics across the reactor boundary — implementations
/// route failures into peer state transitions instead.
pub trait AsyncIoHandler: Send + Sync {
    fn on_read(&self, fd: Fd, bytes: &[u8]);
    fn on_write(&self, fd: Fd);
    fn on_close(&self, fd: Fd);
    fn on_error(&self, fd: Fd, err: std::io::Error);
}
