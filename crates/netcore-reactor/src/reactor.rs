use std::sync::Arc;

use crate::{Fd, Interest, ReactorError, handler::AsyncIoHandler};

/// One readiness-I/O event loop. `add`/`modify`/`remove` register interest
/// in a file descriptor; `run` blocks the calling thread delivering
/// readiness callbacks until `stop` is called. Implemented once per
/// platform (epoll on Linux, kqueue on macOS, an IOCP completion-to-
/// readiness adapter on Windows).
pub trait Reactor: Send + Sync {
    fn add(&self, fd: Fd, interest: Interest, handler: Arc<dyn AsyncIoHandler>) -> Result<(), ReactorError>;
    fn modify(&self, fd: Fd, interest: Interest) -> Result<(), ReactorError>;
    fn remove(&self, fd: Fd) -> Result<(), ReactorError>;

    /// Runs the event loop on the calling thread. Returns once `stop` has
    /// been called and at most one more multiplexer timeout has elapsed.
    fn run(&self);

    fn stop(&self);

    fn close(&self) -> Result<(), ReactorError>;
}

/// Multiplexer block timeout. Bounds how promptly `stop()` is observed.
pub const POLL_TIMEOUT_MS: i32 = 100;
