use netcore_reactor::Fd;

/// The byte-moving side of a peer, abstracted over TCP/KCP/WebSocket so
/// `Peer` itself stays protocol-agnostic. A transport with no real `Fd`
/// (e.g. a WebSocket upgrade owned by a host HTTP server) is "virtual":
/// its writes bypass the reactor's writer drain entirely.
pub trait Transport: Send + Sync {
    /// Non-blocking write attempt. `Ok(0)` together with a non-empty `buf`
    /// means "would block" for fd-backed transports (mirroring a `write(2)`
    /// returning `EAGAIN`); virtual transports instead write the whole
    /// buffer synchronously or return an error.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    fn close(&self);

    /// `None` for virtual transports.
    fn raw_fd(&self) -> Option<Fd>;
}
