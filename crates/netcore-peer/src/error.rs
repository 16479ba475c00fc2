use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("peer is not connected")]
    NotConnected,
    #[error("writer queue is full")]
    WriteQueueFull,
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
    #[error(transparent)]
    Frame(#[from] netcore_codec::FrameError),
    #[error(transparent)]
    Buffer(#[from] netcore_memory::BufferError),
}

impl From<std::io::Error> for PeerError {
    fn from(e: std::io::Error) -> Self {
        PeerError::Transport(e)
    }
}
