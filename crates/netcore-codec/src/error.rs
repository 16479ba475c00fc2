use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: length {length} outside [0, {max}]")]
    MalformedFrame { length: i64, max: usize },
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
    #[error(transparent)]
    Buffer(#[from] netcore_memory::BufferError),
}
