use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("grow by {requested} from capacity {capacity} would exceed the {ceiling}-byte ceiling")]
    InsufficientSize { capacity: usize, requested: usize, ceiling: usize },
    #[error("requested capacity {capacity} exceeds the {ceiling}-byte ceiling")]
    CeilingExceeded { capacity: usize, ceiling: usize },
}
