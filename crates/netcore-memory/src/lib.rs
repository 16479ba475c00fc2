mod buffer;
mod error;
mod ring;

pub use buffer::{CDEFAULT, CMAX, Buffer, Pool, PoolStatsSnapshot};
pub use error::BufferError;
pub use ring::RingBuffer;
