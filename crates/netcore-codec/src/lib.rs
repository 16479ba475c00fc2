mod error;
mod message;
mod reader;
mod writer;

pub use error::FrameError;
pub use message::{DEFAULT_MAX_MESSAGE_LENGTH, HEADER_LEN, MessageHead, ZeroCopyMessage};
pub use reader::FrameReader;
pub use writer::{FrameWriter, encode_into, write_message};
