use netcore_memory::{Buffer, CMAX, Pool};
use netcore_utils::safe_assert;

use crate::{
    error::FrameError,
    message::{HEADER_LEN, MessageHead, ZeroCopyMessage},
};

/// Streaming, zero-copy frame parser. Feed it raw bytes off the wire; it
/// hands back any number of complete [`ZeroCopyMessage`]s (zero, one, or
/// many per call).
pub struct FrameReader {
    pool: Pool,
    buffer: Buffer,
    header: Option<MessageHead>,
    max_message_length: usize,
}

impl FrameReader {
    pub fn new(pool: Pool, max_message_length: usize) -> Self {
        let buffer = pool.acquire();
        FrameReader { pool, buffer, header: None, max_message_length }
    }

    /// Appends `bytes` to the internal buffer and parses out every complete
    /// message that becomes available. An empty feed returns an empty
    /// `Vec`. A feed whose own size exceeds `max_message_length` is rejected
    /// outright without touching the reader's state.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ZeroCopyMessage>, FrameError> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        if bytes.len() > self.max_message_length {
            return Err(FrameError::MalformedFrame {
                length: bytes.len() as i64,
                max: self.max_message_length,
            });
        }

        self.append_incoming(bytes)?;

        let mut out = Vec::new();
        loop {
            if self.header.is_none() {
                if self.buffer.len() < HEADER_LEN {
                    break;
                }
                let head = MessageHead::decode(&self.buffer.bytes()[..HEADER_LEN]);
                if head.length < 0 || head.length as usize > self.max_message_length {
                    return Err(FrameError::MalformedFrame {
                        length: i64::from(head.length),
                        max: self.max_message_length,
                    });
                }
                self.header = Some(head);
            }

            let head = self.header.expect("checked above");
            let body_len = head.length as usize;
            if self.buffer.len() < HEADER_LEN + body_len {
                break;
            }

            let emitted = self.buffer.clone();
            out.push(ZeroCopyMessage { id: head.id, buffer: emitted, offset: HEADER_LEN, length: body_len });

            let consumed = HEADER_LEN + body_len;
            let total = self.buffer.len();
            safe_assert!(consumed <= total, "frame reader consumed more than buffered");
            let residue_len = total.checked_sub(consumed).ok_or(FrameError::InternalInvariant(
                "residue length underflowed buffer consumption",
            ))?;

            let mut fresh = if residue_len > 0 {
                let residue = self.buffer.bytes()[consumed..].to_vec();
                let mut fresh = self.acquire_for(residue_len)?;
                fresh.append(&residue)?;
                fresh
            } else {
                self.acquire_for(0)?
            };
            std::mem::swap(&mut self.buffer, &mut fresh);
            self.header = None;
        }
        Ok(out)
    }

    fn append_incoming(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        let needed_total = self.buffer.len() + bytes.len();
        if needed_total > CMAX {
            let mut bigger = Buffer::standalone(needed_total);
            bigger.append(self.buffer.bytes())?;
            self.buffer = bigger;
        }
        self.buffer.append(bytes)?;
        Ok(())
    }

    /// A buffer for the reader's next working set. Ordinary-size residues
    /// come from the pool; residues too large to ever fit the pool's
    /// Cmax-capped freelist get a standalone allocation sized exactly to
    /// what's needed, matching how oversized messages bypass `grow`'s
    /// ceiling entirely.
    fn acquire_for(&self, residue_len: usize) -> Result<Buffer, FrameError> {
        if residue_len > CMAX {
            Ok(Buffer::standalone(residue_len))
        } else {
            Ok(self.pool.acquire())
        }
    }
}

#[cfg(test)]
mod tests {
    use netcore_memory::Pool;

    use super::*;

    fn frame(id: i32, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN + body.len()];
        MessageHead { length: body.len() as i32, id }.encode(&mut out);
        out[HEADER_LEN..].copy_from_slice(body);
        out
    }

    #[test]
    fn feeds_single_message_in_one_shot() {
        let mut reader = FrameReader::new(Pool::default(), 1 << 20);
        let bytes = frame(7, b"hello");
        let msgs = reader.feed(&bytes).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id(), 7);
        assert_eq!(msgs[0].body(), b"hello");
    }

    #[test]
    fn feeds_message_split_across_calls() {
        let mut reader = FrameReader::new(Pool::default(), 1 << 20);
        let bytes = frame(1, b"abcdef");
        let (first, second) = bytes.split_at(5);
        assert!(reader.feed(first).unwrap().is_empty());
        let msgs = reader.feed(second).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body(), b"abcdef");
    }

    #[test]
    fn feeds_multiple_messages_in_one_buffer() {
        let mut reader = FrameReader::new(Pool::default(), 1 << 20);
        let mut bytes = frame(1, b"aa");
        bytes.extend(frame(2, b"bbb"));
        let msgs = reader.feed(&bytes).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].body(), b"aa");
        assert_eq!(msgs[1].body(), b"bbb");
    }

    #[test]
    fn empty_feed_yields_nothing() {
        let mut reader = FrameReader::new(Pool::default(), 1 << 20);
        assert!(reader.feed(&[]).unwrap().is_empty());
    }

    #[test]
    fn oversized_feed_rejected() {
        let mut reader = FrameReader::new(Pool::default(), 16);
        let err = reader.feed(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { .. }));
    }

    #[test]
    fn negative_length_rejected() {
        let mut reader = FrameReader::new(Pool::default(), 1 << 20);
        let mut bytes = vec![0u8; HEADER_LEN];
        MessageHead { length: -1, id: 0 }.encode(&mut bytes);
        let err = reader.feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { .. }));
    }

    #[test]
    fn length_above_cap_rejected() {
        let mut reader = FrameReader::new(Pool::default(), 16);
        let mut bytes = vec![0u8; HEADER_LEN];
        MessageHead { length: 100, id: 0 }.encode(&mut bytes);
        let err = reader.feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { .. }));
    }

    #[test]
    fn message_larger_than_pool_ceiling_round_trips() {
        let mut reader = FrameReader::new(Pool::default(), 4 << 20);
        let body = vec![0xABu8; 2 << 20];
        let bytes = frame(9, &body);
        let msgs = reader.feed(&bytes).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body(), body.as_slice());
    }
}
