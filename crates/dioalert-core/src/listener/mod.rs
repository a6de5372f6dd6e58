//! Device ingestion listeners
//!
//! Two independent entry points feed the same [`AlertPipeline`]:
//!
//! - [`tcp`]: one task per connection, frames reassembled by [`FrameCodec`],
//!   an acknowledgement token written back per frame
//! - [`udp`]: a single receive loop, each datagram framed by
//!   [`datagram_records`], no reply
//!
//! Both stop when the shared shutdown flag flips to `true`.
//!
//! [`AlertPipeline`]: crate::engine::AlertPipeline

pub mod tcp;
pub mod udp;

use bytes::{Bytes, BytesMut};
use std::fmt;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Record terminator used by the device protocol
pub const RECORD_TERMINATOR: u8 = b'$';

/// Transport a listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Splits a device byte stream into records
///
/// A record ends at `$` or `\n`. The terminator and surrounding whitespace
/// are stripped and empty records are skipped. A record longer than
/// `max_len` is dropped, and so is a partial one that outgrows it, along with
/// everything up to its terminator.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_len: usize,
    discarding: bool,
}

impl FrameCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            discarding: false,
        }
    }

    fn terminator_position(buf: &[u8]) -> Option<usize> {
        buf.iter()
            .position(|b| *b == RECORD_TERMINATOR || *b == b'\n')
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        while let Some(pos) = Self::terminator_position(src) {
            let record = src.split_to(pos + 1);

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if pos > self.max_len {
                warn!("Discarding record of {} bytes (limit {})", pos, self.max_len);
                continue;
            }

            let body = record[..pos].trim_ascii();
            if body.is_empty() {
                continue;
            }
            return Ok(Some(Bytes::copy_from_slice(body)));
        }

        if src.len() > self.max_len {
            warn!(
                "Discarding partial record of {} bytes (limit {})",
                src.len(),
                self.max_len
            );
            src.clear();
            self.discarding = true;
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        let rest = src.split();
        if self.discarding {
            self.discarding = false;
            return Ok(None);
        }

        let body = rest.trim_ascii();
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::copy_from_slice(body)))
        }
    }
}

/// Records carried by one datagram
///
/// A datagram is framed like a stream that ends after it, so a trailing
/// terminator is stripped the same way on both transports.
pub fn datagram_records(datagram: &[u8], max_len: usize) -> Vec<Bytes> {
    let mut codec = FrameCodec::new(max_len);
    let mut buf = BytesMut::from(datagram);
    let mut records = Vec::new();

    loop {
        match codec.decode_eof(&mut buf) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => break,
            Err(e) => {
                warn!("Datagram framing failed: {}", e);
                break;
            }
        }
    }

    records
}
