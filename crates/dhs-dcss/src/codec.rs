//! DCSS frame codec.
//!
//! v1 frame: exactly 200 bytes of ASCII text, NUL padded.
//! v2 frame: 26-byte header (`{text_len:>12}{bin_len:>13} `), then
//! `text_len` bytes of text and `bin_len` bytes of binary payload.
//!
//! Writes follow the highest version read so far on the socket, so the
//! first frame this side sends on a new socket is always v1.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use dhs_core::TransportError;
use tokio_util::codec::{Decoder, Encoder};

pub const V1_FRAME_SIZE: usize = 200;
pub const V2_HEADER_SIZE: usize = 26;

/// Upper bound on a v2 text or binary section.
const MAX_SECTION_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for one DCSS socket.
///
/// Clones share the negotiated version, so the read and write halves of a
/// socket agree on framing. `Default` starts at v1.
#[derive(Debug, Clone)]
pub struct DcssCodec {
    version: Arc<AtomicU8>,
}

impl Default for DcssCodec {
    fn default() -> Self {
        Self {
            version: Arc::new(AtomicU8::new(1)),
        }
    }
}

impl DcssCodec {
    pub fn version(&self) -> u8 {
        self.version.load(Ordering::Acquire)
    }

    fn upgrade(&self) {
        if self.version.swap(2, Ordering::AcqRel) != 2 {
            tracing::debug!("peer speaks dcss v2, switching write framing");
        }
    }
}

/// Parse a v2 header, or `None` if the bytes do not look like one.
fn parse_header(header: &[u8]) -> Option<(usize, usize)> {
    let text = std::str::from_utf8(header).ok()?;
    let mut fields = text.split_whitespace();
    let text_len = fields.next()?;
    if !text_len.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((text_len.parse().ok()?, fields.next()?.parse().ok()?))
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !matches!(b, b'\0' | b'\r' | b'\n'))
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

impl Decoder for DcssCodec {
    type Item = String;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, TransportError> {
        if src.len() < V2_HEADER_SIZE {
            src.reserve(V2_HEADER_SIZE - src.len());
            return Ok(None);
        }

        if let Some((text_len, bin_len)) = parse_header(&src[..V2_HEADER_SIZE]) {
            for size in [text_len, bin_len] {
                if size > MAX_SECTION_SIZE {
                    return Err(TransportError::FrameTooLarge {
                        size,
                        max: MAX_SECTION_SIZE,
                    });
                }
            }
            let total = V2_HEADER_SIZE + text_len + bin_len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }
            let mut frame = src.split_to(total);
            let _header = frame.split_to(V2_HEADER_SIZE);
            let text = frame.split_to(text_len);
            if !frame.is_empty() {
                tracing::trace!(bytes = frame.len(), "ignoring binary section");
            }
            self.upgrade();

            // Writers append " \0" to the text section.
            let text = trim_padding(&text);
            let text = text.strip_suffix(&b" "[..]).unwrap_or(text);
            return Ok(Some(String::from_utf8_lossy(text).into_owned()));
        }

        if src.len() < V1_FRAME_SIZE {
            src.reserve(V1_FRAME_SIZE - src.len());
            return Ok(None);
        }
        let frame = src.split_to(V1_FRAME_SIZE);
        Ok(Some(String::from_utf8_lossy(trim_padding(&frame)).into_owned()))
    }
}

impl Encoder<String> for DcssCodec {
    type Error = TransportError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), TransportError> {
        if self.version() == 2 {
            let text = item.trim_end_matches(['\r', '\n', '\0']);
            let text_len = text.len() + 2;
            dst.reserve(V2_HEADER_SIZE + text_len);
            dst.put_slice(format!("{:>12}{:>13} ", text_len, 0).as_bytes());
            dst.put_slice(text.as_bytes());
            dst.put_slice(b" \0");
            return Ok(());
        }

        if item.len() > V1_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: item.len(),
                max: V1_FRAME_SIZE,
            });
        }
        dst.reserve(V1_FRAME_SIZE);
        dst.put_slice(item.as_bytes());
        dst.put_bytes(0, V1_FRAME_SIZE - item.len());
        Ok(())
    }
}
