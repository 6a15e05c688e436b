//! Byte chunk decoding.
//!
//! PTY reads land on arbitrary byte boundaries. [`ChunkDecoder`] keeps an
//! incomplete trailing UTF-8 code point, and optionally an unterminated
//! escape sequence, back until the next chunk completes it.

use crate::ansi;

/// Incremental lossy UTF-8 decoder with escape-sequence carry.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    hold_escapes: bool,
}

impl ChunkDecoder {
    /// Decoder that carries both partial code points and partial escape
    /// sequences. Used by the filtered pipeline.
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            hold_escapes: true,
        }
    }

    /// Decoder that only carries partial code points; escape sequences pass
    /// through as they arrive. Used by the raw pipeline.
    pub const fn utf8_only() -> Self {
        Self {
            pending: Vec::new(),
            hold_escapes: false,
        }
    }

    /// Decode `chunk`, prefixed by whatever was carried from the previous call.
    ///
    /// Invalid byte sequences become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.pending);
        let (mut text, rest) = decode_lossy_prefix(&bytes);
        self.pending = rest.to_vec();

        if self.hold_escapes
            && let Some(start) = ansi::incomplete_escape_start(&text)
        {
            let tail = text.split_off(start);
            self.pending.splice(0..0, tail.into_bytes());
        }
        text
    }

    /// Release everything still carried, at stream end.
    pub fn finish(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Number of bytes currently carried over.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode the longest prefix of `bytes` that is not an incomplete code point.
///
/// Returns the decoded text and the undecoded tail (at most 3 bytes).
fn decode_lossy_prefix(bytes: &[u8]) -> (String, &[u8]) {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return (out, &[]);
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        rest = &after[len..];
                    }
                    None => return (out, after),
                }
            }
        }
    }
}
