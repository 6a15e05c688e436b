//! Incremental line reassembly.

/// Default bound on the unterminated carry, in bytes.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a text stream into lines regardless of how it was chunked.
///
/// Text after the last `\n` of a feed is carried and becomes the prefix of
/// the next line. A carry that grows past `max_line_bytes` is emitted as a
/// line of its own.
#[derive(Debug)]
pub struct LineSplitter {
    carry: String,
    max_line_bytes: usize,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    /// Create a splitter. `max_line_bytes == 0` disables the carry bound.
    pub const fn new(max_line_bytes: usize) -> Self {
        Self {
            carry: String::new(),
            max_line_bytes,
        }
    }

    /// Feed text and return every line it completes.
    pub fn feed(&mut self, text: &str) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = text;
        while let Some(idx) = rest.find('\n') {
            self.carry.push_str(&rest[..idx]);
            lines.push(std::mem::take(&mut self.carry));
            rest = &rest[idx + 1..];
        }
        self.carry.push_str(rest);

        if self.max_line_bytes > 0 {
            while self.carry.len() > self.max_line_bytes {
                let cut = split_point(&self.carry, self.max_line_bytes);
                let tail = self.carry.split_off(cut);
                lines.push(std::mem::replace(&mut self.carry, tail));
            }
        }
        lines
    }

    /// Emit the unterminated remainder, at stream end.
    pub fn flush_remainder(&mut self) -> Option<String> {
        (!self.carry.is_empty()).then(|| std::mem::take(&mut self.carry))
    }

    /// Bytes currently carried.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }
}

/// Largest char boundary `<= max`, but never zero for a non-empty string.
fn split_point(s: &str, max: usize) -> usize {
    let mut cut = max.min(s.len());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == 0 {
        cut = s.chars().next().map_or(s.len(), char::len_utf8);
    }
    cut
}
