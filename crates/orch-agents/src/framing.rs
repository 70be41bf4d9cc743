//! Newline framing for agent output streams.

/// Accumulates raw bytes and hands back complete lines.
///
/// Bytes after the last `\n` stay in the residual buffer until more data
/// arrives or [`LineBuffer::finish`] flushes them at end of stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    residual: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.residual.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.residual[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.residual[start..end]));
            start = end + 1;
        }
        self.residual.drain(..start);
        lines
    }

    /// Flush the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.residual.is_empty() {
            return None;
        }
        let line = decode_line(&self.residual);
        self.residual.clear();
        Some(line)
    }

    pub fn residual_len(&self) -> usize {
        self.residual.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
