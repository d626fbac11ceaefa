use bridge_core::StreamEvent;
use bytes::{Buf, BytesMut};

/// Incremental decoder for NDJSON turn bodies.
///
/// Chunks may end anywhere, including inside a line or a UTF-8 sequence;
/// only complete lines are decoded.
#[derive(Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<serde_json::Result<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left once the body ended
    pub fn finish(&mut self) -> Option<serde_json::Result<StreamEvent>> {
        let rest = self.buffer.split();
        decode_line(&rest)
    }
}

fn decode_line(line: &[u8]) -> Option<serde_json::Result<StreamEvent>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(serde_json::from_slice(line))
}
