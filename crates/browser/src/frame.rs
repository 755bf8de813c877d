//! Incremental JSON-RPC frame extraction.
//!
//! Responses arrive on a byte stream in arbitrary chunks and may be very
//! large (screenshots travel as embedded base64). The decoder accumulates
//! bytes and extracts one complete JSON object at a time using two
//! strategies:
//!
//! 1. **Line-oriented**: when the buffer ends in a newline or closing
//!    brace, each complete line is tried as standalone JSON. Cheap for the
//!    small control messages that dominate traffic.
//! 2. **Brace-matching**: above [`LARGE_PAYLOAD_THRESHOLD`] the buffer is
//!    scanned from the `{"jsonrpc"` anchor, tracking nested brace depth with
//!    in-string and escape state, to find the exact end of one object.
//!    Embedded braces inside quoted payloads never terminate extraction
//!    early. The scan position and depth/string/escape flags persist across
//!    chunks, so each byte of a large payload is visited once.
//!
//! The decoder is pure state over a buffer and is tested in isolation from
//! any process I/O.

const LARGE_PAYLOAD_THRESHOLD: usize = 100 * 1024;
const ANCHOR: &[u8] = b"{\"jsonrpc\"";

/// Resumable brace-matching state. Offsets index into the decoder buffer
/// and are reset whenever consumed bytes are drained.
#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    /// Offset of the `{"jsonrpc"` anchor, once located.
    start: Option<usize>,
    /// Next unscanned byte.
    pos: usize,
    depth: i64,
    in_string: bool,
    escaped: bool,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    scan: ScanState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently accumulated (diagnostic only).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete JSON object, consuming it (and any leading
    /// non-JSON noise) from the buffer. Returns `None` until a full object
    /// has arrived.
    pub fn try_extract(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }

        // Large buffers must not be line-split: the payload may contain no
        // newline at all, and per-line re-parsing of a half-megabyte prefix
        // on every chunk would be quadratic.
        if self.buf.len() > LARGE_PAYLOAD_THRESHOLD {
            if let Some(frame) = self.extract_by_braces() {
                return Some(frame);
            }
        }

        let last = *self.buf.last()?;
        if last != b'\n' && last != b'}' {
            return None;
        }

        if let Some(frame) = self.extract_by_lines() {
            return Some(frame);
        }

        // A buffer that ends on a brace but is not line-splittable (noise
        // glued to the object, no trailing newline) still yields to the
        // anchor scan.
        self.extract_by_braces()
    }

    fn extract_by_lines(&mut self) -> Option<String> {
        let text = std::str::from_utf8(&self.buf).ok()?;

        let mut offset = 0usize;
        for line in text.split_inclusive('\n') {
            let end = offset + line.len();
            let trimmed = line.trim();
            if trimmed.starts_with('{')
                && trimmed.ends_with('}')
                && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
            {
                let frame = trimmed.to_string();
                self.consume(end);
                return Some(frame);
            }
            offset = end;
        }
        None
    }

    /// Resume the depth/string/escape walk from where the previous chunk
    /// left off; emit the object once depth returns to zero.
    fn extract_by_braces(&mut self) -> Option<String> {
        if self.scan.start.is_none() {
            let start = find_subsequence(&self.buf, ANCHOR)?;
            self.scan = ScanState {
                start: Some(start),
                pos: start,
                depth: 0,
                in_string: false,
                escaped: false,
            };
        }
        let start = self.scan.start?;

        while self.scan.pos < self.buf.len() {
            let b = self.buf[self.scan.pos];
            let i = self.scan.pos;
            self.scan.pos += 1;

            if self.scan.escaped {
                self.scan.escaped = false;
                continue;
            }
            match b {
                b'\\' if self.scan.in_string => self.scan.escaped = true,
                b'"' => self.scan.in_string = !self.scan.in_string,
                b'{' if !self.scan.in_string => self.scan.depth += 1,
                b'}' if !self.scan.in_string => {
                    self.scan.depth -= 1;
                    if self.scan.depth == 0 {
                        let end = i + 1;
                        let frame =
                            String::from_utf8_lossy(&self.buf[start..end]).into_owned();
                        self.consume(end);
                        if serde_json::from_str::<serde_json::Value>(&frame).is_ok() {
                            return Some(frame);
                        }
                        // Balanced but unparseable: drop it and let the
                        // caller keep reading.
                        return None;
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn consume(&mut self, end: usize) {
        self.buf.drain(..end);
        self.scan = ScanState::default();
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
