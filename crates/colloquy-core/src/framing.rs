//! Stream frame reassembly.
//!
//! HTTP chunk boundaries are arbitrary: one read can deliver half a frame
//! or three and a half, and a multi-byte UTF-8 sequence can land split
//! across two reads. [`FrameBuffer`] owns the bytes between reads and
//! yields only complete frame payloads, so parsing never sees a partial
//! frame and the emitted payloads are identical for every possible
//! chunking of the same byte stream.

/// How the active provider delimits frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// Server-sent event blocks: frames end at a blank line (`\n\n`), a
    /// leading `data:` label is stripped, and the `[DONE]` terminator is
    /// discarded.
    Sse,

    /// Like [`Sse`], additionally discarding payloads that are empty
    /// after trimming. Gateways send those as keep-alives.
    ///
    /// [`Sse`]: FramingMode::Sse
    SseSkipKeepAlive,

    /// Newline-delimited JSON: frames end at `\n`, no label, blank lines
    /// discarded.
    Ndjson,
}

impl FramingMode {
    fn separator(self) -> &'static [u8] {
        match self {
            FramingMode::Sse | FramingMode::SseSkipKeepAlive => b"\n\n",
            FramingMode::Ndjson => b"\n",
        }
    }
}

/// Reassembles wire chunks into complete frame payloads.
///
/// One buffer lives per in-flight request and is dropped with it; leftover
/// partial bytes at end of stream are discarded, never parsed.
#[derive(Debug)]
pub struct FrameBuffer {
    mode: FramingMode,
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buf: Vec::new(),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and drain every complete frame payload it unlocks.
    ///
    /// Frames are converted to text only once complete, so a UTF-8
    /// sequence split across chunks is reassembled before decoding.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let sep = self.mode.separator();
        let mut out = Vec::new();
        while let Some(idx) = find_subslice(&self.buf, sep) {
            let frame: Vec<u8> = self.buf.drain(..idx + sep.len()).collect();
            let text = String::from_utf8_lossy(&frame[..idx]);
            if let Some(payload) = self.extract_payload(&text) {
                out.push(payload);
            }
        }
        out
    }

    /// Reduce a raw frame to its payload, or discard it.
    fn extract_payload(&self, frame: &str) -> Option<String> {
        match self.mode {
            FramingMode::Sse | FramingMode::SseSkipKeepAlive => {
                let trimmed = frame.trim();
                // SSE allows both "data: x" and "data:x".
                let payload = trimmed
                    .strip_prefix("data: ")
                    .or_else(|| trimmed.strip_prefix("data:"))
                    .unwrap_or(trimmed)
                    .trim();
                if payload == "[DONE]" {
                    return None;
                }
                if payload.is_empty() && self.mode == FramingMode::SseSkipKeepAlive {
                    return None;
                }
                Some(payload.to_string())
            }
            FramingMode::Ndjson => {
                let trimmed = frame.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
