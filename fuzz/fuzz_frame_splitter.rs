//! Fuzz target for stream frame reassembly.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_splitter
//!
//! Feeds the same byte sequence through the frame buffer whole and in
//! fuzzer-chosen pieces, for every framing mode. The two runs must
//! produce identical frames and identical leftover byte counts, and
//! neither may panic.

#![no_main]

use colloquy_core::{FrameBuffer, FramingMode};
use libfuzzer_sys::fuzz_target;

const MODES: [FramingMode; 3] = [
    FramingMode::Sse,
    FramingMode::SseSkipKeepAlive,
    FramingMode::Ndjson,
];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the chunk size, the rest is the payload.
    let chunk = (data[0] as usize).max(1);
    let payload = &data[1..];

    for mode in MODES {
        let mut whole = FrameBuffer::new(mode);
        let frames_whole: Vec<String> = whole.push(payload);

        let mut pieces = FrameBuffer::new(mode);
        let mut frames_pieces = Vec::new();
        for part in payload.chunks(chunk) {
            frames_pieces.extend(pieces.push(part));
        }

        assert_eq!(frames_whole, frames_pieces);
        assert_eq!(whole.pending(), pieces.pending());
    }
});
