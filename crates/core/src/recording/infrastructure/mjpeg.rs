//! Marker-level walk over a concatenated JPEG stream.
//!
//! Artifacts are plain MJPEG: every frame is a complete JPEG (SOI..EOI)
//! appended back to back. The scanner never decodes pixels; it only follows
//! segment lengths and entropy-coded data far enough to find each EOI, one
//! byte at a time, so the stream can arrive in chunks.

use std::io::{self, Read};

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

/// Result of scanning an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MjpegScan {
    /// Number of complete frames.
    pub frames: u64,
    /// Byte length of the prefix made of complete frames only.
    pub complete_len: u64,
}

impl MjpegScan {
    pub fn is_truncated(&self, total_len: u64) -> bool {
        self.complete_len < total_len
    }
}

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the 0xFF of a frame's SOI.
    FrameStart,
    /// Expecting the 0xD8 of a frame's SOI.
    FrameSoi,
    /// Expecting the 0xFF that introduces a marker.
    Marker,
    /// After at least one 0xFF; more 0xFF bytes are fill.
    MarkerCode,
    LengthHigh { sos: bool },
    LengthLow { sos: bool, high: u8 },
    Skip { remaining: usize, sos: bool },
    Entropy,
    EntropyMarker,
    /// Not an MJPEG stream past the last complete frame.
    Invalid,
}

/// Incremental scanner: feed the stream in chunks of any size, then call
/// `finish`. Memory use is constant regardless of the artifact size.
#[derive(Debug, Clone)]
pub struct MjpegScanner {
    state: State,
    offset: u64,
    result: MjpegScan,
    boundaries: Option<Vec<u64>>,
}

impl Default for MjpegScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegScanner {
    pub fn new() -> Self {
        Self {
            state: State::FrameStart,
            offset: 0,
            result: MjpegScan::default(),
            boundaries: None,
        }
    }

    /// Also records the end offset of every complete frame.
    pub fn with_boundaries() -> Self {
        Self {
            boundaries: Some(Vec::new()),
            ..Self::new()
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        let mut i = 0;
        while i < chunk.len() {
            match self.state {
                State::Invalid => {
                    self.offset += (chunk.len() - i) as u64;
                    return;
                }
                State::Skip { remaining, sos } => {
                    let step = remaining.min(chunk.len() - i);
                    i += step;
                    self.offset += step as u64;
                    self.state = after_segment(remaining - step, sos);
                }
                State::Entropy => match chunk[i..].iter().position(|&b| b == MARKER) {
                    Some(pos) => {
                        i += pos + 1;
                        self.offset += (pos + 1) as u64;
                        self.state = State::EntropyMarker;
                    }
                    None => {
                        self.offset += (chunk.len() - i) as u64;
                        return;
                    }
                },
                _ => {
                    let byte = chunk[i];
                    i += 1;
                    self.offset += 1;
                    self.step(byte);
                }
            }
        }
    }

    pub fn finish(self) -> MjpegScan {
        self.result
    }

    pub fn boundaries(&self) -> &[u64] {
        self.boundaries.as_deref().unwrap_or_default()
    }

    fn step(&mut self, byte: u8) {
        self.state = match (self.state, byte) {
            (State::FrameStart, MARKER) => State::FrameSoi,
            (State::FrameSoi, SOI) => State::Marker,
            (State::Marker, MARKER) => State::MarkerCode,
            (State::MarkerCode, MARKER) => State::MarkerCode,
            (State::MarkerCode, code) => self.marker(code),
            (State::EntropyMarker, 0x00 | RST0..=RST7) => State::Entropy,
            (State::EntropyMarker, MARKER) => State::MarkerCode,
            (State::EntropyMarker, code) => self.marker(code),
            (State::LengthHigh { sos }, high) => State::LengthLow { sos, high },
            (State::LengthLow { sos, high }, low) => {
                let len = (usize::from(high) << 8) | usize::from(low);
                if len < 2 {
                    State::Invalid
                } else {
                    after_segment(len - 2, sos)
                }
            }
            _ => State::Invalid,
        };
    }

    fn marker(&mut self, code: u8) -> State {
        match code {
            EOI => {
                self.result.frames += 1;
                self.result.complete_len = self.offset;
                if let Some(boundaries) = &mut self.boundaries {
                    boundaries.push(self.offset);
                }
                State::FrameStart
            }
            TEM | RST0..=RST7 => State::Marker,
            code => State::LengthHigh { sos: code == SOS },
        }
    }
}

fn after_segment(remaining: usize, sos: bool) -> State {
    match (remaining, sos) {
        (0, true) => State::Entropy,
        (0, false) => State::Marker,
        (remaining, sos) => State::Skip { remaining, sos },
    }
}

/// Scans a stream without holding more than one read buffer in memory.
pub fn scan_reader(mut reader: impl Read) -> io::Result<MjpegScan> {
    let mut scanner = MjpegScanner::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(scanner.finish()),
            Ok(n) => scanner.feed(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Splits a buffered stream into its complete frames, ignoring any tail.
pub fn split_frames(data: &[u8]) -> Vec<&[u8]> {
    let mut scanner = MjpegScanner::with_boundaries();
    scanner.feed(data);
    let mut start = 0;
    scanner
        .boundaries()
        .iter()
        .map(|&end| {
            let end = end as usize;
            let frame = &data[start..end];
            start = end;
            frame
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use rstest::rstest;
    use std::io::Cursor;

    fn scan(data: &[u8]) -> MjpegScan {
        let mut scanner = MjpegScanner::new();
        scanner.feed(data);
        scanner.finish()
    }

    fn jpeg(seed: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(32, 24, |x, y| {
            Rgb([(x as u8).wrapping_mul(seed), (y as u8).wrapping_add(seed), seed])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_empty_stream() {
        assert_eq!(scan(&[]), MjpegScan::default());
    }

    #[test]
    fn test_counts_concatenated_frames() {
        let mut stream = Vec::new();
        for seed in 1..=5 {
            stream.extend(jpeg(seed * 40));
        }

        let result = scan(&stream);

        assert_eq!(result.frames, 5);
        assert_eq!(result.complete_len, stream.len() as u64);
        assert!(!result.is_truncated(stream.len() as u64));
    }

    #[test]
    fn test_truncated_tail_is_excluded() {
        let first = jpeg(10);
        let second = jpeg(200);
        let mut stream = first.clone();
        stream.extend(&second[..second.len() / 2]);

        let result = scan(&stream);

        assert_eq!(result.frames, 1);
        assert_eq!(result.complete_len, first.len() as u64);
        assert!(result.is_truncated(stream.len() as u64));
    }

    #[test]
    fn test_garbage_prefix_yields_nothing() {
        let mut stream = b"not a jpeg".to_vec();
        stream.extend(jpeg(3));
        assert_eq!(scan(&stream).frames, 0);
    }

    #[test]
    fn test_stuffed_bytes_and_restart_markers_in_scan_data() {
        // Minimal hand-built frame: SOI, SOS with 2-byte header, entropy data
        // containing FF00 and RST3, then EOI.
        let frame = [
            0xFF, 0xD8, // SOI
            0xFF, 0xDA, 0x00, 0x02, // SOS, empty header
            0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD3, 0x56, // data
            0xFF, 0xD9, // EOI
        ];
        let mut stream = frame.to_vec();
        stream.extend(frame);

        let result = scan(&stream);

        assert_eq!(result.frames, 2);
        assert_eq!(result.complete_len, stream.len() as u64);
    }

    #[test]
    fn test_fill_bytes_before_marker_code() {
        let frame = [
            0xFF, 0xD8, 0xFF, 0xFF, 0xFF, 0xE0, 0x00, 0x04, 0xAA, 0xBB, 0xFF, 0xDA, 0x00, 0x02,
            0x01, 0xFF, 0xFF, 0xD9,
        ];
        let result = scan(&frame);
        assert_eq!(result.frames, 1);
        assert_eq!(result.complete_len, frame.len() as u64);
    }

    #[test]
    fn test_bad_segment_length_stops_scan() {
        let mut stream = jpeg(5);
        stream.extend([0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x01, 0xFF, 0xD9]);
        stream.extend(jpeg(6));

        let result = scan(&stream);

        assert_eq!(result.frames, 1);
        assert_eq!(result.complete_len, jpeg(5).len() as u64);
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(4096)]
    fn test_chunked_feed_matches_whole_buffer(#[case] chunk: usize) {
        let mut stream = Vec::new();
        for seed in 1..=4 {
            stream.extend(jpeg(seed * 50));
        }
        stream.extend(&jpeg(9)[..100]);

        let mut scanner = MjpegScanner::new();
        for piece in stream.chunks(chunk) {
            scanner.feed(piece);
        }

        assert_eq!(scanner.finish(), scan(&stream));
        assert_eq!(scan(&stream).frames, 4);
    }

    #[test]
    fn test_scan_reader_uses_small_reads() {
        struct Dribble<'a>(&'a [u8]);

        impl Read for Dribble<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = buf.len().min(self.0.len()).min(3);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let mut stream = jpeg(11);
        stream.extend(jpeg(12));

        let result = scan_reader(Dribble(&stream)).unwrap();

        assert_eq!(result.frames, 2);
        assert_eq!(result.complete_len, stream.len() as u64);
    }

    #[test]
    fn test_split_frames_returns_each_jpeg() {
        let first = jpeg(20);
        let second = jpeg(30);
        let mut stream = first.clone();
        stream.extend(&second);
        stream.extend(&first[..10]);

        let frames = split_frames(&stream);

        assert_eq!(frames, vec![first.as_slice(), second.as_slice()]);
    }
}
