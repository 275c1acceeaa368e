// src/io/serial/framer.rs
//
// CRLF line framing for the MONOSTICK ASCII output.
// Bytes are buffered until a terminator arrives; the unterminated tail is kept
// for the next read.

/// Line terminator used by the MONOSTICK
pub const CRLF: &[u8] = b"\r\n";

/// Default cap on buffered bytes without a terminator
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 4096;

// =============================================================================
// Types
// =============================================================================

/// Output of a single `feed` call, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerOutput {
    /// Complete frame with the terminator stripped
    Frame(Vec<u8>),
    /// The buffer grew past `max_length` without a terminator and was discarded
    Overflow { discarded: usize },
}

// =============================================================================
// Line Framer
// =============================================================================

/// Stateful CRLF framer.
///
/// Invariant: `buffer` holds exactly the bytes after the last terminator seen,
/// so it never contains a complete terminator between calls.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::with_capacity(256),
            max_length,
        }
    }

    /// Feed raw bytes into the framer.
    /// Returns every frame completed by this chunk, in arrival order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FramerOutput> {
        let mut frames = Vec::new();
        if data.is_empty() {
            return frames;
        }

        // A terminator may straddle the previous tail and the new chunk
        let mut search_from = self.buffer.len().saturating_sub(CRLF.len() - 1);
        self.buffer.extend_from_slice(data);

        let mut frame_start = 0;
        while let Some(offset) = find_terminator(&self.buffer[search_from..]) {
            let frame_end = search_from + offset;
            frames.push(FramerOutput::Frame(
                self.buffer[frame_start..frame_end].to_vec(),
            ));
            frame_start = frame_end + CRLF.len();
            search_from = frame_start;
        }

        if frame_start > 0 {
            self.buffer.drain(..frame_start);
        }

        if self.buffer.len() > self.max_length {
            let discarded = self.buffer.len();
            self.buffer.clear();
            frames.push(FramerOutput::Overflow { discarded });
        }

        frames
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|window| window == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames_of(outputs: Vec<FramerOutput>) -> Vec<Vec<u8>> {
        outputs
            .into_iter()
            .map(|output| match output {
                FramerOutput::Frame(bytes) => bytes,
                FramerOutput::Overflow { discarded } => {
                    panic!("unexpected overflow of {} bytes", discarded)
                }
            })
            .collect()
    }

    #[test]
    fn test_line_framing() {
        let mut framer = LineFramer::default();

        let frames = frames_of(framer.feed(b";1;2;\r\n;;\r\n;3;"));

        assert_eq!(frames, vec![b";1;2;".to_vec(), b";;".to_vec()]);
        assert_eq!(framer.pending(), b";3;");
    }

    #[test]
    fn test_no_terminator_retains_buffer() {
        let mut framer = LineFramer::default();

        assert!(framer.feed(b";1;2;3").is_empty());
        assert_eq!(framer.pending(), b";1;2;3");

        let frames = frames_of(framer.feed(b";\r\n"));
        assert_eq!(frames, vec![b";1;2;3;".to_vec()]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_terminator_split_across_reads() {
        let mut framer = LineFramer::default();

        assert!(framer.feed(b";a;\r").is_empty());
        let frames = frames_of(framer.feed(b"\n;b;\r"));
        assert_eq!(frames, vec![b";a;".to_vec()]);

        let frames = frames_of(framer.feed(b"\n"));
        assert_eq!(frames, vec![b";b;".to_vec()]);
    }

    #[test]
    fn test_empty_segments_are_emitted() {
        let mut framer = LineFramer::default();

        let frames = frames_of(framer.feed(b"\r\n\r\n"));

        assert_eq!(frames, vec![Vec::<u8>::new(), Vec::new()]);
    }

    #[test]
    fn test_zero_length_read_is_noop() {
        let mut framer = LineFramer::default();
        framer.feed(b";partial");

        assert!(framer.feed(b"").is_empty());
        assert_eq!(framer.pending(), b";partial");
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut framer = LineFramer::new(8);

        let outputs = framer.feed(b"0123456789");
        assert_eq!(outputs, vec![FramerOutput::Overflow { discarded: 10 }]);
        assert!(framer.pending().is_empty());

        // Framing resumes cleanly afterwards
        let frames = frames_of(framer.feed(b";ok;\r\n"));
        assert_eq!(frames, vec![b";ok;".to_vec()]);
    }

    #[test]
    fn test_overflow_only_counts_unterminated_tail() {
        let mut framer = LineFramer::new(8);

        // Long input, but every frame is terminated before the cap matters
        let frames = frames_of(framer.feed(b";0123456789;\r\n;abc;"));
        assert_eq!(frames, vec![b";0123456789;".to_vec()]);
        assert_eq!(framer.pending(), b";abc;");
    }

    proptest! {
        #[test]
        fn test_chunk_boundary_invariance(
            lines in proptest::collection::vec("[;0-9A-F\\-]{0,40}", 0..12),
            tail in "[;0-9]{0,10}",
            cuts in proptest::collection::vec(any::<usize>(), 0..16),
        ) {
            let mut stream = Vec::new();
            for line in &lines {
                stream.extend_from_slice(line.as_bytes());
                stream.extend_from_slice(CRLF);
            }
            stream.extend_from_slice(tail.as_bytes());

            let mut whole = LineFramer::new(usize::MAX);
            let expected = frames_of(whole.feed(&stream));

            let mut boundaries: Vec<usize> = cuts
                .iter()
                .map(|cut| if stream.is_empty() { 0 } else { cut % stream.len() })
                .collect();
            boundaries.push(0);
            boundaries.push(stream.len());
            boundaries.sort_unstable();
            boundaries.dedup();

            let mut chunked = LineFramer::new(usize::MAX);
            let mut actual = Vec::new();
            for pair in boundaries.windows(2) {
                actual.extend(frames_of(chunked.feed(&stream[pair[0]..pair[1]])));
            }

            prop_assert_eq!(&actual, &expected);
            prop_assert_eq!(actual.len(), lines.len());
            prop_assert_eq!(chunked.pending(), whole.pending());
        }
    }
}
