//! Demultiplexer for the container engine's framed log stream.
//!
//! When a container runs without a TTY the engine interleaves stdout and
//! stderr on one connection. Each frame is an 8-byte header (stream
//! selector, three reserved bytes, payload length as a big-endian u32)
//! followed by the payload. This module owns both directions of that wire
//! format: `encode_frame` produces frames, `LogDemuxer` consumes an
//! arbitrarily chunked byte stream and republishes complete lines per
//! sub-stream.

use serde::Serialize;
use thiserror::Error;

/// Upper bound on a single frame's payload. A header that declares more
/// than this is treated as stream corruption rather than buffered.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

const HEADER_LEN: usize = 8;

/// Which sub-stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One complete log line, terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub text: String,
    pub stream: StreamKind,
}

/// Malformed frame header. Once raised, the demuxer is poisoned and emits
/// nothing further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxError {
    #[error("log frame declares {len} bytes, above the {max}-byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("unknown log stream selector {selector}")]
    UnknownStream { selector: u8 },
}

/// Encode one frame in the engine's wire format.
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> Vec<u8> {
    let selector: u8 = match stream {
        StreamKind::Stdout => 1,
        StreamKind::Stderr => 2,
    };
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(selector);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Incremental frame decoder and per-stream line assembler.
///
/// Feed raw chunks through [`push`](Self::push); complete lines are appended
/// to the caller's buffer in arrival order. Frames and lines may be split
/// across chunks at any byte boundary. Call [`finish`](Self::finish) once
/// the stream has ended to flush a non-empty final partial line; a trailing
/// line terminator never produces an empty line.
#[derive(Debug, Default)]
pub struct LogDemuxer {
    header: Vec<u8>,
    /// Stream and remaining payload bytes of the frame being read.
    frame: Option<(StreamKind, usize)>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    poisoned: Option<DemuxError>,
}

impl LogDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, appending every line completed by it to `out`.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<LogLine>) -> Result<(), DemuxError> {
        if let Some(err) = &self.poisoned {
            return Err(err.clone());
        }

        let mut rest = chunk;
        while !rest.is_empty() {
            match self.frame {
                None => {
                    let need = HEADER_LEN - self.header.len();
                    let take = need.min(rest.len());
                    self.header.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if self.header.len() == HEADER_LEN {
                        let frame = self.parse_header().inspect_err(|err| {
                            self.poisoned = Some(err.clone());
                        })?;
                        self.header.clear();
                        if frame.1 > 0 {
                            self.frame = Some(frame);
                        }
                    }
                }
                Some((stream, remaining)) => {
                    let take = remaining.min(rest.len());
                    let buf = match stream {
                        StreamKind::Stdout => &mut self.stdout,
                        StreamKind::Stderr => &mut self.stderr,
                    };
                    buf.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if take == remaining {
                        self.frame = None;
                    } else {
                        self.frame = Some((stream, remaining - take));
                    }
                    drain_lines(buf, stream, out);
                }
            }
        }
        Ok(())
    }

    /// Flush a non-empty final partial line from each sub-stream.
    pub fn finish(&mut self, out: &mut Vec<LogLine>) {
        if self.poisoned.is_some() {
            return;
        }
        for (buf, stream) in [
            (&mut self.stdout, StreamKind::Stdout),
            (&mut self.stderr, StreamKind::Stderr),
        ] {
            if !buf.is_empty() {
                out.push(make_line(buf, stream));
                buf.clear();
            }
        }
    }

    fn parse_header(&self) -> Result<(StreamKind, usize), DemuxError> {
        let stream = match self.header[0] {
            // Selector 0 is the legacy stdin marker; the engine folds it
            // into stdout.
            0 | 1 => StreamKind::Stdout,
            2 => StreamKind::Stderr,
            selector => return Err(DemuxError::UnknownStream { selector }),
        };
        let len = u32::from_be_bytes([
            self.header[4],
            self.header[5],
            self.header[6],
            self.header[7],
        ]);
        if len > MAX_FRAME_LEN {
            return Err(DemuxError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        Ok((stream, len as usize))
    }
}

fn drain_lines(buf: &mut Vec<u8>, stream: StreamKind, out: &mut Vec<LogLine>) {
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop(); // the '\n'
        out.push(make_line(&line, stream));
    }
}

fn make_line(bytes: &[u8], stream: StreamKind) -> LogLine {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    LogLine {
        text: String::from_utf8_lossy(bytes).into_owned(),
        stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(demuxer: &mut LogDemuxer, input: &[u8], chunk_size: usize) -> Vec<LogLine> {
        let mut out = Vec::new();
        for chunk in input.chunks(chunk_size.max(1)) {
            demuxer.push(chunk, &mut out).unwrap();
        }
        out
    }

    fn texts(lines: &[LogLine], stream: StreamKind) -> Vec<String> {
        lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.clone())
            .collect()
    }

    #[test]
    fn splits_stdout_and_stderr() {
        let mut input = encode_frame(StreamKind::Stdout, b"out line\n");
        input.extend(encode_frame(StreamKind::Stderr, b"err line\n"));

        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, input.len());

        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["out line"]);
        assert_eq!(texts(&lines, StreamKind::Stderr), vec!["err line"]);
    }

    #[test]
    fn chunk_invariance() {
        let mut input = encode_frame(StreamKind::Stdout, b"===> DETECTING\nnode 20.1.0\n");
        input.extend(encode_frame(StreamKind::Stderr, b"warning: "));
        input.extend(encode_frame(StreamKind::Stderr, b"no lockfile\n"));
        input.extend(encode_frame(StreamKind::Stdout, b"===> BUILDING\n"));

        let mut whole = LogDemuxer::new();
        let expected = push_all(&mut whole, &input, input.len());

        for chunk_size in 1..input.len() {
            let mut demuxer = LogDemuxer::new();
            let lines = push_all(&mut demuxer, &input, chunk_size);
            assert_eq!(lines, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn line_split_across_frames() {
        let mut input = encode_frame(StreamKind::Stdout, b"partial ");
        input.extend(encode_frame(StreamKind::Stdout, b"line\n"));

        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, input.len());
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["partial line"]);
    }

    #[test]
    fn trailing_empty_line_dropped_and_partial_flushed_by_finish() {
        let input = encode_frame(StreamKind::Stdout, b"done\nno newline");

        let mut demuxer = LogDemuxer::new();
        let mut lines = push_all(&mut demuxer, &input, input.len());
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["done"]);

        demuxer.finish(&mut lines);
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["done", "no newline"]);

        // A fully terminated stream flushes nothing further.
        let mut demuxer = LogDemuxer::new();
        let mut lines = push_all(
            &mut demuxer,
            &encode_frame(StreamKind::Stdout, b"done\n"),
            16,
        );
        demuxer.finish(&mut lines);
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["done"]);
    }

    #[test]
    fn interior_empty_lines_preserved() {
        let input = encode_frame(StreamKind::Stdout, b"a\n\nb\n");
        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, input.len());
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["a", "", "b"]);
    }

    #[test]
    fn carriage_return_stripped() {
        let input = encode_frame(StreamKind::Stdout, b"windows line\r\n");
        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, input.len());
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["windows line"]);
    }

    #[test]
    fn stdin_selector_folds_into_stdout() {
        let mut input = encode_frame(StreamKind::Stdout, b"x\n");
        input[0] = 0;
        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, input.len());
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["x"]);
    }

    #[test]
    fn oversized_frame_is_corruption() {
        let mut input = encode_frame(StreamKind::Stdout, b"");
        input[4..8].copy_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());

        let mut demuxer = LogDemuxer::new();
        let mut out = Vec::new();
        let err = demuxer.push(&input, &mut out).unwrap_err();
        assert_eq!(
            err,
            DemuxError::FrameTooLarge {
                len: MAX_FRAME_LEN + 1,
                max: MAX_FRAME_LEN,
            }
        );
    }

    #[test]
    fn unknown_selector_is_corruption() {
        let mut input = encode_frame(StreamKind::Stdout, b"x\n");
        input[0] = 9;

        let mut demuxer = LogDemuxer::new();
        let mut out = Vec::new();
        let err = demuxer.push(&input, &mut out).unwrap_err();
        assert_eq!(err, DemuxError::UnknownStream { selector: 9 });
    }

    #[test]
    fn no_lines_after_corruption() {
        let mut input = encode_frame(StreamKind::Stdout, b"before\n");
        input.extend([9u8, 0, 0, 0, 0, 0, 0, 1]);

        let mut demuxer = LogDemuxer::new();
        let mut out = Vec::new();
        assert!(demuxer.push(&input, &mut out).is_err());
        assert_eq!(texts(&out, StreamKind::Stdout), vec!["before"]);

        // Poisoned: further input is rejected, nothing more is emitted.
        let good = encode_frame(StreamKind::Stdout, b"after\n");
        assert!(demuxer.push(&good, &mut out).is_err());
        demuxer.finish(&mut out);
        assert_eq!(texts(&out, StreamKind::Stdout), vec!["before"]);
    }

    #[test]
    fn zero_length_frame_is_noop() {
        let mut input = encode_frame(StreamKind::Stdout, b"");
        input.extend(encode_frame(StreamKind::Stdout, b"after\n"));

        let mut demuxer = LogDemuxer::new();
        let lines = push_all(&mut demuxer, &input, 3);
        assert_eq!(texts(&lines, StreamKind::Stdout), vec!["after"]);
    }

    #[test]
    fn header_split_across_chunks() {
        let input = encode_frame(StreamKind::Stderr, b"split header\n");
        for split in 1..HEADER_LEN {
            let mut demuxer = LogDemuxer::new();
            let mut out = Vec::new();
            demuxer.push(&input[..split], &mut out).unwrap();
            assert!(out.is_empty());
            demuxer.push(&input[split..], &mut out).unwrap();
            assert_eq!(texts(&out, StreamKind::Stderr), vec!["split header"]);
        }
    }
}
