//! Multipart MJPEG frame extraction
//!
//! Parses an unbounded multipart HTTP body into discrete JPEG frames.
//! Each part is delimited by a boundary token announced in the response
//! content-type. Parts that declare a `Content-Length` take a fast
//! exact-read path; parts without one (or with an unreliable one) fall
//! back to scanning for the JPEG SOI/EOI markers. Malformed parts are
//! dropped and the extractor resynchronizes at the next boundary instead
//! of failing the whole stream.

use camview_core::{Error, Frame, Result, StreamConfig};
use std::io::{BufReader, Read};
use tracing::{debug, trace, warn};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Longest header line accepted within a part
const MAX_HEADER_LINE: usize = 1024;
/// Most header lines accepted within a part
const MAX_HEADER_LINES: usize = 32;

/// Outcome of reading a single part's body
enum PartError {
    /// Part is broken but the stream may recover at the next boundary
    Malformed(String),
    /// The underlying stream failed; terminal for the whole sequence
    Io(std::io::Error),
}

impl From<std::io::Error> for PartError {
    fn from(e: std::io::Error) -> Self {
        PartError::Io(e)
    }
}

/// Pulls complete JPEG frames out of a multipart byte stream.
///
/// Generic over any blocking byte source; the session feeds it an HTTP
/// response body, tests feed it a `Cursor`.
pub struct FrameExtractor<R: Read> {
    reader: BufReader<R>,
    /// Bare boundary token, leading dashes stripped
    boundary: Vec<u8>,
    max_frame_size: usize,
    resync_retry_limit: u32,
    sequence: u64,
    /// Set when a recovery scan already consumed the next boundary token
    at_boundary: bool,
    /// Terminal error already surfaced; iterator is exhausted
    finished: bool,
}

impl<R: Read> FrameExtractor<R> {
    /// Create an extractor for the given byte source and boundary token.
    ///
    /// The token may be passed with or without its leading dashes; both
    /// forms synchronize against the same stream.
    pub fn new(source: R, boundary: &str, max_frame_size: usize, resync_retry_limit: u32) -> Self {
        let token = boundary.trim().trim_matches('"').trim_start_matches('-');
        Self {
            reader: BufReader::with_capacity(64 * 1024, source),
            boundary: token.as_bytes().to_vec(),
            max_frame_size,
            resync_retry_limit,
            sequence: 0,
            at_boundary: false,
            finished: false,
        }
    }

    /// Create an extractor with the limits carried in a [`StreamConfig`]
    pub fn with_config(source: R, boundary: &str, config: &StreamConfig) -> Self {
        Self::new(source, boundary, config.max_frame_size, config.resync_retry_limit)
    }

    /// Read the next complete JPEG frame.
    ///
    /// Malformed parts are discarded and the extractor resynchronizes at
    /// the next boundary, up to `resync_retry_limit` consecutive times;
    /// past that the sequence terminates with a protocol error. I/O
    /// failures are always terminal.
    pub fn next_frame(&mut self) -> Result<Frame> {
        let mut failures = 0u32;
        loop {
            self.seek_boundary()?;
            match self.read_part() {
                Ok(data) => {
                    let frame = Frame::new(data, self.sequence);
                    self.sequence += 1;
                    trace!("extracted frame {} ({} bytes)", frame.sequence, frame.size());
                    return Ok(frame);
                }
                Err(PartError::Malformed(reason)) => {
                    failures += 1;
                    warn!(
                        "dropping malformed part ({}), resync {}/{}",
                        reason, failures, self.resync_retry_limit
                    );
                    if failures >= self.resync_retry_limit {
                        self.finished = true;
                        return Err(Error::Protocol(format!(
                            "gave up after {} consecutive resync failures: {}",
                            failures, reason
                        )));
                    }
                }
                Err(PartError::Io(e)) => {
                    self.finished = true;
                    return Err(e.into());
                }
            }
        }
    }

    /// Scan forward until the boundary token has been consumed, then skip
    /// the remainder of the boundary line.
    fn seek_boundary(&mut self) -> Result<()> {
        if self.at_boundary {
            // a recovery scan already matched the token
            self.at_boundary = false;
        } else {
            // generous bound: a full frame of unsynchronized data may sit
            // between us and the next boundary
            let limit = self.max_frame_size + 4096;
            // windowed tail match; a prefix-restart matcher would miss
            // tokens with self-overlapping prefixes
            let keep = self.boundary.len() + 2;
            let mut tail: Vec<u8> = Vec::with_capacity(keep * 2);
            let mut scanned = 0usize;
            loop {
                if scanned >= limit {
                    self.finished = true;
                    return Err(Error::Protocol(format!(
                        "boundary not found within {} bytes",
                        limit
                    )));
                }
                let b = self.read_u8().map_err(|e| {
                    self.finished = true;
                    Error::Io(e)
                })?;
                scanned += 1;
                tail.push(b);
                if tail.ends_with(&self.boundary) {
                    break;
                }
                if tail.len() > keep * 2 {
                    tail.drain(..keep);
                }
            }
        }
        self.skip_line()?;
        Ok(())
    }

    /// Read one part after its boundary: headers, then body
    fn read_part(&mut self) -> std::result::Result<Vec<u8>, PartError> {
        let content_length = self.read_part_headers()?;
        match content_length {
            Some(len) => {
                if len == 0 || len > self.max_frame_size {
                    return Err(PartError::Malformed(format!(
                        "declared content-length {} outside (0, {}]",
                        len, self.max_frame_size
                    )));
                }
                let mut buf = vec![0u8; len];
                self.reader.read_exact(&mut buf)?;
                if buf.starts_with(&SOI) && buf.ends_with(&EOI) {
                    return Ok(buf);
                }
                // declared length was wrong; fall back to marker bounds
                debug!("content-length {} unreliable, rescanning for JPEG markers", len);
                self.recover_with_markers(buf)
            }
            None => self.recover_with_markers(Vec::new()),
        }
    }

    /// Bound a frame by its SOI/EOI markers, starting from bytes already
    /// read (possibly empty) and continuing on the stream as needed.
    ///
    /// If the boundary token shows up before EOI the part is truncated:
    /// the token is remembered so the caller does not skip the following
    /// part while resynchronizing.
    fn recover_with_markers(
        &mut self,
        pending: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, PartError> {
        let mut data = match find(&pending, &SOI) {
            Some(i) => pending[i..].to_vec(),
            None => {
                if !pending.is_empty() && find(&pending, &self.boundary).is_some() {
                    return Err(PartError::Malformed("no SOI before next boundary".into()));
                }
                self.scan_for_soi()?;
                SOI.to_vec()
            }
        };

        // EOI may already sit inside the buffered bytes
        if data.len() > 2 {
            if let Some(j) = find(&data[2..], &EOI) {
                data.truncate(2 + j + 2);
                return Ok(data);
            }
            if find(&data[2..], &self.boundary).is_some() {
                // boundary consumed out of the buffer; anything after it
                // is lost, resync at the one that follows
                return Err(PartError::Malformed("boundary before EOI".into()));
            }
        }

        loop {
            if data.len() >= self.max_frame_size {
                return Err(PartError::Malformed(format!(
                    "no EOI within {} byte cap",
                    self.max_frame_size
                )));
            }
            let b = self.read_u8()?;
            data.push(b);
            if data.ends_with(&EOI) {
                return Ok(data);
            }
            if data.ends_with(&self.boundary) {
                self.at_boundary = true;
                return Err(PartError::Malformed("boundary before EOI".into()));
            }
        }
    }

    /// Discard bytes until an SOI marker has been consumed
    fn scan_for_soi(&mut self) -> std::result::Result<(), PartError> {
        let keep = self.boundary.len().max(2) + 2;
        let mut tail: Vec<u8> = Vec::with_capacity(keep * 2);
        let mut scanned = 0usize;
        loop {
            if scanned >= self.max_frame_size {
                return Err(PartError::Malformed(format!(
                    "no SOI within {} byte cap",
                    self.max_frame_size
                )));
            }
            let b = self.read_u8()?;
            scanned += 1;
            tail.push(b);
            if tail.ends_with(&SOI) {
                return Ok(());
            }
            if tail.ends_with(&self.boundary) {
                self.at_boundary = true;
                return Err(PartError::Malformed("no SOI before next boundary".into()));
            }
            if tail.len() > keep * 2 {
                tail.drain(..keep);
            }
        }
    }

    /// Read part header lines until the blank separator, returning any
    /// parsed content-length
    fn read_part_headers(&mut self) -> std::result::Result<Option<usize>, PartError> {
        let mut content_length = None;
        for _ in 0..MAX_HEADER_LINES {
            let line = self.read_line()?;
            if line.is_empty() {
                return Ok(content_length);
            }
            if let Some((name, value)) = split_header(&line) {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
        }
        Err(PartError::Malformed("part headers never ended".into()))
    }

    /// Read one header line, LF-terminated, CR stripped
    fn read_line(&mut self) -> std::result::Result<String, PartError> {
        let mut line = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == b'\n' {
                break;
            }
            if b != b'\r' {
                line.push(b);
            }
            if line.len() > MAX_HEADER_LINE {
                return Err(PartError::Malformed("header line too long".into()));
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Consume the rest of the current line (the tail of a boundary line)
    fn skip_line(&mut self) -> Result<()> {
        for _ in 0..MAX_HEADER_LINE {
            if self.read_u8()? == b'\n' {
                return Ok(());
            }
        }
        self.finished = true;
        Err(Error::Protocol("boundary line never ended".into()))
    }

    fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut b = [0u8; 1];
        self.reader.read_exact(&mut b)?;
        Ok(b[0])
    }
}

/// Frames as a lazy sequence; a terminal error is yielded once, then the
/// iterator is exhausted.
impl<R: Read> Iterator for FrameExtractor<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        Some(self.next_frame())
    }
}

/// First occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a `Name: value` header line
fn split_header(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    Some((line[..idx].trim(), line[idx + 1..].trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const BOUNDARY: &str = "frameboundary";

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    fn part(body: &[u8], declared_len: Option<usize>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n");
        if let Some(len) = declared_len {
            out.extend_from_slice(format!("Content-Length: {}\r\n", len).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn extractor(stream: Vec<u8>) -> FrameExtractor<Cursor<Vec<u8>>> {
        FrameExtractor::new(Cursor::new(stream), BOUNDARY, 1024 * 1024, 3)
    }

    #[test]
    fn test_yields_all_parts_in_order() {
        let frames: Vec<Vec<u8>> = (0u8..5)
            .map(|i| fake_jpeg(&[i, i, i, i]))
            .collect();
        let mut stream = Vec::new();
        for f in &frames {
            stream.extend_from_slice(&part(f, Some(f.len())));
        }

        let mut ex = extractor(stream);
        for (i, expected) in frames.iter().enumerate() {
            let frame = ex.next_frame().expect("frame should extract");
            assert_eq!(frame.sequence, i as u64);
            assert_eq!(frame.data(), expected.as_slice());
        }
        // stream ends: terminal error, then iterator exhaustion
        assert!(ex.next_frame().is_err());
        assert!(ex.next().is_none());
    }

    #[test]
    fn test_missing_content_length_uses_marker_scan() {
        let jpeg = fake_jpeg(b"no-length-header");
        let stream = part(&jpeg, None);

        let mut ex = extractor(stream);
        let frame = ex.next_frame().unwrap();
        assert_eq!(frame.data(), jpeg.as_slice());
    }

    #[test]
    fn test_overdeclared_content_length_is_trimmed_to_markers() {
        let jpeg = fake_jpeg(b"overdeclared");
        let mut body = jpeg.clone();
        body.extend_from_slice(b"??"); // stray bytes covered by the declared length
        let stream = part(&body, Some(body.len()));

        let mut ex = extractor(stream);
        let frame = ex.next_frame().unwrap();
        assert_eq!(frame.data(), jpeg.as_slice());
    }

    #[test]
    fn test_underdeclared_content_length_reads_to_eoi() {
        let jpeg = fake_jpeg(b"underdeclared-payload");
        let stream = part(&jpeg, Some(jpeg.len() - 6));

        let mut ex = extractor(stream);
        let frame = ex.next_frame().unwrap();
        assert_eq!(frame.data(), jpeg.as_slice());
    }

    #[test]
    fn test_truncated_part_dropped_and_next_part_survives() {
        let good = fake_jpeg(b"the-good-frame");
        let mut stream = Vec::new();
        // SOI but no EOI before the next boundary
        stream.extend_from_slice(&part(&[0xFF, 0xD8, 0x00, 0x01, 0x02], None));
        stream.extend_from_slice(&part(&good, Some(good.len())));

        let mut ex = extractor(stream);
        let frame = ex.next_frame().expect("valid part should survive resync");
        assert_eq!(frame.data(), good.as_slice());
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_oversized_part_resyncs_instead_of_terminating() {
        let good = fake_jpeg(b"after-the-monster");
        let mut stream = Vec::new();
        stream.extend_from_slice(format!("--{}\r\n\r\n", BOUNDARY).as_bytes());
        stream.extend_from_slice(&SOI);
        stream.extend_from_slice(&vec![0u8; 4096]); // exceeds the cap below, no EOI
        stream.extend_from_slice(&part(&good, Some(good.len())));

        let mut ex = FrameExtractor::new(Cursor::new(stream), BOUNDARY, 2048, 3);
        let frame = ex.next_frame().unwrap();
        assert_eq!(frame.data(), good.as_slice());
    }

    #[test]
    fn test_repeated_resync_failures_terminate_with_protocol_error() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            // each part has an SOI but never an EOI
            stream.extend_from_slice(&part(&[0xFF, 0xD8, 0xAA, 0xBB], None));
        }
        stream.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let mut ex = extractor(stream);
        match ex.next_frame() {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other.map(|f| f.sequence)),
        }
        assert!(ex.next().is_none());
    }

    #[test]
    fn test_boundary_token_with_leading_dashes_accepted() {
        let jpeg = fake_jpeg(b"dashes");
        let stream = part(&jpeg, Some(jpeg.len()));

        let mut ex = FrameExtractor::new(
            Cursor::new(stream),
            &format!("--{}", BOUNDARY),
            1024 * 1024,
            3,
        );
        assert_eq!(ex.next_frame().unwrap().data(), jpeg.as_slice());
    }

    #[test]
    fn test_boundary_with_self_overlapping_prefix_is_found() {
        // token "aab" arriving as "aaab": a restart-at-one matcher loses
        // the middle byte and never synchronizes
        let jpeg = fake_jpeg(b"overlap");
        let mut stream = b"aaab\r\n".to_vec();
        stream.extend_from_slice(b"Content-Type: image/jpeg\r\n");
        stream.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
        stream.extend_from_slice(&jpeg);
        stream.extend_from_slice(b"\r\n");

        let mut ex = FrameExtractor::new(Cursor::new(stream), "aab", 1024 * 1024, 3);
        assert_eq!(ex.next_frame().unwrap().data(), jpeg.as_slice());
    }

    #[test]
    fn test_preamble_before_first_boundary_is_skipped() {
        let jpeg = fake_jpeg(b"preamble");
        let mut stream = b"ignore this multipart preamble\r\n".to_vec();
        stream.extend_from_slice(&part(&jpeg, Some(jpeg.len())));

        let mut ex = extractor(stream);
        assert_eq!(ex.next_frame().unwrap().data(), jpeg.as_slice());
    }

    #[test]
    fn test_io_error_is_terminal() {
        // stream cut off mid-body
        let jpeg = fake_jpeg(b"cut");
        let mut stream = part(&jpeg, Some(jpeg.len() + 64));
        stream.truncate(stream.len() - 4);

        let mut ex = extractor(stream);
        assert!(matches!(ex.next_frame(), Err(Error::Io(_))));
        assert!(ex.next().is_none());
    }
}
