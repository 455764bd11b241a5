//! Streaming decoder for `multipart/*` bodies.
//!
//! The decoder works line by line, the same way browsers lay out the payload:
//!
//! ```text
//! preamble (ignored)
//! --boundary
//! Content-Disposition: form-data; name="a"
//!
//! body of a
//! --boundary
//! ...
//! --boundary--
//! ```
//!
//! Lines are capped at 64 KiB; a longer line is emitted in pieces. A boundary
//! line is only recognised at the start of a line, and the line terminator that
//! precedes it belongs to the boundary rather than to the body.
//!
//! A part whose own content type is `multipart/*` pushes a new boundary on a
//! stack, its sub-parts are reported as ordinary parts. After the nested body
//! closes, the rest of the enclosing part is skipped up to the next enclosing
//! boundary.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::codec::multipart::{Boundary, PartHead};
use crate::ensure;
use crate::protocol::{DecodeError, MultipartItem, TruncatedStage};

/// Longest line handed to the state machine at once
const MAX_LINE_BYTES: usize = 1 << 16;

/// A [`Decoder`] turning a multipart body into [`MultipartItem`]s.
///
/// For every part it yields one [`MultipartItem::Head`], any number of
/// [`MultipartItem::Chunk`]s and one [`MultipartItem::PartEnd`]; after the
/// closing boundary it yields [`MultipartItem::Eof`].
#[derive(Debug)]
pub struct MultipartDecoder {
    state: State,
    levels: Vec<Level>,
    header_buf: BytesMut,
    max_header_bytes: usize,
    max_parts: usize,
    parts: usize,
}

/// One boundary of the nesting stack.
#[derive(Debug)]
struct Level {
    boundary: Boundary,
    /// Name of the enclosing part, inherited by nameless sub-parts
    name: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Skip lines until the first delimiter of the current level
    Preamble,
    /// Collect header lines until a blank line
    Header,
    /// Stream body lines until a delimiter
    Body { pending: LineEnd, line_start: bool, discard: bool },
    /// Skip the remains of an enclosing part after a nested body closed
    Epilogue { line_start: bool },
    /// Closing boundary seen, `Eof` not yet reported
    End,
    /// `Eof` reported
    Done,
}

/// Line terminator held back until we know the next line is not a delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    None,
    Cr,
    Lf,
    CrLf,
}

impl LineEnd {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnd::None => b"",
            LineEnd::Cr => b"\r",
            LineEnd::Lf => b"\n",
            LineEnd::CrLf => b"\r\n",
        }
    }
}

/// Which delimiter of the current level a line matched.
enum Delimiter {
    Next,
    Close,
}

impl MultipartDecoder {
    /// Creates a decoder for a body separated by `boundary`.
    pub fn new(boundary: Boundary, max_header_bytes: usize, max_parts: usize) -> Self {
        Self {
            state: State::Preamble,
            levels: vec![Level { boundary, name: None }],
            header_buf: BytesMut::new(),
            max_header_bytes,
            max_parts,
            parts: 0,
        }
    }

    /// Returns true once the closing boundary of the outermost level was seen.
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::End | State::Done)
    }

    fn current(&self) -> Option<&Level> {
        self.levels.last()
    }

    fn match_delimiter(&self, line: &[u8]) -> Option<Delimiter> {
        let level = self.current()?;
        if line == level.boundary.delimiter() {
            Some(Delimiter::Next)
        } else if line == level.boundary.close_delimiter() {
            Some(Delimiter::Close)
        } else {
            None
        }
    }

    /// Leaves the innermost level after its closing delimiter.
    fn close_level(&mut self) -> State {
        self.levels.pop();
        if self.levels.is_empty() {
            trace!("closing boundary reached");
            State::End
        } else {
            debug!(depth = self.levels.len(), "nested multipart closed");
            State::Epilogue { line_start: true }
        }
    }

    /// Feeds one line to the state machine, returning an item if one is ready.
    fn step(&mut self, line: Bytes) -> Result<Option<MultipartItem>, DecodeError> {
        match self.state {
            State::Preamble => {
                if matches!(self.match_delimiter(line.trim_ascii()), Some(Delimiter::Next)) {
                    self.header_buf.clear();
                    self.state = State::Header;
                }
                Ok(None)
            }

            State::Header => {
                if line.trim_ascii().is_empty() {
                    return self.finish_header();
                }
                self.header_buf.put_slice(&line);
                ensure!(
                    self.header_buf.len() <= self.max_header_bytes,
                    DecodeError::too_large_header(self.header_buf.len(), self.max_header_bytes)
                );
                Ok(None)
            }

            State::Body { pending, line_start, discard } => self.read_body(line, pending, line_start, discard),

            State::Epilogue { line_start } => {
                if line_start && line.starts_with(b"--") {
                    match self.match_delimiter(line.trim_ascii_end()) {
                        Some(Delimiter::Next) => {
                            self.header_buf.clear();
                            self.state = State::Header;
                            return Ok(None);
                        }
                        Some(Delimiter::Close) => {
                            self.state = self.close_level();
                            return Ok(None);
                        }
                        None => {}
                    }
                }
                self.state = State::Epilogue { line_start: line.ends_with(b"\n") };
                Ok(None)
            }

            State::End | State::Done => Ok(None),
        }
    }

    fn finish_header(&mut self) -> Result<Option<MultipartItem>, DecodeError> {
        let block = self.header_buf.split().freeze();
        let Some(mut head) = PartHead::parse(&block) else {
            warn!(header_size = block.len(), "malformed part header, discarding part");
            self.state = State::Body { pending: LineEnd::None, line_start: true, discard: true };
            return Ok(None);
        };

        if head.name.is_none() {
            head.name = self.current().and_then(|level| level.name.clone());
        }

        if let Some(inner) = head.inner_boundary.take() {
            let boundary = Boundary::new(inner)?;
            debug!(depth = self.levels.len() + 1, "entering nested multipart");
            self.levels.push(Level { boundary, name: head.name });
            self.state = State::Preamble;
            return Ok(None);
        }

        self.parts += 1;
        ensure!(self.parts <= self.max_parts, DecodeError::too_many_parts(self.max_parts));

        trace!(part = self.parts, "part header decoded");
        self.state = State::Body { pending: LineEnd::None, line_start: true, discard: false };
        Ok(Some(MultipartItem::Head(head)))
    }

    fn read_body(
        &mut self,
        line: Bytes,
        mut pending: LineEnd,
        line_start: bool,
        discard: bool,
    ) -> Result<Option<MultipartItem>, DecodeError> {
        // a lone CR held back from the previous piece belongs to this line
        let line = if pending == LineEnd::Cr {
            pending = LineEnd::None;
            let mut joined = BytesMut::with_capacity(line.len() + 1);
            joined.put_u8(b'\r');
            joined.put_slice(&line);
            joined.freeze()
        } else {
            line
        };

        if line_start && line.starts_with(b"--") {
            let delimiter = self.match_delimiter(line.trim_ascii_end());
            if let Some(delimiter) = delimiter {
                self.state = match delimiter {
                    Delimiter::Next => {
                        self.header_buf.clear();
                        State::Header
                    }
                    Delimiter::Close => self.close_level(),
                };
                return Ok((!discard).then_some(MultipartItem::PartEnd));
            }
        }

        let held = pending;
        let (data, pending, line_start) = if line.ends_with(b"\r\n") {
            (line.slice(..line.len() - 2), LineEnd::CrLf, true)
        } else if line.ends_with(b"\n") {
            (line.slice(..line.len() - 1), LineEnd::Lf, true)
        } else if line.ends_with(b"\r") {
            (line.slice(..line.len() - 1), LineEnd::Cr, false)
        } else {
            (line, LineEnd::None, false)
        };
        self.state = State::Body { pending, line_start, discard };

        if discard || (held == LineEnd::None && data.is_empty()) {
            return Ok(None);
        }

        let chunk = if held == LineEnd::None {
            data
        } else {
            let mut joined = BytesMut::with_capacity(held.as_bytes().len() + data.len());
            joined.put_slice(held.as_bytes());
            joined.put_slice(&data);
            joined.freeze()
        };
        Ok(Some(MultipartItem::Chunk(chunk)))
    }

    /// The error for input that ends in the current state, if it is one.
    fn eof_error(&self) -> Option<DecodeError> {
        match self.state {
            State::End | State::Done => None,
            // nothing but preamble at the outermost level: an empty form
            State::Preamble if self.levels.len() == 1 => None,
            State::Header => Some(DecodeError::truncated(TruncatedStage::Header)),
            State::Preamble | State::Body { .. } | State::Epilogue { .. } => {
                Some(DecodeError::truncated(TruncatedStage::Body))
            }
        }
    }
}

/// Splits the next line off `src`, including its LF.
///
/// Without a LF, a full `MAX_LINE_BYTES` piece is returned, or at `eof` whatever is left.
fn next_line(src: &mut BytesMut, eof: bool) -> Option<Bytes> {
    let limit = src.len().min(MAX_LINE_BYTES);
    match memchr::memchr(b'\n', &src[..limit]) {
        Some(pos) => Some(src.split_to(pos + 1).freeze()),
        None if limit == MAX_LINE_BYTES => Some(src.split_to(MAX_LINE_BYTES).freeze()),
        None if eof && !src.is_empty() => Some(src.split().freeze()),
        None => None,
    }
}

impl Decoder for MultipartDecoder {
    type Item = MultipartItem;
    type Error = DecodeError;

    /// Decodes lines from `src` until an item is ready or more data is needed.
    ///
    /// # Returns
    /// * `Ok(Some(item))` when a header, body chunk, part end or EOF is decoded
    /// * `Ok(None)` when more data is needed
    /// * `Err(DecodeError)` on an invalid nested boundary, an oversized header
    ///   block or too many parts
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::End => {
                    self.state = State::Done;
                    return Ok(Some(MultipartItem::Eof));
                }
                State::Done => {
                    // epilogue after the closing boundary is ignored
                    src.clear();
                    return Ok(None);
                }
                _ => {}
            }

            let Some(line) = next_line(src, false) else {
                return Ok(None);
            };

            if let Some(item) = self.step(line)? {
                return Ok(Some(item));
            }
        }
    }

    /// Drains whatever is left at end of input.
    ///
    /// Running out of input anywhere but after the closing boundary (or before
    /// the very first boundary) is reported as [`DecodeError::Truncated`].
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::End => {
                    self.state = State::Done;
                    return Ok(Some(MultipartItem::Eof));
                }
                State::Done => {
                    src.clear();
                    return Ok(None);
                }
                _ => {}
            }

            let Some(line) = next_line(src, true) else {
                return match self.eof_error() {
                    Some(e) => Err(e),
                    None => {
                        self.state = State::Done;
                        Ok(Some(MultipartItem::Eof))
                    }
                };
            };

            if let Some(item) = self.step(line)? {
                return Ok(Some(item));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn decoder(boundary: &str) -> MultipartDecoder {
        MultipartDecoder::new(Boundary::new(boundary.to_string()).unwrap(), 8 * 1024, 1024)
    }

    /// Decodes `input` completely, joining chunks per part.
    fn decode_all(decoder: &mut MultipartDecoder, input: &str) -> Result<Vec<(PartHead, Vec<u8>)>, DecodeError> {
        let mut src = BytesMut::from(input.replace('\n', "\r\n").as_str());
        let mut parts: Vec<(PartHead, Vec<u8>)> = vec![];
        loop {
            let item = match decoder.decode(&mut src)? {
                Some(item) => item,
                None => match decoder.decode_eof(&mut src)? {
                    Some(item) => item,
                    None => break,
                },
            };
            match item {
                MultipartItem::Head(head) => parts.push((head, vec![])),
                MultipartItem::Chunk(bytes) => parts.last_mut().unwrap().1.extend_from_slice(&bytes),
                MultipartItem::PartEnd => {}
                MultipartItem::Eof => break,
            }
        }
        Ok(parts)
    }

    #[test]
    fn test_basic_form() {
        let body = indoc! {r#"
        --AaB03x
        Content-Disposition: form-data; name="field1"

        Joe Blow
        --AaB03x
        Content-Disposition: form-data; name="file"; filename="test.txt"
        Content-Type: text/plain

        hello
        --AaB03x--
        "#};

        let parts = decode_all(&mut decoder("AaB03x"), body).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0.name(), Some(&b"field1"[..]));
        assert_eq!(parts[0].1, b"Joe Blow");
        assert_eq!(parts[1].0.filename(), Some(&b"test.txt"[..]));
        assert_eq!(parts[1].1, b"hello");
    }

    #[test]
    fn test_multiline_body_keeps_inner_line_ends() {
        let body = indoc! {r#"
        preamble noise

        --xyz
        Content-Disposition: form-data; name="text"

        line one
        line two

        --xyz--
        epilogue
        "#};

        let parts = decode_all(&mut decoder("xyz"), body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1, b"line one\r\nline two\r\n");
    }

    #[test]
    fn test_long_line_split_keeps_crlf() {
        for len in [MAX_LINE_BYTES - 2, MAX_LINE_BYTES - 1, MAX_LINE_BYTES, 2 * MAX_LINE_BYTES - 1] {
            let first = "a".repeat(len);
            let second = "b".repeat(len);
            let body = format!("--xyz\nContent-Disposition: form-data; name=\"big\"\n\n{first}\n{second}\n--xyz--\n");

            let parts = decode_all(&mut decoder("xyz"), &body).unwrap();
            assert_eq!(parts.len(), 1, "line length {len}");
            assert_eq!(parts[0].1, format!("{first}\r\n{second}").into_bytes(), "line length {len}");
        }
    }

    #[test]
    fn test_boundary_like_data_is_body() {
        let body = indoc! {r#"
        --xyz
        Content-Disposition: form-data; name="a"

        --xyzzy is not a delimiter
        --xyz--
        "#};

        let parts = decode_all(&mut decoder("xyz"), body).unwrap();
        assert_eq!(parts[0].1, b"--xyzzy is not a delimiter");
    }

    #[test]
    fn test_nested_multipart_inherits_name() {
        let body = indoc! {r#"
        --AaB03x
        Content-Disposition: form-data; name="files"
        Content-Type: multipart/mixed; boundary=BbC04y

        --BbC04y
        Content-Disposition: file; filename="file1.txt"

        contents one
        --BbC04y
        Content-Disposition: file; filename="file2.gif"

        contents two
        --BbC04y--
        --AaB03x
        Content-Disposition: form-data; name="after"

        tail
        --AaB03x--
        "#};

        let parts = decode_all(&mut decoder("AaB03x"), body).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].0.name(), Some(&b"files"[..]));
        assert_eq!(parts[0].0.filename(), Some(&b"file1.txt"[..]));
        assert_eq!(parts[0].1, b"contents one");
        assert_eq!(parts[1].0.name(), Some(&b"files"[..]));
        assert_eq!(parts[1].1, b"contents two");
        assert_eq!(parts[2].0.name(), Some(&b"after"[..]));
        assert_eq!(parts[2].1, b"tail");
    }

    #[test]
    fn test_malformed_part_header_is_skipped() {
        let body = indoc! {r#"
        --xyz
        no colon here

        lost value
        --xyz
        Content-Disposition: form-data; name="kept"

        value
        --xyz--
        "#};

        let parts = decode_all(&mut decoder("xyz"), body).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].0.name(), Some(&b"kept"[..]));
        assert_eq!(parts[0].1, b"value");
    }

    #[test]
    fn test_truncated_body() {
        let body = indoc! {r#"
        --xyz
        Content-Disposition: form-data; name="a"

        never closed
        "#};

        let result = decode_all(&mut decoder("xyz"), body);
        assert!(matches!(result, Err(DecodeError::Truncated { stage: TruncatedStage::Body })));
    }

    #[test]
    fn test_truncated_header() {
        let body = "--xyz\r\nContent-Disposition: form-data; name=\"a\"\r\n";
        let mut src = BytesMut::from(body);
        let mut decoder = decoder("xyz");
        assert!(decoder.decode(&mut src).unwrap().is_none());
        let result = decoder.decode_eof(&mut src);
        assert!(matches!(result, Err(DecodeError::Truncated { stage: TruncatedStage::Header })));
    }

    #[test]
    fn test_empty_body_has_no_parts() {
        let parts = decode_all(&mut decoder("xyz"), "").unwrap();
        assert!(parts.is_empty());
    }

    #[test]
    fn test_too_many_parts() {
        let body = indoc! {r#"
        --xyz
        Content-Disposition: form-data; name="a"

        1
        --xyz
        Content-Disposition: form-data; name="b"

        2
        --xyz--
        "#};

        let mut decoder = MultipartDecoder::new(Boundary::new("xyz").unwrap(), 8 * 1024, 1);
        let result = decode_all(&mut decoder, body);
        assert!(matches!(result, Err(DecodeError::TooManyParts { max_num: 1 })));
    }

    #[test]
    fn test_incremental_feeding() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nab\r\ncd\r\n--b--\r\n";
        let mut decoder = decoder("b");
        let mut src = BytesMut::new();
        let mut data = vec![];
        let mut ended = false;

        for byte in body.iter() {
            src.put_u8(*byte);
            while let Some(item) = decoder.decode(&mut src).unwrap() {
                match item {
                    MultipartItem::Chunk(bytes) => data.extend_from_slice(&bytes),
                    MultipartItem::Eof => ended = true,
                    _ => {}
                }
            }
        }

        assert!(ended);
        assert!(decoder.is_finished());
        assert_eq!(data, b"ab\r\ncd");
    }
}
