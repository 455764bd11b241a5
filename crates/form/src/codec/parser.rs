//! Body parser: turns a request payload into an ordered list of [`Part`]s.
//!
//! The content type decides which decoder runs:
//!
//! - `application/x-www-form-urlencoded`: [`UrlEncodedDecoder`]
//! - `multipart/*`: [`MultipartDecoder`], every part body goes through a [`Spool`]
//! - anything else, or no content type at all: no parts
//!
//! Two drivers feed the same decoders. [`BodyParser::parse`] pulls from a
//! blocking [`Read`], [`BodyParser::parse_body`] awaits frames of any
//! [`http_body::Body`]. Both stop reading at the declared content length.

use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::pin::pin;

use bytes::{Bytes, BytesMut};
use http_body::Body;
use http_body_util::BodyExt;
use mime::Mime;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::codec::multipart::{Boundary, MultipartDecoder, PartHead, parse_params};
use crate::codec::spool::Spool;
use crate::codec::urlencoded::UrlEncodedDecoder;
use crate::protocol::{DecodeError, MultipartItem, Part, PartBody};

/// Part bodies up to this size stay in memory
pub const DEFAULT_SPOOL_THRESHOLD: usize = 1000;

/// Maximum number of parts in one multipart body
pub const DEFAULT_MAX_PARTS: usize = 1024;

/// Maximum size of a single part header block
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Limits and spooling options of a [`BodyParser`].
#[derive(Debug, Clone)]
pub struct ParserConfig {
    spool_threshold: usize,
    max_parts: usize,
    max_header_bytes: usize,
    spool_dir: Option<PathBuf>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            spool_threshold: DEFAULT_SPOOL_THRESHOLD,
            max_parts: DEFAULT_MAX_PARTS,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            spool_dir: None,
        }
    }
}

impl ParserConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size above which part bodies move to a temporary file.
    #[must_use]
    pub fn spool_threshold(mut self, size: usize) -> Self {
        self.spool_threshold = size;
        self
    }

    /// Set the maximum number of multipart parts.
    #[must_use]
    pub fn max_parts(mut self, count: usize) -> Self {
        self.max_parts = count;
        self
    }

    /// Set the maximum size of one part header block.
    #[must_use]
    pub fn max_header_bytes(mut self, size: usize) -> Self {
        self.max_header_bytes = size;
        self
    }

    /// Set the directory for temporary files, the system temp dir by default.
    #[must_use]
    pub fn spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn get_spool_threshold(&self) -> usize {
        self.spool_threshold
    }

    #[must_use]
    pub fn get_max_parts(&self) -> usize {
        self.max_parts
    }

    #[must_use]
    pub fn get_max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    #[must_use]
    pub fn get_spool_dir(&self) -> Option<&Path> {
        self.spool_dir.as_deref()
    }
}

/// How a request body is encoded, derived from its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEncoding {
    UrlEncoded,
    Multipart(Boundary),
    /// Not a form body, it yields no parts
    Other,
}

impl FormEncoding {
    /// Classifies `content_type`.
    ///
    /// For multipart bodies the boundary is `boundary` when given, otherwise
    /// the `boundary` parameter of the content type.
    pub fn detect(content_type: Option<&str>, boundary: Option<&[u8]>) -> Result<Self, DecodeError> {
        let Some(content_type) = content_type else {
            return Ok(FormEncoding::Other);
        };

        let (main, params) = parse_params(content_type.as_bytes());
        let Some(mime) = std::str::from_utf8(&main).ok().and_then(|s| s.parse::<Mime>().ok()) else {
            trace!(content_type, "unparsable content type, no form body");
            return Ok(FormEncoding::Other);
        };

        if mime.type_() == mime::APPLICATION && mime.subtype() == mime::WWW_FORM_URLENCODED {
            return Ok(FormEncoding::UrlEncoded);
        }

        if mime.type_() == mime::MULTIPART {
            let token = match boundary {
                Some(boundary) => Bytes::copy_from_slice(boundary),
                None => params
                    .into_iter()
                    .find(|(key, _)| key == "boundary")
                    .map(|(_, value)| Bytes::from(value))
                    .ok_or(DecodeError::MissingBoundary)?,
            };
            return Ok(FormEncoding::Multipart(Boundary::new(token)?));
        }

        Ok(FormEncoding::Other)
    }
}

/// Splits request payloads into [`Part`]s.
#[derive(Debug, Clone, Default)]
pub struct BodyParser {
    config: ParserConfig,
}

impl BodyParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parses a body read from `reader`.
    ///
    /// At most `content_length` bytes are read when it is given. An url-encoded
    /// body shorter than that is a [`DecodeError::ContentLengthMismatch`]; a
    /// multipart body that ends before its closing boundary is
    /// [`DecodeError::Truncated`]. On error every part decoded so far is dropped.
    pub fn parse<R: Read>(
        &self,
        reader: R,
        content_type: Option<&str>,
        content_length: Option<u64>,
        boundary: Option<&[u8]>,
    ) -> Result<Vec<Part>, DecodeError> {
        let Some(mut pipeline) = self.pipeline(content_type, boundary)? else {
            return Ok(vec![]);
        };

        let mut reader = reader.take(content_length.unwrap_or(u64::MAX));
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut chunk = [0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;

        while !pipeline.is_finished() {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            total += n as u64;
            buf.extend_from_slice(&chunk[..n]);
            pipeline.feed(&mut buf)?;
        }

        pipeline.finish(&mut buf, total, content_length)
    }

    /// Parses a body pulled frame by frame from `body`.
    ///
    /// Behaves like [`BodyParser::parse`]; trailers are ignored.
    pub async fn parse_body<B>(
        &self,
        body: B,
        content_type: Option<&str>,
        content_length: Option<u64>,
        boundary: Option<&[u8]>,
    ) -> Result<Vec<Part>, DecodeError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(mut pipeline) = self.pipeline(content_type, boundary)? else {
            return Ok(vec![]);
        };

        let mut body = pin!(body);
        let mut remaining = content_length.unwrap_or(u64::MAX);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut total = 0u64;

        while !pipeline.is_finished() && remaining > 0 {
            let Some(frame) = body.frame().await else {
                break;
            };
            let frame = frame.map_err(|e| DecodeError::io(io::Error::other(e)))?;
            let Ok(mut data) = frame.into_data() else {
                continue;
            };

            if data.len() as u64 > remaining {
                data.truncate(remaining as usize);
            }
            remaining -= data.len() as u64;
            total += data.len() as u64;

            buf.extend_from_slice(&data);
            pipeline.feed(&mut buf)?;
        }

        pipeline.finish(&mut buf, total, content_length)
    }

    fn pipeline(&self, content_type: Option<&str>, boundary: Option<&[u8]>) -> Result<Option<Pipeline<'_>>, DecodeError> {
        let pipeline = match FormEncoding::detect(content_type, boundary)? {
            FormEncoding::UrlEncoded => {
                Pipeline::UrlEncoded { decoder: UrlEncodedDecoder::new(), parts: vec![] }
            }
            FormEncoding::Multipart(boundary) => {
                debug!(boundary = %String::from_utf8_lossy(boundary.token()), "parsing multipart body");
                let decoder = MultipartDecoder::new(boundary, self.config.max_header_bytes, self.config.max_parts);
                Pipeline::Multipart { decoder, collector: PartCollector::new(&self.config) }
            }
            FormEncoding::Other => return Ok(None),
        };
        Ok(Some(pipeline))
    }
}

/// A decoder together with the parts it produced so far.
enum Pipeline<'a> {
    UrlEncoded { decoder: UrlEncodedDecoder, parts: Vec<Part> },
    Multipart { decoder: MultipartDecoder, collector: PartCollector<'a> },
}

impl Pipeline<'_> {
    fn is_finished(&self) -> bool {
        match self {
            Pipeline::UrlEncoded { .. } => false,
            Pipeline::Multipart { collector, .. } => collector.finished,
        }
    }

    fn feed(&mut self, buf: &mut BytesMut) -> Result<(), DecodeError> {
        match self {
            Pipeline::UrlEncoded { decoder, parts } => {
                while let Some(part) = decoder.decode(buf)? {
                    parts.push(part);
                }
            }
            Pipeline::Multipart { decoder, collector } => {
                while !collector.finished {
                    let Some(item) = decoder.decode(buf)? else {
                        break;
                    };
                    collector.push(item)?;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self, buf: &mut BytesMut, total: u64, content_length: Option<u64>) -> Result<Vec<Part>, DecodeError> {
        match &mut self {
            Pipeline::UrlEncoded { decoder, parts } => {
                if let Some(expected) = content_length.filter(|expected| total < *expected) {
                    return Err(DecodeError::content_length_mismatch(expected, total));
                }
                while let Some(part) = decoder.decode_eof(buf)? {
                    parts.push(part);
                }
            }
            Pipeline::Multipart { decoder, collector } => {
                while !collector.finished {
                    let Some(item) = decoder.decode_eof(buf)? else {
                        break;
                    };
                    collector.push(item)?;
                }
            }
        }

        let parts = match self {
            Pipeline::UrlEncoded { parts, .. } => parts,
            Pipeline::Multipart { collector, .. } => collector.parts,
        };
        trace!(parts = parts.len(), bytes = total, "body parsed");
        Ok(parts)
    }
}

/// Assembles [`MultipartItem`]s into spooled [`Part`]s.
struct PartCollector<'a> {
    config: &'a ParserConfig,
    current: Option<(PartHead, Spool)>,
    parts: Vec<Part>,
    finished: bool,
}

impl<'a> PartCollector<'a> {
    fn new(config: &'a ParserConfig) -> Self {
        Self { config, current: None, parts: vec![], finished: false }
    }

    fn push(&mut self, item: MultipartItem) -> Result<(), DecodeError> {
        match item {
            MultipartItem::Head(head) => {
                let spool = Spool::new(self.config.spool_threshold, self.config.get_spool_dir());
                self.current = Some((head, spool));
            }
            MultipartItem::Chunk(bytes) => {
                if let Some((_, spool)) = &mut self.current {
                    spool.write(&bytes)?;
                }
            }
            MultipartItem::PartEnd => {
                if let Some((head, spool)) = self.current.take() {
                    let body = spool.finish()?;
                    match head.name {
                        Some(name) => {
                            debug!(size = body.len(), spooled = body.is_spooled(), "part decoded");
                            self.parts.push(Part::new(name, head.filename, head.headers, PartBody::Spooled(body)));
                        }
                        None => debug!(size = body.len(), "part without name skipped"),
                    }
                }
            }
            MultipartItem::Eof => self.finished = true,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TruncatedStage;
    use http_body::Frame;
    use http_body_util::{Full, StreamBody};
    use indoc::indoc;
    use std::io::{Read, Seek, SeekFrom};

    const FORM_BODY: &str = indoc! {r#"
    --AaB03x
    Content-Disposition: form-data; name="field1"

    Joe Blow
    --AaB03x
    Content-Disposition: form-data; name="file"; filename="test.txt"
    Content-Type: text/plain

    hello
    --AaB03x--
    "#};

    fn crlf(body: &str) -> Vec<u8> {
        body.replace('\n', "\r\n").into_bytes()
    }

    fn body_text(part: Part) -> Vec<u8> {
        let (_, _, _, body) = part.into_parts();
        body.into_bytes().unwrap().to_vec()
    }

    #[test]
    fn test_detect_encoding() {
        assert_eq!(FormEncoding::detect(None, None).unwrap(), FormEncoding::Other);
        assert_eq!(
            FormEncoding::detect(Some("application/x-www-form-urlencoded; charset=utf-8"), None).unwrap(),
            FormEncoding::UrlEncoded
        );
        assert_eq!(FormEncoding::detect(Some("application/json"), None).unwrap(), FormEncoding::Other);
        assert!(matches!(
            FormEncoding::detect(Some("multipart/form-data; boundary=\"a b\""), None).unwrap(),
            FormEncoding::Multipart(boundary) if boundary.token() == b"a b"
        ));
        assert!(matches!(
            FormEncoding::detect(Some("multipart/form-data"), None),
            Err(DecodeError::MissingBoundary)
        ));
        assert!(matches!(
            FormEncoding::detect(Some("multipart/form-data; boundary=\"bad \""), None),
            Err(DecodeError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn test_parse_url_encoded() {
        let body = b"a=1&b=2";
        let parts = BodyParser::default()
            .parse(&body[..], Some("application/x-www-form-urlencoded"), Some(body.len() as u64), None)
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].name(), b"b");
        assert_eq!(body_text(parts.into_iter().nth(1).unwrap()), b"2");
    }

    #[test]
    fn test_content_length_bounds_read() {
        let body = b"a=1&b=2";
        let parts = BodyParser::default().parse(&body[..], Some("application/x-www-form-urlencoded"), Some(3), None).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name(), b"a");
    }

    #[test]
    fn test_content_length_mismatch() {
        let body = b"a=1";
        let result = BodyParser::default().parse(&body[..], Some("application/x-www-form-urlencoded"), Some(10), None);
        assert!(matches!(result, Err(DecodeError::ContentLengthMismatch { expected: 10, actual: 3 })));
    }

    #[test]
    fn test_parse_multipart() {
        let body = crlf(FORM_BODY);
        let parts = BodyParser::default()
            .parse(&body[..], Some("multipart/form-data; boundary=AaB03x"), Some(body.len() as u64), None)
            .unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name(), b"field1");
        assert!(!parts[0].is_file());
        assert!(parts[1].is_file());
        assert_eq!(parts[1].filename(), Some(&b"test.txt"[..]));

        let mut parts = parts.into_iter();
        assert_eq!(body_text(parts.next().unwrap()), b"Joe Blow");
        assert_eq!(body_text(parts.next().unwrap()), b"hello");
    }

    #[test]
    fn test_explicit_boundary_wins() {
        let body = crlf(FORM_BODY);
        let parts = BodyParser::default()
            .parse(&body[..], Some("multipart/form-data; boundary=other"), None, Some(b"AaB03x"))
            .unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_large_part_is_spooled() {
        let payload = "x".repeat(5000);
        let body = crlf(&format!(
            "--b\nContent-Disposition: form-data; name=\"f\"; filename=\"big.bin\"\n\n{payload}\n--b--\n"
        ));

        let parser = BodyParser::new(ParserConfig::new().spool_threshold(1000));
        let parts = parser.parse(&body[..], Some("multipart/form-data; boundary=b"), None, None).unwrap();

        let (_, _, _, body) = parts.into_iter().next().unwrap().into_parts();
        let PartBody::Spooled(mut body) = body else { panic!("multipart body must be spooled") };
        assert!(body.is_spooled());
        assert_eq!(body.len(), 5000);

        body.seek(SeekFrom::Start(4990)).unwrap();
        let mut tail = String::new();
        body.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "x".repeat(10));
    }

    #[test]
    fn test_truncated_multipart() {
        let body = crlf("--b\nContent-Disposition: form-data; name=\"a\"\n\nvalue\n");
        let result = BodyParser::default().parse(&body[..], Some("multipart/form-data; boundary=b"), None, None);
        assert!(matches!(result, Err(DecodeError::Truncated { stage: TruncatedStage::Body })));
    }

    #[test]
    fn test_epilogue_is_not_read() {
        let mut body = crlf(FORM_BODY);
        body.extend_from_slice(b"trailing garbage without any boundary");
        let parts = BodyParser::default().parse(&body[..], Some("multipart/form-data; boundary=AaB03x"), None, None).unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_other_content_type_has_no_parts() {
        let parts = BodyParser::default().parse(&b"{\"a\":1}"[..], Some("application/json"), None, None).unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_parse_body_full() {
        let body = crlf(FORM_BODY);
        let len = body.len() as u64;
        let parts = BodyParser::default()
            .parse_body(Full::new(Bytes::from(body)), Some("multipart/form-data; boundary=AaB03x"), Some(len), None)
            .await
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].filename(), Some(&b"test.txt"[..]));
    }

    #[tokio::test]
    async fn test_parse_body_in_small_frames() {
        let body = crlf(FORM_BODY);
        let frames: Vec<Result<Frame<Bytes>, io::Error>> =
            body.chunks(3).map(|chunk| Ok(Frame::data(Bytes::copy_from_slice(chunk)))).collect();
        let stream = StreamBody::new(futures::stream::iter(frames));

        let parts = BodyParser::default()
            .parse_body(stream, Some("multipart/form-data; boundary=AaB03x"), None, None)
            .await
            .unwrap();

        let mut parts = parts.into_iter();
        assert_eq!(body_text(parts.next().unwrap()), b"Joe Blow");
        assert_eq!(body_text(parts.next().unwrap()), b"hello");
    }

    #[tokio::test]
    async fn test_parse_body_url_encoded_mismatch() {
        let result = BodyParser::default()
            .parse_body(Full::new(Bytes::from_static(b"a=1")), Some("application/x-www-form-urlencoded"), Some(5), None)
            .await;
        assert!(matches!(result, Err(DecodeError::ContentLengthMismatch { expected: 5, actual: 3 })));
    }
}
