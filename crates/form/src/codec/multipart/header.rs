//! Parsing of the header block that opens every multipart part.
//!
//! The block is handed to `httparse` for the field syntax. Parameters of
//! `Content-Disposition` and `Content-Type` are split with the classic
//! semicolon rules, quoted strings may contain `;` and the escapes `\\` and
//! `\"`. Values stay raw bytes: non-ASCII file names are decoded later with the
//! request's charsets.

use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use mime::Mime;
use tracing::trace;

/// Maximum number of header fields in a single part
const MAX_PART_HEADER_NUM: usize = 32;

/// Headers of one multipart part plus the values pulled out of them.
#[derive(Debug, Clone, Default)]
pub struct PartHead {
    pub(crate) headers: HeaderMap,
    pub(crate) name: Option<Bytes>,
    pub(crate) filename: Option<Bytes>,
    /// Boundary parameter when the part is itself `multipart/*`.
    pub(crate) inner_boundary: Option<Bytes>,
}

impl PartHead {
    /// Parses a complete header block, without its terminating blank line.
    ///
    /// Returns `None` when the block is not valid header syntax.
    pub fn parse(block: &[u8]) -> Option<Self> {
        let mut terminated = Vec::with_capacity(block.len() + 2);
        terminated.extend_from_slice(block);
        terminated.extend_from_slice(b"\r\n");

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_PART_HEADER_NUM];
        let parsed = match httparse::parse_headers(&terminated, &mut raw_headers) {
            Ok(httparse::Status::Complete((_, parsed))) => parsed,
            Ok(httparse::Status::Partial) => return None,
            Err(e) => {
                trace!(cause = %e, "invalid part header block");
                return None;
            }
        };

        let mut headers = HeaderMap::with_capacity(parsed.len());
        for header in parsed.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).ok()?;
            let value = HeaderValue::from_bytes(header.value).ok()?;
            headers.append(name, value);
        }

        // some clients add Content-Length for part headers, it means nothing here
        headers.remove(CONTENT_LENGTH);

        let mut head = PartHead { headers, ..PartHead::default() };

        if let Some(disposition) = head.headers.get(CONTENT_DISPOSITION) {
            let (_, params) = parse_params(disposition.as_bytes());
            for (key, value) in params {
                match key.as_str() {
                    "name" => head.name = Some(value.into()),
                    "filename" => head.filename = Some(value.into()),
                    _ => {}
                }
            }
        }

        if let Some(content_type) = head.headers.get(CONTENT_TYPE) {
            let (main, params) = parse_params(content_type.as_bytes());
            if is_multipart(&main) {
                head.inner_boundary =
                    params.into_iter().find(|(key, _)| key == "boundary").map(|(_, value)| value.into());
            }
        }

        Some(head)
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn name(&self) -> Option<&[u8]> {
        self.name.as_deref()
    }

    #[inline]
    pub fn filename(&self) -> Option<&[u8]> {
        self.filename.as_deref()
    }

    #[inline]
    pub fn inner_boundary(&self) -> Option<&[u8]> {
        self.inner_boundary.as_deref()
    }
}

/// Returns true when `main` is a `multipart/*` media type.
pub(crate) fn is_multipart(main: &[u8]) -> bool {
    std::str::from_utf8(main)
        .ok()
        .and_then(|s| s.trim().parse::<Mime>().ok())
        .is_some_and(|mime| mime.type_() == mime::MULTIPART)
}

/// Splits a `Content-Type` like value into its main value and parameters.
///
/// Parameter names are lower-cased, quoted values are unquoted.
pub(crate) fn parse_params(value: &[u8]) -> (Vec<u8>, Vec<(String, Vec<u8>)>) {
    let mut segments = Segments { rest: value, first: true };
    let main = segments.next().unwrap_or_default();

    let params = segments
        .filter_map(|segment| {
            let eq = segment.iter().position(|b| *b == b'=')?;
            let key = String::from_utf8_lossy(segment[..eq].trim_ascii()).to_ascii_lowercase();
            let value = segment[eq + 1..].trim_ascii();
            Some((key, unquote(value)))
        })
        .collect();

    (main, params)
}

fn unquote(value: &[u8]) -> Vec<u8> {
    if value.len() >= 2 && value[0] == b'"' && value[value.len() - 1] == b'"' {
        let inner = &value[1..value.len() - 1];
        let unescaped = replace(inner, b"\\\\", b"\\");
        replace(&unescaped, b"\\\"", b"\"")
    } else {
        value.to_vec()
    }
}

fn replace(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

/// Iterator over `;` separated segments, honouring quoted strings.
struct Segments<'a> {
    rest: &'a [u8],
    first: bool,
}

impl Iterator for Segments<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;
        } else {
            self.rest = self.rest.strip_prefix(b";")?;
        }

        let mut end = find_semicolon(self.rest, 0);
        while let Some(pos) = end {
            if pos == 0 || quote_balance(&self.rest[..pos]) % 2 == 0 {
                break;
            }
            end = find_semicolon(self.rest, pos + 1);
        }

        let end = end.unwrap_or(self.rest.len());
        let segment = self.rest[..end].trim_ascii().to_vec();
        self.rest = &self.rest[end..];
        Some(segment)
    }
}

fn find_semicolon(bytes: &[u8], from: usize) -> Option<usize> {
    memchr::memchr(b';', bytes.get(from..)?).map(|pos| pos + from)
}

/// Unescaped double quotes in `bytes`.
fn quote_balance(bytes: &[u8]) -> usize {
    let quotes = memchr::memchr_iter(b'"', bytes).count();
    let escaped = bytes.windows(2).filter(|w| w == b"\\\"").count();
    quotes - escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_data_disposition() {
        let head = PartHead::parse(b"Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\nContent-Type: text/plain\r\n")
            .unwrap();
        assert_eq!(head.name(), Some(&b"file"[..]));
        assert_eq!(head.filename(), Some(&b"test.txt"[..]));
        assert_eq!(head.inner_boundary(), None);
        assert_eq!(head.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn quoted_semicolon_and_escapes() {
        let (main, params) = parse_params(br#"form-data; name="a;b"; filename="C:\\dir\\x \"y\".txt""#);
        assert_eq!(main, b"form-data");
        assert_eq!(params[0], ("name".to_string(), b"a;b".to_vec()));
        assert_eq!(params[1], ("filename".to_string(), br#"C:\dir\x "y".txt"#.to_vec()));
    }

    #[test]
    fn parameter_names_are_case_insensitive() {
        let (main, params) = parse_params(b"multipart/mixed; BOUNDARY=abc");
        assert_eq!(main, b"multipart/mixed");
        assert_eq!(params, vec![("boundary".to_string(), b"abc".to_vec())]);
    }

    #[test]
    fn nested_multipart_boundary() {
        let head = PartHead::parse(b"Content-Disposition: form-data; name=\"files\"\nContent-Type: multipart/mixed; boundary=BbC04y\n")
            .unwrap();
        assert_eq!(head.name(), Some(&b"files"[..]));
        assert_eq!(head.inner_boundary(), Some(&b"BbC04y"[..]));
    }

    #[test]
    fn part_content_length_is_dropped() {
        let head = PartHead::parse(b"Content-Disposition: form-data; name=\"a\"\r\nContent-Length: 3\r\n").unwrap();
        assert!(head.headers().get(CONTENT_LENGTH).is_none());
    }

    #[test]
    fn invalid_header_syntax() {
        assert!(PartHead::parse(b"this is not a header\r\n").is_none());
    }

    #[test]
    fn utf8_filename_stays_raw() {
        let head = PartHead::parse("Content-Disposition: form-data; name=\"f\"; filename=\"r\u{e9}sum\u{e9}.pdf\"\r\n".as_bytes())
            .unwrap();
        assert_eq!(head.filename(), Some("r\u{e9}sum\u{e9}.pdf".as_bytes()));
    }
}
