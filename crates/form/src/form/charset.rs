//! Character set handling for field names and values.
//!
//! Form data arrives as raw bytes. The charsets a client prefers come from a
//! [`PreferredCharsets`] source, asked at most once per assembly pass and only
//! when something actually needs decoding.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use http::HeaderMap;
use http::header::ACCEPT_CHARSET;
use once_cell::unsync::OnceCell;
use tracing::trace;

/// Supplies the character sets to try, most preferred first.
pub trait PreferredCharsets {
    fn preferred_charsets(&self) -> Vec<String>;
}

impl<T: AsRef<str>> PreferredCharsets for [T] {
    fn preferred_charsets(&self) -> Vec<String> {
        self.iter().map(|charset| charset.as_ref().to_string()).collect()
    }
}

impl<T: AsRef<str>> PreferredCharsets for Vec<T> {
    fn preferred_charsets(&self) -> Vec<String> {
        self.as_slice().preferred_charsets()
    }
}

impl<T: AsRef<str>, const N: usize> PreferredCharsets for [T; N] {
    fn preferred_charsets(&self) -> Vec<String> {
        self.as_slice().preferred_charsets()
    }
}

/// Adapts a closure into a [`PreferredCharsets`] source.
pub struct CharsetsFn<F>(pub F);

impl<F: Fn() -> Vec<String>> PreferredCharsets for CharsetsFn<F> {
    fn preferred_charsets(&self) -> Vec<String> {
        (self.0)()
    }
}

impl<F> std::fmt::Debug for CharsetsFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CharsetsFn")
    }
}

/// Charsets listed in an `Accept-Charset` header, in header order.
///
/// Quality values are dropped, not used for sorting.
#[derive(Debug, Clone, Default)]
pub struct AcceptCharset {
    charsets: Vec<String>,
}

impl AcceptCharset {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let charsets = headers
            .get_all(ACCEPT_CHARSET)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .filter_map(|item| {
                let charset = item.split(';').next().unwrap_or_default().trim();
                (!charset.is_empty()).then(|| charset.to_ascii_lowercase())
            })
            .collect();
        Self { charsets }
    }
}

impl PreferredCharsets for AcceptCharset {
    fn preferred_charsets(&self) -> Vec<String> {
        self.charsets.clone()
    }
}

/// Decodes bytes with the first charset that accepts them.
pub(crate) struct CharsetDecoder<'a> {
    source: &'a dyn PreferredCharsets,
    encodings: OnceCell<Vec<&'static Encoding>>,
}

impl<'a> CharsetDecoder<'a> {
    pub(crate) fn new(source: &'a dyn PreferredCharsets) -> Self {
        Self { source, encodings: OnceCell::new() }
    }

    /// Charsets to try: `*` and unknown labels skipped, UTF-8 when none is left.
    fn encodings(&self) -> &[&'static Encoding] {
        self.encodings.get_or_init(|| {
            let mut encodings: Vec<&'static Encoding> = self
                .source
                .preferred_charsets()
                .iter()
                .map(|label| label.trim())
                .filter(|label| *label != "*")
                .filter_map(|label| Encoding::for_label(label.as_bytes()))
                .collect();
            if encodings.is_empty() {
                encodings.push(UTF_8);
            }
            trace!(charsets = ?encodings.iter().map(|e| e.name()).collect::<Vec<_>>(), "charsets resolved");
            encodings
        })
    }

    /// Tries each charset strictly; if all fail the first one decodes with replacement characters.
    pub(crate) fn decode<'b>(&self, bytes: &'b [u8]) -> Cow<'b, str> {
        if bytes.is_ascii() {
            if let Ok(text) = std::str::from_utf8(bytes) {
                return Cow::Borrowed(text);
            }
        }

        let encodings = self.encodings();
        for encoding in encodings {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
                return text;
            }
        }
        encodings.first().copied().unwrap_or(UTF_8).decode_without_bom_handling(bytes).0
    }

    pub(crate) fn decode_string(&self, bytes: &[u8]) -> String {
        self.decode(bytes).into_owned()
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        self.encodings.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::cell::Cell;

    #[test]
    fn falls_through_to_next_charset() {
        let charsets = ["utf-8", "iso-8859-1"];
        let decoder = CharsetDecoder::new(&charsets);
        assert_eq!(decoder.decode("caf\u{e9}".as_bytes()), "caf\u{e9}");
        assert_eq!(decoder.decode(b"caf\xe9"), "caf\u{e9}");
    }

    #[test]
    fn first_charset_with_replacement_when_nothing_fits() {
        let charsets = ["utf-8"];
        let decoder = CharsetDecoder::new(&charsets);
        assert_eq!(decoder.decode(b"caf\xe9"), "caf\u{fffd}");
    }

    #[test]
    fn star_and_empty_mean_utf8() {
        let charsets: Vec<String> = vec!["*".to_string()];
        let decoder = CharsetDecoder::new(&charsets);
        assert_eq!(decoder.decode("\u{e9}".as_bytes()), "\u{e9}");

        let none: Vec<String> = vec![];
        let decoder = CharsetDecoder::new(&none);
        assert_eq!(decoder.decode("\u{e9}".as_bytes()), "\u{e9}");
    }

    #[test]
    fn charsets_are_queried_lazily_once() {
        let calls = Cell::new(0);
        let source = CharsetsFn(|| {
            calls.set(calls.get() + 1);
            vec!["utf-8".to_string()]
        });
        let decoder = CharsetDecoder::new(&source);

        assert_eq!(decoder.decode(b"ascii only"), "ascii only");
        assert!(!decoder.is_resolved());
        assert_eq!(calls.get(), 0);

        decoder.decode("\u{e9}".as_bytes());
        decoder.decode("\u{e8}".as_bytes());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn accept_charset_keeps_header_order() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("ISO-8859-1;q=0.5, utf-8, *;q=0.1"));
        let accept = AcceptCharset::from_headers(&headers);
        assert_eq!(accept.preferred_charsets(), vec!["iso-8859-1", "utf-8", "*"]);
    }
}
