//! Decoder for `application/x-www-form-urlencoded` data.
//!
//! Pairs are separated by `&`, empty segments are skipped. A pair is split on
//! its first `=`; a pair without `=` is a name with an empty value. `+` stands
//! for a space and `%XX` escapes are decoded to raw bytes, the charset is
//! applied later by the form assembler.

use std::borrow::Cow;

use bytes::{Bytes, BytesMut};
use percent_encoding::percent_decode;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{DecodeError, Part};

/// A [`Decoder`] yielding one [`Part`] per `name=value` pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlEncodedDecoder;

impl UrlEncodedDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes a complete query string or body at once.
    pub fn decode_all(input: &[u8]) -> Vec<Part> {
        input.split(|b| *b == b'&').filter_map(decode_pair).collect()
    }
}

/// Decodes one `name=value` segment, `None` for an empty segment.
fn decode_pair(segment: &[u8]) -> Option<Part> {
    if segment.is_empty() {
        return None;
    }

    let (name, value) = match memchr::memchr(b'=', segment) {
        Some(eq) => (&segment[..eq], &segment[eq + 1..]),
        None => (segment, &b""[..]),
    };

    Some(Part::value(unescape(name), unescape(value)))
}

/// `+` to space, then `%XX` escapes.
fn unescape(input: &[u8]) -> Bytes {
    let input: Cow<'_, [u8]> = if input.contains(&b'+') {
        Cow::Owned(input.iter().map(|b| if *b == b'+' { b' ' } else { *b }).collect())
    } else {
        Cow::Borrowed(input)
    };

    match Cow::<[u8]>::from(percent_decode(&input)) {
        Cow::Borrowed(bytes) => Bytes::copy_from_slice(bytes),
        Cow::Owned(bytes) => Bytes::from(bytes),
    }
}

impl Decoder for UrlEncodedDecoder {
    type Item = Part;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(amp) = memchr::memchr(b'&', src) {
            let segment = src.split_to(amp + 1);
            if let Some(part) = decode_pair(&segment[..amp]) {
                trace!(name_size = part.name().len(), "decoded url-encoded pair");
                return Ok(Some(part));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(part) = self.decode(src)? {
            return Ok(Some(part));
        }
        let rest = src.split();
        Ok(decode_pair(&rest))
    }
}
