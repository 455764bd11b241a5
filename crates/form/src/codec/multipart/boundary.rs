use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::DecodeError;

/// Longest boundary token we accept, see [`Boundary::new`].
const MAX_BOUNDARY_LEN: usize = 201;

/// A validated multipart boundary together with its two delimiter lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    token: Bytes,
    delimiter: Bytes,
    close_delimiter: Bytes,
}

impl Boundary {
    /// Validates `token` and builds the `--token` / `--token--` delimiters.
    ///
    /// The token must be 1 to 201 printable ASCII bytes (space included) and
    /// must not end with a space.
    pub fn new(token: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let token = token.into();
        if !is_valid_token(&token) {
            return Err(DecodeError::invalid_boundary(String::from_utf8_lossy(&token)));
        }

        let mut delimiter = BytesMut::with_capacity(token.len() + 4);
        delimiter.put_slice(b"--");
        delimiter.put_slice(&token);
        let delimiter = delimiter.freeze();

        let mut close_delimiter = BytesMut::with_capacity(token.len() + 4);
        close_delimiter.put_slice(&delimiter);
        close_delimiter.put_slice(b"--");

        Ok(Self { token, delimiter, close_delimiter: close_delimiter.freeze() })
    }

    #[inline]
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// `--boundary`, separates two parts.
    #[inline]
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// `--boundary--`, ends the multipart body.
    #[inline]
    pub fn close_delimiter(&self) -> &[u8] {
        &self.close_delimiter
    }
}

fn is_valid_token(token: &[u8]) -> bool {
    match token.split_last() {
        Some((last, rest)) => {
            rest.len() < MAX_BOUNDARY_LEN
                && rest.iter().all(|b| (b' '..=b'~').contains(b))
                && (b'!'..=b'~').contains(last)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_delimiters() {
        let boundary = Boundary::new("----WebKitFormBoundary7MA4YWxkTrZu0gW").unwrap();
        assert_eq!(boundary.delimiter(), b"------WebKitFormBoundary7MA4YWxkTrZu0gW");
        assert_eq!(boundary.close_delimiter(), b"------WebKitFormBoundary7MA4YWxkTrZu0gW--");
    }

    #[test]
    fn rejects_invalid_tokens() {
        assert!(Boundary::new("").is_err());
        assert!(Boundary::new("ends with space ").is_err());
        assert!(Boundary::new("tab\tinside").is_err());
        assert!(Boundary::new(vec![b'a'; 202]).is_err());
        assert!(matches!(Boundary::new("caf\u{e9}"), Err(DecodeError::InvalidBoundary { .. })));
    }

    #[test]
    fn accepts_edge_tokens() {
        assert!(Boundary::new("x").is_ok());
        assert!(Boundary::new("inner space").is_ok());
        assert!(Boundary::new(vec![b'a'; 201]).is_ok());
    }
}
