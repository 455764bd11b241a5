use std::io;

use bytes::Bytes;
use http::HeaderMap;

use crate::codec::SpooledBody;

/// Whether a part carries a plain value or an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Value,
    File,
}

/// Body of a [`Part`].
#[derive(Debug)]
pub enum PartBody {
    /// Raw value bytes, still in the request's charset
    Bytes(Bytes),
    /// Multipart body held in memory or in a temporary file
    Spooled(SpooledBody),
}

impl PartBody {
    pub fn len(&self) -> u64 {
        match self {
            PartBody::Bytes(bytes) => bytes.len() as u64,
            PartBody::Spooled(body) => body.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the complete body.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            PartBody::Bytes(bytes) => Ok(bytes),
            PartBody::Spooled(body) => body.into_bytes(),
        }
    }
}

/// One named piece of a decoded request payload.
///
/// Names and file names are kept as raw bytes; they are decoded with the
/// request charsets when the form is assembled.
#[derive(Debug)]
pub struct Part {
    name: Bytes,
    filename: Option<Bytes>,
    headers: HeaderMap,
    body: PartBody,
}

impl Part {
    /// A `name=value` pair from a query string or an url-encoded body.
    pub fn value(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { name: name.into(), filename: None, headers: HeaderMap::new(), body: PartBody::Bytes(value.into()) }
    }

    pub fn new(name: Bytes, filename: Option<Bytes>, headers: HeaderMap, body: PartBody) -> Self {
        Self { name, filename, headers, body }
    }

    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn filename(&self) -> Option<&[u8]> {
        self.filename.as_deref()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &PartBody {
        &self.body
    }

    /// `File` when the part declares a non-empty file name.
    pub fn kind(&self) -> PartKind {
        match &self.filename {
            Some(filename) if !filename.is_empty() => PartKind::File,
            _ => PartKind::Value,
        }
    }

    #[inline]
    pub fn is_file(&self) -> bool {
        self.kind() == PartKind::File
    }

    pub fn into_parts(self) -> (Bytes, Option<Bytes>, HeaderMap, PartBody) {
        (self.name, self.filename, self.headers, self.body)
    }
}
