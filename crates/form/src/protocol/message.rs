use bytes::Bytes;

use crate::codec::multipart::PartHead;

/// Represents an item in a decoded multipart stream.
///
/// The multipart decoder yields, for every part, a `Head`, zero or more
/// `Chunk`s of body data and a `PartEnd`; the stream finishes with `Eof`.
#[derive(Debug, Clone)]
pub enum MultipartItem {
    /// Header block of a new part
    Head(PartHead),
    /// A chunk of the current part's body
    Chunk(Bytes),
    /// The current part's body is complete
    PartEnd,
    /// Marks the end of the multipart body
    Eof,
}

impl MultipartItem {
    /// Returns true if this item marks the end of the multipart body
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, MultipartItem::Eof)
    }

    /// Returns true if this item contains chunk data
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, MultipartItem::Chunk(_))
    }

    /// Returns a reference to the contained bytes if this is a Chunk
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            MultipartItem::Chunk(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<Bytes> for MultipartItem {
    fn from(bytes: Bytes) -> Self {
        Self::Chunk(bytes)
    }
}
