//! Multipart body decoding.
//!
//! - [`Boundary`]: validated boundary token and its delimiter lines
//! - [`PartHead`]: the header block of one part
//! - [`MultipartDecoder`]: line based state machine producing [`MultipartItem`](crate::protocol::MultipartItem)s

mod boundary;
mod decoder;
mod header;

pub use boundary::Boundary;
pub use decoder::MultipartDecoder;
pub use header::PartHead;
pub(crate) use header::parse_params;
