//! Body decoding: from a raw request payload to an ordered list of parts.
//!
//! # Architecture
//!
//! - [`BodyParser`]: picks a decoder from the content type and drives it, from a
//!   blocking reader or from an `http_body::Body`
//! - [`UrlEncodedDecoder`]: `application/x-www-form-urlencoded` pairs
//! - [`MultipartDecoder`]: line based `multipart/*` state machine, with
//!   boundary and part header parsing in [`multipart`]
//! - [`Spool`] / [`SpooledBody`]: memory-or-temporary-file storage for part bodies
//!
//! Both decoders implement [`tokio_util::codec::Decoder`], so they can also be
//! plugged into a `FramedRead` directly.
//!
//! # Example
//!
//! ```
//! use micro_form::codec::BodyParser;
//!
//! let body = b"a=1&b=2";
//! let parts = BodyParser::default()
//!     .parse(&body[..], Some("application/x-www-form-urlencoded"), Some(body.len() as u64), None)
//!     .unwrap();
//!
//! assert_eq!(parts.len(), 2);
//! assert_eq!(parts[0].name(), b"a");
//! ```

pub mod multipart;
mod parser;
mod spool;
mod urlencoded;

pub use multipart::MultipartDecoder;
pub use parser::{BodyParser, FormEncoding, ParserConfig};
pub use parser::{DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_PARTS, DEFAULT_SPOOL_THRESHOLD};
pub use spool::{Spool, SpooledBody};
pub use urlencoded::UrlEncodedDecoder;
