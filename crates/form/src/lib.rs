//! Decoding of HTTP form inputs into typed, nested application data
//!
//! This crate turns the query string and body of an HTTP request into a
//! [`form::Form`]. It works in two stages:
//!
//! - the body parser ([`codec::BodyParser`]) splits a URL-encoded or
//!   multipart body into an ordered list of named [`protocol::Part`]s,
//!   spilling large parts to anonymous temporary files
//! - the form assembler ([`form::FormAssembler`]) reads the `:type` suffixes
//!   of field names and builds typed scalars, lists, tuples and records
//!
//! # Features
//!
//! - URL-encoded and multipart bodies, nested `multipart/mixed` included
//! - Synchronous (`std::io::Read`) and asynchronous (`http_body::Body`) input
//! - Bounded by the declared content length, never reads past it
//! - Tolerant of malformed part headers, strict on truncated input
//! - Pluggable type converters through a shared registry
//! - Charset fallback for names and values driven by the client preferences
//!
//! # Example
//!
//! ```
//! use http::{Method, Request};
//! use micro_form::form::{FormValue, Scalar};
//! use micro_form::protocol::FormRequest;
//!
//! let head = Request::builder()
//!     .method(Method::POST)
//!     .uri("/edit?id:int=7")
//!     .header("content-type", "application/x-www-form-urlencoded")
//!     .body(())
//!     .unwrap();
//!
//! let mut request = FormRequest::new(head);
//! let form = request.process_inputs(&b"tags:list=a&tags:list=b&save:method=Save"[..]).unwrap();
//!
//! assert_eq!(form["id"], FormValue::Scalar(Scalar::Int(7)));
//! assert_eq!(form["tags"], FormValue::List(vec!["a".into(), "b".into()]));
//! assert_eq!(request.dispatch(), Some("save"));
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: parts, errors and the [`protocol::FormRequest`] wrapper
//! - [`codec`]: the URL-encoded and multipart decoders and their drivers
//! - [`form`]: suffix grammar, converters, values and the assembler
//! - [`upload`]: the [`upload::FileUpload`] handle for uploaded files
//!
//! # Error Handling
//!
//! - [`protocol::FormError`]: top-level error type
//! - [`protocol::DecodeError`]: transport failures, abort the whole parse
//! - [`protocol::ConversionError`]: a converter rejected a field value
//!
//! # Limitations
//!
//! - Multipart lines are capped at 64KB
//! - Maximum part header size: 8KB by default
//! - Maximum number of parts: 1024 by default

pub mod codec;
pub mod form;
pub mod protocol;
pub mod upload;

mod utils;
pub(crate) use utils::ensure;
