//! Types shared by the body parser and the form assembler.
//!
//! - [`MultipartItem`]: what the multipart decoder yields, header or body chunk
//! - [`Part`]: one named input, value or file, with its body
//! - [`FormRequest`]: an HTTP request head that turns its inputs into a form
//! - errors: [`FormError`] at the top, [`DecodeError`] for transport failures,
//!   [`ConversionError`] for rejected field values

mod message;
pub use message::MultipartItem;

mod part;
pub use part::Part;
pub use part::PartBody;
pub use part::PartKind;

mod request;
pub use request::FormRequest;

mod error;
pub use error::ConversionError;
pub use error::DecodeError;
pub use error::FormError;
pub use error::RegistryError;
pub use error::TruncatedStage;
