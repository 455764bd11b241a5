//! Form assembly: from decoded [`Part`](crate::protocol::Part)s to a typed [`Form`].
//!
//! Field names may carry `:tag` suffixes that select a converter or the shape
//! the value is stored in:
//!
//! | suffix | effect |
//! |--------|--------|
//! | `:int`, `:float`, `:lines`, ... | run the registered [`TypeConverter`] |
//! | `:list` | always store a list |
//! | `:tuple` | like `:list`, frozen into a tuple at the end |
//! | `:record` | `group.attr` sets an attribute of the record `group` |
//! | `:records` | `group.attr` fills a list of records |
//! | `:default` | value used only when the form lacks it |
//! | `:ignore_empty` | drop the field when its value is empty |
//! | `:method`, `:action` | dispatch token, see [`AssembledForm::dispatch`] |
//!
//! ```
//! use micro_form::codec::UrlEncodedDecoder;
//! use micro_form::form::{FormAssembler, FormValue, Scalar, TypeConverterRegistry};
//!
//! let parts = UrlEncodedDecoder::decode_all(b"count:int=5&p.x:record=1&p.y:record=2");
//! let registry = TypeConverterRegistry::new();
//! let charsets = ["utf-8"];
//! let form = FormAssembler::new(&registry, &charsets).assemble(parts).unwrap().into_parts().0;
//!
//! assert_eq!(form["count"], FormValue::Scalar(Scalar::Int(5)));
//! assert_eq!(form["p"].as_record().unwrap().to_string(), r#"x: "1", y: "2""#);
//! ```

mod assembler;
mod charset;
mod converter;
mod suffix;
mod value;

pub use assembler::{AssembledForm, FormAssembler, is_reserved_name};
pub use charset::{AcceptCharset, CharsetsFn, PreferredCharsets};
pub use converter::{ConvertResult, ConverterRef, TypeConverter, TypeConverterRegistry};
pub use suffix::{ConversionFlags, DispatchTag, FieldKey, FieldSpec, SuffixTag};
pub use value::{Form, FormValue, Record, Scalar};
