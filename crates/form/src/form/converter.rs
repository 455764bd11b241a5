//! Type converters selected by `:tag` suffixes.
//!
//! A [`TypeConverterRegistry`] maps tag names to [`TypeConverter`]s. Lookups
//! read an immutable snapshot and never block; registering swaps in a new
//! snapshot.
//!
//! Built-in tags: `int`, `long`, `float`, `string`, `text`, `required`,
//! `tokens`, `lines`, `boolean`.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::form::value::{FormValue, Scalar};
use crate::protocol::{ConversionError, RegistryError};

pub type ConvertResult = Result<FormValue, ConversionError>;

/// Converts the decoded text of a field. Files are passed as their content.
pub trait TypeConverter: Send + Sync + 'static {
    fn convert(&self, value: &str) -> ConvertResult;
}

impl<F> TypeConverter for F
where
    F: Fn(&str) -> ConvertResult + Send + Sync + 'static,
{
    fn convert(&self, value: &str) -> ConvertResult {
        self(value)
    }
}

pub type ConverterRef = Arc<dyn TypeConverter>;

type ConverterMap = HashMap<String, ConverterRef>;

static GLOBAL_REGISTRY: Lazy<TypeConverterRegistry> = Lazy::new(TypeConverterRegistry::new);

/// Shared, cloneable table of converters.
///
/// Clones refer to the same table, a converter registered through one clone is
/// visible through all of them.
#[derive(Clone)]
pub struct TypeConverterRegistry {
    converters: Arc<ArcSwap<ConverterMap>>,
}

impl Default for TypeConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeConverterRegistry {
    /// A registry holding the built-in converters.
    pub fn new() -> Self {
        let mut map = ConverterMap::new();
        map.insert("int".into(), Arc::new(field_to_int));
        map.insert("long".into(), Arc::new(field_to_long));
        map.insert("float".into(), Arc::new(field_to_float));
        map.insert("string".into(), Arc::new(field_to_string));
        map.insert("text".into(), Arc::new(field_to_text));
        map.insert("required".into(), Arc::new(field_to_required));
        map.insert("tokens".into(), Arc::new(field_to_tokens));
        map.insert("lines".into(), Arc::new(field_to_lines));
        map.insert("boolean".into(), Arc::new(field_to_boolean));
        Self { converters: Arc::new(ArcSwap::from_pointee(map)) }
    }

    /// A registry without any converter.
    pub fn empty() -> Self {
        Self { converters: Arc::new(ArcSwap::from_pointee(ConverterMap::new())) }
    }

    /// The process wide registry, initialised with the built-in converters.
    pub fn get_global_instance() -> &'static TypeConverterRegistry {
        &GLOBAL_REGISTRY
    }

    pub fn get(&self, tag: &str) -> Option<ConverterRef> {
        self.converters.load().get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.converters.load().contains_key(tag)
    }

    /// Adds a converter for `tag`, failing if one is already registered.
    pub fn register<C: TypeConverter>(&self, tag: &str, converter: C) -> Result<(), RegistryError> {
        self.store(tag, Arc::new(converter), false)
    }

    /// Adds a converter for `tag`, replacing any existing one.
    pub fn replace<C: TypeConverter>(&self, tag: &str, converter: C) {
        // cannot fail when replacing
        let _ = self.store(tag, Arc::new(converter), true);
    }

    fn store(&self, tag: &str, converter: ConverterRef, replace: bool) -> Result<(), RegistryError> {
        let mut current = self.converters.load();
        loop {
            if !replace && current.contains_key(tag) {
                return Err(RegistryError::AlreadyRegistered { field_type: tag.to_string() });
            }

            let mut next = ConverterMap::clone(&current);
            next.insert(tag.to_string(), Arc::clone(&converter));

            let previous = self.converters.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                debug!(tag, replace, "type converter registered");
                return Ok(());
            }
            current = previous;
        }
    }
}

impl std::fmt::Debug for TypeConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let converters = self.converters.load();
        let mut tags: Vec<_> = converters.keys().collect();
        tags.sort();
        f.debug_struct("TypeConverterRegistry").field("tags", &tags).finish()
    }
}

const EMPTY_INTEGER: &str = "Empty entry when <strong>integer</strong> expected";
const EMPTY_FLOAT: &str = "Empty entry when <strong>floating-point number</strong> expected";
const EMPTY_REQUIRED: &str = "No input for required field<p>";

fn field_to_string(value: &str) -> ConvertResult {
    Ok(FormValue::text(value))
}

fn field_to_text(value: &str) -> ConvertResult {
    Ok(FormValue::text(normalize_newlines(value)))
}

fn field_to_required(value: &str) -> ConvertResult {
    if value.trim().is_empty() {
        return Err(ConversionError::new(EMPTY_REQUIRED, value));
    }
    Ok(FormValue::text(value))
}

fn field_to_int(value: &str) -> ConvertResult {
    if value.is_empty() {
        return Err(ConversionError::new(EMPTY_INTEGER, value));
    }
    parse_integer(value)
        .and_then(|n| i64::try_from(n).ok())
        .map(|n| Scalar::Int(n).into())
        .ok_or_else(|| ConversionError::new(format!("An integer was expected in the value '{value}'"), value))
}

fn field_to_long(value: &str) -> ConvertResult {
    let value = match value.as_bytes().last() {
        Some(b'l' | b'L') => &value[..value.len() - 1],
        _ => value,
    };
    if value.is_empty() {
        return Err(ConversionError::new(EMPTY_INTEGER, value));
    }
    parse_integer(value)
        .map(|n| Scalar::Long(n).into())
        .ok_or_else(|| ConversionError::new(format!("A long integer was expected in the value '{value}'"), value))
}

fn field_to_float(value: &str) -> ConvertResult {
    if value.is_empty() {
        return Err(ConversionError::new(EMPTY_FLOAT, value));
    }
    strip_digit_underscores(value.trim())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|n| Scalar::Float(n).into())
        .ok_or_else(|| {
            ConversionError::new(format!("A floating-point number was expected in the value '{value}'"), value)
        })
}

fn field_to_tokens(value: &str) -> ConvertResult {
    Ok(Scalar::Strings(value.split_whitespace().map(str::to_string).collect()).into())
}

fn field_to_lines(value: &str) -> ConvertResult {
    Ok(Scalar::Strings(normalize_newlines(value).split('\n').map(str::to_string).collect()).into())
}

fn field_to_boolean(value: &str) -> ConvertResult {
    Ok(Scalar::Bool(!value.is_empty()).into())
}

/// `\r\n`, `\n\r` and a lone `\r` all become `\n`.
fn normalize_newlines(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                out.push('\n');
            }
            '\n' => {
                chars.next_if_eq(&'\r');
                out.push('\n');
            }
            c => out.push(c),
        }
    }
    out
}

/// Decimal integer with optional surrounding whitespace and sign.
///
/// Single underscores between digits are allowed: `1_000`.
fn parse_integer(value: &str) -> Option<i128> {
    let digits = strip_digit_underscores(value.trim())?;
    let unsigned = digits.strip_prefix(['+', '-']).unwrap_or(&digits);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Removes underscores that sit between two ASCII digits, `None` for any other underscore.
fn strip_digit_underscores(value: &str) -> Option<String> {
    if !value.contains('_') {
        return Some(value.to_string());
    }
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.char_indices() {
        if c == '_' {
            let before = i > 0 && bytes[i - 1].is_ascii_digit();
            let after = bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
            if !(before && after) {
                return None;
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}
