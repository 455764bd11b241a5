use std::fmt;
use std::ops::Index;

use indexmap::IndexMap;
use indexmap::map::{Iter, Keys, Values};

use crate::upload::FileUpload;

/// A single converted field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Long(i128),
    Float(f64),
    Bool(bool),
    /// Result of the `tokens` and `lines` converters
    Strings(Vec<String>),
    File(FileUpload),
}

/// A value of the assembled form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Scalar(Scalar),
    List(Vec<FormValue>),
    /// Produced by `:tuple`, never extended after assembly
    Tuple(Vec<FormValue>),
    Record(Record),
}

impl FormValue {
    pub fn text(text: impl Into<String>) -> Self {
        FormValue::Scalar(Scalar::Text(text.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FormValue::Scalar(Scalar::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            FormValue::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FormValue::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            FormValue::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Items of a list or a tuple.
    pub fn as_slice(&self) -> Option<&[FormValue]> {
        match self {
            FormValue::List(items) | FormValue::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileUpload> {
        match self {
            FormValue::Scalar(Scalar::File(upload)) => Some(upload),
            _ => None,
        }
    }

    #[inline]
    pub fn is_list(&self) -> bool {
        matches!(self, FormValue::List(_))
    }

    #[inline]
    pub fn is_tuple(&self) -> bool {
        matches!(self, FormValue::Tuple(_))
    }

    #[inline]
    pub fn is_record(&self) -> bool {
        matches!(self, FormValue::Record(_))
    }

    /// Appends `item`, turning a non-list value into `[self, item]`.
    pub(crate) fn push(&mut self, item: FormValue) {
        match self {
            FormValue::List(items) => items.push(item),
            _ => {
                let first = std::mem::replace(self, FormValue::List(Vec::with_capacity(2)));
                if let FormValue::List(items) = self {
                    items.push(first);
                    items.push(item);
                }
            }
        }
    }

    /// Freezes the value: a list becomes a tuple, anything else a one-item tuple.
    pub(crate) fn into_tuple(self) -> FormValue {
        match self {
            FormValue::List(items) | FormValue::Tuple(items) => FormValue::Tuple(items),
            other => FormValue::Tuple(vec![other]),
        }
    }
}

impl From<Scalar> for FormValue {
    fn from(scalar: Scalar) -> Self {
        FormValue::Scalar(scalar)
    }
}

impl From<Record> for FormValue {
    fn from(record: Record) -> Self {
        FormValue::Record(record)
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        FormValue::text(text)
    }
}

impl From<String> for FormValue {
    fn from(text: String) -> Self {
        FormValue::text(text)
    }
}

impl PartialEq<&str> for FormValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(text) => write!(f, "{text:?}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Long(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Strings(items) => write!(f, "{items:?}"),
            Scalar::File(upload) => write!(f, "<FileUpload {:?}>", upload.filename()),
        }
    }
}

impl fmt::Display for FormValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormValue::Scalar(scalar) => fmt::Display::fmt(scalar, f),
            FormValue::List(items) => write_seq(f, "[", items, "]"),
            FormValue::Tuple(items) if items.len() == 1 => write!(f, "({},)", items[0]),
            FormValue::Tuple(items) => write_seq(f, "(", items, ")"),
            FormValue::Record(record) => write!(f, "{{{record}}}"),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[FormValue], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt::Display::fmt(item, f)?;
    }
    f.write_str(close)
}

/// An open attribute map built from `group.attribute` field names.
///
/// Attributes keep the order in which they were first set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    attrs: IndexMap<String, FormValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attr: &str) -> Option<&FormValue> {
        self.attrs.get(attr)
    }

    pub fn get_mut(&mut self, attr: &str) -> Option<&mut FormValue> {
        self.attrs.get_mut(attr)
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.attrs.contains_key(attr)
    }

    /// Sets `attr`, returning the previous value.
    pub fn insert(&mut self, attr: impl Into<String>, value: FormValue) -> Option<FormValue> {
        self.attrs.insert(attr.into(), value)
    }

    pub fn keys(&self) -> Keys<'_, String, FormValue> {
        self.attrs.keys()
    }

    pub fn values(&self) -> Values<'_, String, FormValue> {
        self.attrs.values()
    }

    pub fn iter(&self) -> Iter<'_, String, FormValue> {
        self.attrs.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a FormValue);
    type IntoIter = Iter<'a, String, FormValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Index<&str> for Record {
    type Output = FormValue;

    fn index(&self, attr: &str) -> &FormValue {
        &self.attrs[attr]
    }
}

/// Attributes sorted by name: `a: "1", b: ["2", "3"]`.
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attrs: Vec<_> = self.attrs.iter().collect();
        attrs.sort_by(|a, b| a.0.cmp(b.0));
        for (i, (attr, value)) in attrs.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attr}: {value}")?;
        }
        Ok(())
    }
}

/// The assembled form: field name to value, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Form {
    fields: IndexMap<String, FormValue>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FormValue> {
        self.fields.get_mut(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FormValue) -> Option<FormValue> {
        self.fields.insert(name.into(), value)
    }

    pub fn keys(&self) -> Keys<'_, String, FormValue> {
        self.fields.keys()
    }

    pub fn values(&self) -> Values<'_, String, FormValue> {
        self.fields.values()
    }

    pub fn iter(&self) -> Iter<'_, String, FormValue> {
        self.fields.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every uploaded file in the form, nested ones included.
    pub fn uploads(&self) -> Vec<&FileUpload> {
        fn collect<'a>(value: &'a FormValue, out: &mut Vec<&'a FileUpload>) {
            match value {
                FormValue::Scalar(Scalar::File(upload)) => out.push(upload),
                FormValue::Scalar(_) => {}
                FormValue::List(items) | FormValue::Tuple(items) => items.iter().for_each(|item| collect(item, out)),
                FormValue::Record(record) => record.values().for_each(|item| collect(item, out)),
            }
        }

        let mut out = vec![];
        self.fields.values().for_each(|value| collect(value, &mut out));
        out
    }

    pub(crate) fn fields_mut(&mut self) -> &mut IndexMap<String, FormValue> {
        &mut self.fields
    }
}

impl<'a> IntoIterator for &'a Form {
    type Item = (&'a String, &'a FormValue);
    type IntoIter = Iter<'a, String, FormValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Index<&str> for Form {
    type Output = FormValue;

    fn index(&self, name: &str) -> &FormValue {
        &self.fields[name]
    }
}
