//! Turns decoded parts into a typed [`Form`].
//!
//! Every part goes through the same steps:
//!
//! 1. split its name into base name and suffix tags ([`FieldKey`])
//! 2. drop reserved server / environment names
//! 3. decode name and value with the request charsets
//! 4. drop empty `:ignore_empty` values
//! 5. split `group.attribute` for `:record` / `:records`
//! 6. run the converter, falling back to a known default for empty input
//! 7. insert into the form, or into the defaults table for `:default`
//!
//! After the last part two finishing passes run: defaults fill what the form
//! lacks, then every `:tuple` field is frozen.

use std::borrow::Cow;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace, warn};

use crate::codec::SpooledBody;
use crate::form::charset::{CharsetDecoder, PreferredCharsets};
use crate::form::converter::TypeConverterRegistry;
use crate::form::suffix::{ConversionFlags, FieldKey, FieldSpec};
use crate::form::value::{Form, FormValue, Record, Scalar};
use crate::protocol::{FormError, Part, PartBody};
use crate::upload::FileUpload;

/// Names that belong to the server environment and never enter a form.
const RESERVED_NAMES: [&str; 18] = [
    "SERVER_SOFTWARE",
    "SERVER_NAME",
    "GATEWAY_INTERFACE",
    "SERVER_PROTOCOL",
    "SERVER_PORT",
    "REQUEST_METHOD",
    "PATH_INFO",
    "PATH_TRANSLATED",
    "SCRIPT_NAME",
    "QUERY_STRING",
    "REMOTE_HOST",
    "REMOTE_ADDR",
    "AUTH_TYPE",
    "REMOTE_USER",
    "REMOTE_IDENT",
    "CONTENT_TYPE",
    "CONTENT_LENGTH",
    "SERVER_URL",
];

/// Returns true for a reserved environment name or anything starting with `HTTP_`.
pub fn is_reserved_name(name: &[u8]) -> bool {
    name.starts_with(b"HTTP_") || RESERVED_NAMES.iter().any(|reserved| reserved.as_bytes() == name)
}

/// Result of one assembly pass.
#[derive(Debug, Default)]
pub struct AssembledForm {
    form: Form,
    dispatch: Option<String>,
}

impl AssembledForm {
    #[inline]
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// View name requested through `:method`, `:action` and their `default_` variants.
    #[inline]
    pub fn dispatch(&self) -> Option<&str> {
        self.dispatch.as_deref()
    }

    pub fn into_parts(self) -> (Form, Option<String>) {
        (self.form, self.dispatch)
    }
}

/// Builds a [`Form`] from an ordered sequence of parts.
pub struct FormAssembler<'a> {
    registry: &'a TypeConverterRegistry,
    charsets: CharsetDecoder<'a>,
}

impl std::fmt::Debug for FormAssembler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormAssembler").field("registry", self.registry).finish_non_exhaustive()
    }
}

/// A part value before conversion.
enum RawValue {
    Text(String),
    File(FileUpload),
}

impl RawValue {
    fn is_empty(&self) -> bool {
        match self {
            RawValue::Text(text) => text.is_empty(),
            RawValue::File(_) => false,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(text) => Some(text),
            RawValue::File(_) => None,
        }
    }

    fn into_form_value(self) -> FormValue {
        match self {
            RawValue::Text(text) => FormValue::Scalar(Scalar::Text(text)),
            RawValue::File(upload) => FormValue::Scalar(Scalar::File(upload)),
        }
    }
}

/// Tables filled while parts are processed.
#[derive(Default)]
struct Assembly {
    form: Form,
    defaults: IndexMap<String, FormValue>,
    tuple_keys: IndexSet<String>,
    dispatch: Option<String>,
}

impl Assembly {
    fn has_dispatch(&self) -> bool {
        self.dispatch.as_deref().is_some_and(|token| !token.is_empty())
    }
}

impl<'a> FormAssembler<'a> {
    /// `charsets` is asked for its list only once the first non-ASCII input shows up.
    pub fn new(registry: &'a TypeConverterRegistry, charsets: &'a dyn PreferredCharsets) -> Self {
        Self { registry, charsets: CharsetDecoder::new(charsets) }
    }

    /// Assembles `parts` in order.
    ///
    /// Fails on the first conversion error that no default covers; the parts
    /// not yet processed are dropped with their temporary files.
    pub fn assemble<I>(&self, parts: I) -> Result<AssembledForm, FormError>
    where
        I: IntoIterator<Item = Part>,
    {
        let mut assembly = Assembly::default();
        for part in parts {
            self.process(part, &mut assembly)?;
        }

        let Assembly { mut form, defaults, tuple_keys, dispatch } = assembly;
        merge_defaults(form.fields_mut(), defaults);
        self.freeze_tuples(form.fields_mut(), &tuple_keys);

        let dispatch = dispatch.filter(|token| !token.is_empty());
        trace!(fields = form.len(), dispatch = ?dispatch, "form assembled");
        Ok(AssembledForm { form, dispatch })
    }

    fn process(&self, part: Part, assembly: &mut Assembly) -> Result<(), FormError> {
        let (name, filename, headers, body) = part.into_parts();
        let key = FieldKey::parse(name);
        let spec = key.interpret(self.registry);

        let value = match filename.filter(|filename| !filename.is_empty()) {
            Some(filename) => {
                let body = match body {
                    PartBody::Spooled(body) => body,
                    PartBody::Bytes(bytes) => SpooledBody::from_bytes(bytes),
                };
                RawValue::File(FileUpload::new(&self.charsets.decode(&filename), headers, body))
            }
            None => RawValue::Text(self.charsets.decode_string(&body.into_bytes()?)),
        };

        self.apply_dispatch(&spec, &value, assembly);
        for stem in spec.tuple_stems() {
            assembly.tuple_keys.insert(self.charsets.decode_string(stem));
        }

        if is_reserved_name(key.raw()) || is_reserved_name(key.base()) {
            debug!(name = %String::from_utf8_lossy(key.raw()), "reserved field name dropped");
            return Ok(());
        }

        let flags = spec.flags();
        if flags.contains(ConversionFlags::IGNORE_EMPTY) && value.is_empty() {
            trace!(name = %String::from_utf8_lossy(key.raw()), "empty field ignored");
            return Ok(());
        }

        let base = self.charsets.decode_string(key.base());

        let (group, attr) = if flags.is_record() {
            match base.rfind('.') {
                Some(dot) => (base[..dot].to_string(), Some(base[dot + 1..].to_string())),
                None => (String::new(), Some(base.clone())),
            }
        } else {
            (base.clone(), None)
        };

        let item = match &spec.converter {
            Some((tag, converter)) => {
                let raw_empty = value.is_empty();
                let text = self.conversion_input(&value)?;
                match converter.convert(&text) {
                    Ok(converted) => converted,
                    Err(e) => match fallback(&assembly.defaults, &group, attr.as_deref(), flags, raw_empty) {
                        Some(default) => {
                            debug!(field = %base, converter = %tag, "empty value replaced by default");
                            default
                        }
                        None => return Err(FormError::conversion(&base, e)),
                    },
                }
            }
            None => value.into_form_value(),
        };

        let target = if flags.contains(ConversionFlags::DEFAULT) {
            &mut assembly.defaults
        } else {
            assembly.form.fields_mut()
        };
        insert_value(target, group, attr, item, flags);
        Ok(())
    }

    /// Records the dispatch token of `:method` style tags.
    fn apply_dispatch(&self, spec: &FieldSpec, value: &RawValue, assembly: &mut Assembly) {
        for tag in spec.dispatch() {
            if tag.is_fallback() && assembly.has_dispatch() {
                continue;
            }
            let token = if tag.stem().is_empty() {
                value.as_text().map(str::to_string)
            } else {
                Some(self.charsets.decode_string(tag.stem()))
            };
            if token.is_some() {
                assembly.dispatch = token;
            }
        }
    }

    /// Text handed to a converter; files are read completely.
    fn conversion_input<'v>(&self, value: &'v RawValue) -> Result<Cow<'v, str>, FormError> {
        match value {
            RawValue::Text(text) => Ok(Cow::Borrowed(text)),
            RawValue::File(upload) => {
                let contents = upload.contents()?;
                Ok(Cow::Owned(self.charsets.decode_string(&contents)))
            }
        }
    }

    /// Second finishing pass: freezes every `:tuple` field.
    ///
    /// The key, tags stripped, names the field to convert. When no such field
    /// exists a key `group.attr` converts that attribute on the record, or on
    /// every record of a list, stored under `group`.
    fn freeze_tuples(&self, form: &mut IndexMap<String, FormValue>, tuple_keys: &IndexSet<String>) {
        for key in tuple_keys {
            let field = key.split(':').next().unwrap_or_default();
            if let Some(value) = form.get_mut(field) {
                freeze(value);
                continue;
            }

            let (group, attr) = match field.rfind('.') {
                Some(dot) => (&field[..dot], &field[dot + 1..]),
                None => ("", field),
            };
            match form.get_mut(group) {
                Some(FormValue::Record(record)) => freeze_attr(record, attr),
                Some(FormValue::List(rows)) => rows
                    .iter_mut()
                    .filter_map(FormValue::as_record_mut)
                    .for_each(|record| freeze_attr(record, attr)),
                _ => {}
            }
        }
    }
}

/// The default standing in for an empty value that failed conversion.
///
/// Only applies when the raw value was empty, the field is not itself a
/// default and a default for the key (and attribute) is known.
fn fallback(
    defaults: &IndexMap<String, FormValue>,
    group: &str,
    attr: Option<&str>,
    flags: ConversionFlags,
    raw_empty: bool,
) -> Option<FormValue> {
    if !raw_empty || flags.contains(ConversionFlags::DEFAULT) {
        return None;
    }

    let default = defaults.get(group)?;
    match attr {
        Some(attr) if flags.contains(ConversionFlags::RECORD) => default.as_record()?.get(attr).cloned(),
        Some(attr) if flags.contains(ConversionFlags::RECORDS) => {
            default.as_slice()?.last()?.as_record()?.get(attr).cloned()
        }
        _ => Some(default.clone()),
    }
}

/// Stores one converted value following its flags.
///
/// | record | records | sequence | effect |
/// |--------|---------|----------|--------|
/// | no     | no      | no       | set, repeats turn into a list |
/// | no     | no      | yes      | append to a list |
/// | yes    | -       | no       | set the attribute of the record |
/// | yes    | -       | yes      | append to a list attribute of the record |
/// | -      | yes     | any      | set on the last record, or start a new one once it has the attribute |
fn insert_value(
    map: &mut IndexMap<String, FormValue>,
    key: String,
    attr: Option<String>,
    item: FormValue,
    flags: ConversionFlags,
) {
    let sequence = flags.contains(ConversionFlags::SEQUENCE);
    let wrap = |item: FormValue| if sequence { FormValue::List(vec![item]) } else { item };

    let Some(attr) = attr else {
        match map.get_mut(&key) {
            Some(existing) => existing.push(item),
            None => {
                map.insert(key, wrap(item));
            }
        }
        return;
    };

    if flags.contains(ConversionFlags::RECORDS) {
        let entry = map.entry(key).or_insert_with(|| FormValue::List(vec![]));
        if !entry.is_list() {
            warn!(attr = %attr, "records field replaces a value of another shape");
            *entry = FormValue::List(vec![]);
        }
        let FormValue::List(rows) = entry else {
            return;
        };

        match rows.last_mut().and_then(FormValue::as_record_mut) {
            Some(last) if !last.contains(&attr) => {
                last.insert(attr, wrap(item));
            }
            Some(last) if sequence => {
                if let Some(existing) = last.get_mut(&attr) {
                    existing.push(item);
                }
            }
            _ => {
                let mut row = Record::new();
                row.insert(attr, wrap(item));
                rows.push(FormValue::Record(row));
            }
        }
        return;
    }

    let entry = map.entry(key).or_insert_with(|| FormValue::Record(Record::new()));
    if !entry.is_record() {
        warn!(attr = %attr, "record field replaces a value of another shape");
        *entry = FormValue::Record(Record::new());
    }
    let FormValue::Record(record) = entry else {
        return;
    };

    match record.get_mut(&attr) {
        Some(existing) if sequence => existing.push(item),
        _ => {
            record.insert(attr, wrap(item));
        }
    }
}

/// First finishing pass: defaults fill absent keys and absent record attributes.
fn merge_defaults(form: &mut IndexMap<String, FormValue>, defaults: IndexMap<String, FormValue>) {
    for (key, default) in defaults {
        let Some(present) = form.get_mut(&key) else {
            form.insert(key, default);
            continue;
        };

        match (present, default) {
            (FormValue::Record(record), FormValue::Record(default)) => fill_absent(record, &default),
            (FormValue::List(items), FormValue::List(defaults)) => {
                for default in defaults {
                    match default {
                        FormValue::Record(default) => items
                            .iter_mut()
                            .filter_map(FormValue::as_record_mut)
                            .for_each(|record| fill_absent(record, &default)),
                        scalar => {
                            if !items.contains(&scalar) {
                                items.push(scalar);
                            }
                        }
                    }
                }
            }
            // a present plain value always wins
            _ => {}
        }
    }
}

fn fill_absent(record: &mut Record, defaults: &Record) {
    for (attr, value) in defaults {
        if !record.contains(attr) {
            record.insert(attr.clone(), value.clone());
        }
    }
}

fn freeze_attr(record: &mut Record, attr: &str) {
    if let Some(value) = record.get_mut(attr) {
        freeze(value);
    }
}

fn freeze(value: &mut FormValue) {
    let taken = std::mem::replace(value, FormValue::List(vec![]));
    *value = taken.into_tuple();
}
