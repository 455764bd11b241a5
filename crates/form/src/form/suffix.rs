//! The `:type` suffix grammar of field names.
//!
//! A field name may carry tags after its base name, e.g. `count:int`,
//! `x.y:record`, `items:int:list`. [`FieldKey::parse`] strips them from the
//! right into an ordered list, [`FieldKey::interpret`] turns that list into a
//! [`FieldSpec`]. Both are pure: nothing leaks from one field into the next.

use bytes::Bytes;

use crate::form::converter::{ConverterRef, TypeConverterRegistry};

/// Bit set describing how a field is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConversionFlags(u8);

impl ConversionFlags {
    pub const SEQUENCE: Self = Self(1);
    pub const DEFAULT: Self = Self(1 << 1);
    pub const RECORD: Self = Self(1 << 2);
    pub const RECORDS: Self = Self(1 << 3);
    pub const CONVERTED: Self = Self(1 << 4);
    pub const IGNORE_EMPTY: Self = Self(1 << 5);

    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// RECORD or RECORDS
    #[inline]
    pub const fn is_record(self) -> bool {
        self.0 & (Self::RECORD.0 | Self::RECORDS.0) != 0
    }
}

impl std::ops::BitOr for ConversionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One tag stripped from a field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixTag {
    name: String,
    stem: Bytes,
    coordinate: bool,
}

impl SuffixTag {
    /// Tag text without the leading `:`, `x` or `y` for coordinates.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field name to the left of this tag, with the tags further left still attached.
    #[inline]
    pub fn stem(&self) -> &[u8] {
        &self.stem
    }

    /// An image button coordinate (`.x` / `.y`), always inert.
    #[inline]
    pub fn is_coordinate(&self) -> bool {
        self.coordinate
    }
}

/// A raw field name split into its base name and suffix tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    raw: Bytes,
    base_len: usize,
    tags: Vec<SuffixTag>,
}

impl FieldKey {
    /// Strips suffix tags from the right of `name`.
    ///
    /// While the remaining name contains a `:`, a trailing `:tag` with `tag`
    /// matching `[A-Za-z][A-Za-z0-9_]+` is stripped, or else a trailing `.x`
    /// or `.y`. Anything else ends the scan. Tags are returned right to left.
    pub fn parse(name: impl Into<Bytes>) -> Self {
        let raw = name.into();
        let mut tags = vec![];
        let mut end = raw.len();

        while let Some(colon) = memchr::memrchr(b':', &raw[..end]) {
            let tail = &raw[colon + 1..end];
            let (start, tag_name, coordinate) = if is_tag_name(tail) {
                (colon, String::from_utf8_lossy(tail).into_owned(), false)
            } else if end >= 2 && matches!(&raw[end - 2..end], b".x" | b".y") {
                (end - 2, String::from_utf8_lossy(&raw[end - 1..end]).into_owned(), true)
            } else {
                break;
            };

            tags.push(SuffixTag { name: tag_name, stem: raw.slice(..start), coordinate });
            end = start;
        }

        Self { raw, base_len: end, tags }
    }

    /// The name as sent.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The name with every tag stripped.
    #[inline]
    pub fn base(&self) -> &[u8] {
        &self.raw[..self.base_len]
    }

    /// Tags in stripping order, rightmost first.
    #[inline]
    pub fn tags(&self) -> &[SuffixTag] {
        &self.tags
    }

    /// Resolves the tags against `registry`.
    ///
    /// Tags are applied right to left, so of several converter tags the
    /// leftmost one wins. Unknown tags are ignored. A name carrying both
    /// `:record` and `:records` is treated as `:record`.
    pub fn interpret(&self, registry: &TypeConverterRegistry) -> FieldSpec {
        let mut spec = FieldSpec::default();

        for tag in &self.tags {
            if tag.coordinate {
                continue;
            }

            if let Some(converter) = registry.get(&tag.name) {
                spec.converter = Some((tag.name.clone(), converter));
                spec.flags.insert(ConversionFlags::CONVERTED);
                continue;
            }

            match tag.name.as_str() {
                "list" => spec.flags.insert(ConversionFlags::SEQUENCE),
                "tuple" => {
                    spec.flags.insert(ConversionFlags::SEQUENCE);
                    spec.tuple_stems.push(tag.stem.clone());
                }
                "record" => spec.flags.insert(ConversionFlags::RECORD),
                "records" => spec.flags.insert(ConversionFlags::RECORDS),
                "default" => spec.flags.insert(ConversionFlags::DEFAULT),
                "ignore_empty" => spec.flags.insert(ConversionFlags::IGNORE_EMPTY),
                "method" | "action" => spec.dispatch.push(DispatchTag { stem: tag.stem.clone(), fallback: false }),
                "default_method" | "default_action" => {
                    spec.dispatch.push(DispatchTag { stem: tag.stem.clone(), fallback: true });
                }
                _ => {}
            }
        }

        if spec.flags.contains(ConversionFlags::RECORD) {
            spec.flags.remove(ConversionFlags::RECORDS);
        }
        spec
    }
}

fn is_tag_name(text: &[u8]) -> bool {
    match text.split_first() {
        Some((first, rest)) => {
            first.is_ascii_alphabetic()
                && !rest.is_empty()
                && rest.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        }
        None => false,
    }
}

/// A `:method` style tag naming the view to dispatch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTag {
    stem: Bytes,
    fallback: bool,
}

impl DispatchTag {
    /// The name left of the tag; empty means the field value is the token.
    #[inline]
    pub fn stem(&self) -> &[u8] {
        &self.stem
    }

    /// `:default_method` / `:default_action`, only used when no token is set yet.
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// What the tags of one field ask for.
#[derive(Default, Clone)]
pub struct FieldSpec {
    pub(crate) flags: ConversionFlags,
    pub(crate) converter: Option<(String, ConverterRef)>,
    pub(crate) tuple_stems: Vec<Bytes>,
    pub(crate) dispatch: Vec<DispatchTag>,
}

impl FieldSpec {
    #[inline]
    pub fn flags(&self) -> ConversionFlags {
        self.flags
    }

    /// Tag of the converter to run, if any.
    pub fn converter_name(&self) -> Option<&str> {
        self.converter.as_ref().map(|(name, _)| name.as_str())
    }

    /// Stems of the `:tuple` tags.
    pub fn tuple_stems(&self) -> &[Bytes] {
        &self.tuple_stems
    }

    pub fn dispatch(&self) -> &[DispatchTag] {
        &self.dispatch
    }
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("flags", &self.flags)
            .field("converter", &self.converter_name())
            .field("tuple_stems", &self.tuple_stems)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag_names(key: &FieldKey) -> Vec<&str> {
        key.tags().iter().map(SuffixTag::name).collect()
    }

    #[test]
    fn no_suffix_is_unchanged() {
        let key = FieldKey::parse("plain.name");
        assert_eq!(key.base(), b"plain.name");
        assert!(key.tags().is_empty());
    }

    #[test]
    fn strips_from_the_right() {
        let key = FieldKey::parse("items:int:list");
        assert_eq!(key.base(), b"items");
        assert_eq!(tag_names(&key), vec!["list", "int"]);
        assert_eq!(key.tags()[0].stem(), b"items:int");
        assert_eq!(key.tags()[1].stem(), b"items");
    }

    #[test]
    fn record_keeps_dotted_attribute() {
        let key = FieldKey::parse("x.y:record");
        assert_eq!(key.base(), b"x.y");
        assert_eq!(tag_names(&key), vec!["record"]);
    }

    #[test]
    fn coordinates_need_a_colon_on_the_left() {
        let key = FieldKey::parse("submit:method.x");
        assert_eq!(key.base(), b"submit");
        assert!(key.tags()[0].is_coordinate());
        assert_eq!(key.tags()[1].name(), "method");

        let key = FieldKey::parse("image.x");
        assert_eq!(key.base(), b"image.x");
    }

    #[test]
    fn single_letter_and_invalid_tags_stop_the_scan() {
        assert_eq!(FieldKey::parse("a:b").base(), b"a:b");
        assert_eq!(FieldKey::parse("a:1x").base(), b"a:1x");
        assert_eq!(FieldKey::parse("a:bad-tag:int").base(), b"a:bad-tag");
        assert_eq!(FieldKey::parse("time:12:30").base(), b"time:12:30");
    }

    #[test]
    fn interpret_flags() {
        let registry = TypeConverterRegistry::new();

        let spec = FieldKey::parse("a:int:list:ignore_empty").interpret(&registry);
        assert!(spec.flags().contains(ConversionFlags::CONVERTED | ConversionFlags::SEQUENCE));
        assert!(spec.flags().contains(ConversionFlags::IGNORE_EMPTY));
        assert_eq!(spec.converter_name(), Some("int"));

        let spec = FieldKey::parse("a:float:int").interpret(&registry);
        assert_eq!(spec.converter_name(), Some("float"));

        let spec = FieldKey::parse("a:unknown").interpret(&registry);
        assert!(spec.flags().is_empty());
    }

    #[test]
    fn record_wins_over_records() {
        let registry = TypeConverterRegistry::new();
        let spec = FieldKey::parse("a.b:records:record").interpret(&registry);
        assert!(spec.flags().contains(ConversionFlags::RECORD));
        assert!(!spec.flags().contains(ConversionFlags::RECORDS));
    }

    #[test]
    fn tuple_and_dispatch_stems() {
        let registry = TypeConverterRegistry::new();

        let spec = FieldKey::parse("x.y:record:tuple").interpret(&registry);
        assert_eq!(spec.tuple_stems(), &[Bytes::from_static(b"x.y:record")]);

        let spec = FieldKey::parse("save:method").interpret(&registry);
        assert_eq!(spec.dispatch()[0].stem(), b"save");
        assert!(!spec.dispatch()[0].is_fallback());

        let spec = FieldKey::parse(":default_action").interpret(&registry);
        assert!(spec.dispatch()[0].stem().is_empty());
        assert!(spec.dispatch()[0].is_fallback());
    }
}
