//! Live metadata views over an [`Image`](crate::Image).
//!
//! A [`MetadataStore`], every [`Datum`] it hands out and every
//! [`DatumIterator`] over it hold a strong handle to the image state. The
//! state is released when the last of them, or the image itself, is
//! dropped. Reads go through the state at call time, so a store obtained
//! before a mutation sees the mutated metadata.
//!
//! Mutating the image while an iteration is in progress is allowed but the
//! iteration then observes a shifting sequence: entries may be skipped or
//! seen twice. Finish enumerating before mutating.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::Metadata;
use crate::codec::exif::{ExifKey, ExifMetadata};
use crate::codec::iptc::{IptcKey, IptcMetadata};
use crate::codec::xmp::XmpMetadata;
use crate::error::{Error, Result};
use crate::image::Shared;

/// The metadata families an image carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataFormat {
    Exif,
    Iptc,
    Xmp,
}

impl MetadataFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exif => "exif",
            Self::Iptc => "iptc",
            Self::Xmp => "xmp",
        }
    }
}

impl fmt::Display for MetadataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exif" => Ok(Self::Exif),
            "iptc" => Ok(Self::Iptc),
            "xmp" => Ok(Self::Xmp),
            _ => Err(Error::precondition(format!("invalid metadata type: {s}"))),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Marker for one metadata family. Implemented by [`Exif`], [`Iptc`] and
/// [`Xmp`] only.
pub trait Family: sealed::Sealed + Send + Sync + 'static {
    const FORMAT: MetadataFormat;
}

/// The EXIF family.
#[derive(Debug, Clone, Copy)]
pub struct Exif;

/// The IPTC family.
#[derive(Debug, Clone, Copy)]
pub struct Iptc;

/// The XMP family.
#[derive(Debug, Clone, Copy)]
pub struct Xmp;

impl sealed::Sealed for Exif {}
impl sealed::Sealed for Iptc {}
impl sealed::Sealed for Xmp {}

impl Family for Exif {
    const FORMAT: MetadataFormat = MetadataFormat::Exif;
}

impl Family for Iptc {
    const FORMAT: MetadataFormat = MetadataFormat::Iptc;
}

impl Family for Xmp {
    const FORMAT: MetadataFormat = MetadataFormat::Xmp;
}

pub type ExifData = MetadataStore<Exif>;
pub type IptcData = MetadataStore<Iptc>;
pub type XmpData = MetadataStore<Xmp>;
pub type ExifDatum = Datum<Exif>;
pub type IptcDatum = Datum<Iptc>;
pub type XmpDatum = Datum<Xmp>;
pub type ExifDatumIterator = DatumIterator<Exif>;
pub type IptcDatumIterator = DatumIterator<Iptc>;
pub type XmpDatumIterator = DatumIterator<Xmp>;

/// Ordered, keyed entries of one family.
pub(crate) trait Entries {
    fn len(&self) -> usize;
    fn key_at(&self, index: usize) -> Option<String>;
    fn value_at(&self, index: usize) -> Option<String>;
    /// Index of the `occurrence`-th entry with `key`. Fails on malformed keys.
    fn position(&self, key: &str, occurrence: usize) -> Result<Option<usize>>;
}

impl Entries for ExifMetadata {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.key.render())
    }

    fn value_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.render(self.little_endian))
    }

    fn position(&self, key: &str, occurrence: usize) -> Result<Option<usize>> {
        let key = ExifKey::parse(key)?;
        Ok(self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, d)| d.key == key)
            .nth(occurrence)
            .map(|(i, _)| i))
    }
}

impl Entries for IptcMetadata {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.key.render())
    }

    fn value_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.value.render())
    }

    fn position(&self, key: &str, occurrence: usize) -> Result<Option<usize>> {
        let key = IptcKey::parse(key)?;
        Ok(IptcMetadata::position(self, &key, occurrence))
    }
}

impl Entries for XmpMetadata {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn key_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.key.render())
    }

    fn value_at(&self, index: usize) -> Option<String> {
        self.entries.get(index).map(|d| d.value.render())
    }

    fn position(&self, key: &str, occurrence: usize) -> Result<Option<usize>> {
        let key = self.parse_key(key)?;
        Ok(XmpMetadata::position(self, &key, occurrence))
    }
}

fn entries<F: Family>(metadata: &Metadata) -> &dyn Entries {
    match F::FORMAT {
        MetadataFormat::Exif => &metadata.exif,
        MetadataFormat::Iptc => &metadata.iptc,
        MetadataFormat::Xmp => &metadata.xmp,
    }
}

/// Anything that can look a key up and render its value.
pub trait MetadataProvider {
    fn get_string(&self, key: &str) -> Result<String>;
}

/// A live view of one metadata family of an image.
pub struct MetadataStore<F: Family> {
    image: Shared,
    family: PhantomData<fn() -> F>,
}

impl<F: Family> MetadataStore<F> {
    pub(crate) fn new(image: Shared) -> Self {
        Self {
            image,
            family: PhantomData,
        }
    }

    /// Look `key` up. `Ok(None)` when the key is well formed but has no
    /// value; an error only when the key itself is malformed.
    pub fn find_key(&self, key: &str) -> Result<Option<Datum<F>>> {
        let state = self.image.read();
        let entries = entries::<F>(state.metadata());
        let Some(index) = entries.position(key, 0)? else {
            return Ok(None);
        };
        Ok(entries.key_at(index).map(|key| Datum {
            image: self.image.clone(),
            key,
            occurrence: 0,
            family: PhantomData,
        }))
    }

    /// Rendered value of `key`, or [`Error::KeyNotFound`].
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.find_key(key)?
            .map(|datum| datum.to_string())
            .ok_or(Error::KeyNotFound)
    }

    /// Every entry rendered, keyed by entry key. Of repeated keys the last
    /// occurrence wins.
    pub fn all_tags(&self) -> BTreeMap<String, String> {
        self.iterator()
            .map(|datum| {
                let value = datum.to_string();
                (datum.key, value)
            })
            .collect()
    }

    /// A fresh forward-only cursor positioned before the first entry.
    pub fn iterator(&self) -> DatumIterator<F> {
        DatumIterator {
            image: self.image.clone(),
            cursor: 0,
            seen: HashMap::new(),
            family: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        entries::<F>(self.image.read().metadata()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> MetadataFormat {
        F::FORMAT
    }
}

impl<F: Family> Clone for MetadataStore<F> {
    fn clone(&self) -> Self {
        Self::new(self.image.clone())
    }
}

impl<F: Family> fmt::Debug for MetadataStore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataStore")
            .field("format", &F::FORMAT)
            .field("len", &self.len())
            .finish()
    }
}

impl<F: Family> MetadataProvider for MetadataStore<F> {
    fn get_string(&self, key: &str) -> Result<String> {
        MetadataStore::<F>::get_string(self, key)
    }
}

/// One entry of a store. Renders the value current at the time of the call;
/// an entry whose key has since been stripped renders as an empty string.
pub struct Datum<F: Family> {
    image: Shared,
    key: String,
    /// Which of several entries sharing `key` this is.
    occurrence: usize,
    family: PhantomData<fn() -> F>,
}

impl<F: Family> Datum<F> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<F: Family> fmt::Display for Datum<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.image.read();
        let entries = entries::<F>(state.metadata());
        let value = match entries.position(&self.key, self.occurrence) {
            Ok(Some(index)) => entries.value_at(index).unwrap_or_default(),
            _ => String::new(),
        };
        f.write_str(&value)
    }
}

impl<F: Family> fmt::Debug for Datum<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datum")
            .field("key", &self.key)
            .field("occurrence", &self.occurrence)
            .finish()
    }
}

impl<F: Family> Clone for Datum<F> {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            key: self.key.clone(),
            occurrence: self.occurrence,
            family: PhantomData,
        }
    }
}

/// Forward-only, single-pass cursor over a store.
pub struct DatumIterator<F: Family> {
    image: Shared,
    cursor: usize,
    /// Entries already yielded per key, to address repeated keys.
    seen: HashMap<String, usize>,
    family: PhantomData<fn() -> F>,
}

impl<F: Family> DatumIterator<F> {
    /// Whether [`Iterator::next`] would yield an entry. No side effects.
    pub fn has_next(&self) -> bool {
        self.cursor < entries::<F>(self.image.read().metadata()).len()
    }
}

impl<F: Family> Iterator for DatumIterator<F> {
    type Item = Datum<F>;

    fn next(&mut self) -> Option<Datum<F>> {
        let key = entries::<F>(self.image.read().metadata()).key_at(self.cursor)?;
        self.cursor += 1;

        let seen = self.seen.entry(key.clone()).or_insert(0);
        let occurrence = *seen;
        *seen += 1;

        Some(Datum {
            image: self.image.clone(),
            key,
            occurrence,
            family: PhantomData,
        })
    }
}

impl<F: Family> fmt::Debug for DatumIterator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatumIterator")
            .field("format", &F::FORMAT)
            .field("cursor", &self.cursor)
            .finish()
    }
}
