//! EXIF metadata: keys, tag names and the IFD tree.
//!
//! Decoding and layout go through kamadak-exif (`Reader::read_raw` and the
//! experimental `Writer`); this module maps its fields onto
//! `Exif.<Group>.<Tag>` keys and text values.

use std::io::Cursor;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::LazyLock;

use ::exif::experimental::Writer;
use ::exif::{Context, Field, In, Rational, Reader, SRational, Tag, Value};
use img_parts::Bytes;

use crate::error::{Error, ErrorCode, Result};

pub(crate) const TAG_IPTC: u16 = 0x83bb;
pub(crate) const TAG_XMP: u16 = 0x02bc;
pub(crate) const TAG_ICC: u16 = 0x8773;
const TAG_USER_COMMENT: u16 = 0x9286;
const XP_TAGS: RangeInclusive<u16> = 0x9c9b..=0x9c9f;

/// Tags the writer synthesizes from the tree it lays out.
const LAYOUT_TAGS: [Tag; 9] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

const UNICODE_CHARSET: &[u8; 8] = b"UNICODE\0";
const ASCII_CHARSET: &[u8; 8] = b"ASCII\0\0\0";

/// The IFD an EXIF entry belongs to, named as in keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Group {
    Image,
    Photo,
    Iop,
    GpsInfo,
    Thumbnail,
}

impl Group {
    fn name(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Photo => "Photo",
            Self::Iop => "Iop",
            Self::GpsInfo => "GPSInfo",
            Self::Thumbnail => "Thumbnail",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Image" => Self::Image,
            "Photo" => Self::Photo,
            "Iop" => Self::Iop,
            "GPSInfo" => Self::GpsInfo,
            "Thumbnail" => Self::Thumbnail,
            _ => return None,
        })
    }

    /// IFD1 shares the IFD0 tag space.
    fn context(self) -> Context {
        match self {
            Self::Image | Self::Thumbnail => Context::Tiff,
            Self::Photo => Context::Exif,
            Self::Iop => Context::Interop,
            Self::GpsInfo => Context::Gps,
        }
    }

    fn ifd(self) -> In {
        match self {
            Self::Thumbnail => In::THUMBNAIL,
            _ => In::PRIMARY,
        }
    }

    /// Group of a decoded field. Sub-IFDs hanging off IFD1 and any IFD
    /// past it have no key.
    fn of(tag: Tag, ifd: In) -> Option<Self> {
        let primary = ifd == In::PRIMARY;
        match tag.context() {
            Context::Tiff if primary => Some(Self::Image),
            Context::Tiff if ifd == In::THUMBNAIL => Some(Self::Thumbnail),
            Context::Exif if primary => Some(Self::Photo),
            Context::Interop if primary => Some(Self::Iop),
            Context::Gps if primary => Some(Self::GpsInfo),
            _ => None,
        }
    }
}

/// Key names that kamadak-exif lacks or spells differently.
const NAMES: &[(Context, u16, &str)] = &[
    (Context::Tiff, 0x000b, "ProcessingSoftware"),
    (Context::Tiff, 0x00fe, "NewSubfileType"),
    (Context::Tiff, 0x02bc, "XMLPacket"),
    (Context::Tiff, 0x4746, "Rating"),
    (Context::Tiff, 0x83bb, "IPTCNAA"),
    (Context::Tiff, 0x8769, "ExifTag"),
    (Context::Tiff, 0x8773, "InterColorProfile"),
    (Context::Tiff, 0x8825, "GPSTag"),
    (Context::Tiff, 0x9c9b, "XPTitle"),
    (Context::Tiff, 0x9c9c, "XPComment"),
    (Context::Tiff, 0x9c9d, "XPAuthor"),
    (Context::Tiff, 0x9c9e, "XPKeywords"),
    (Context::Tiff, 0x9c9f, "XPSubject"),
    (Context::Exif, 0x8827, "ISOSpeedRatings"),
    (Context::Exif, 0xa005, "InteroperabilityTag"),
    (Context::Interop, 0x0001, "InteroperabilityIndex"),
    (Context::Interop, 0x0002, "InteroperabilityVersion"),
];

/// Every tag kamadak-exif has a dictionary entry for, with its name.
static KNOWN_TAGS: LazyLock<Vec<(Tag, String)>> = LazyLock::new(|| {
    [Context::Tiff, Context::Exif, Context::Gps, Context::Interop]
        .into_iter()
        .flat_map(|context| (0..=u16::MAX).map(move |number| Tag(context, number)))
        .filter(|tag| tag.description().is_some())
        .map(|tag| (tag, tag.to_string()))
        .collect()
});

/// Component type of a value, used to parse text into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Byte,
    Ascii,
    Short,
    Long,
    Rational,
    SByte,
    Undefined,
    SShort,
    SLong,
    SRational,
    Float,
    Double,
}

/// Types of tags a value may be created for from scratch. Tags already
/// present keep the type they were decoded with.
const KINDS: &[(Context, u16, Kind)] = &[
    (Context::Tiff, 0x000b, Kind::Ascii),
    (Context::Tiff, 0x00fe, Kind::Long),
    (Context::Tiff, 0x0100, Kind::Long),
    (Context::Tiff, 0x0101, Kind::Long),
    (Context::Tiff, 0x0102, Kind::Short),
    (Context::Tiff, 0x0103, Kind::Short),
    (Context::Tiff, 0x0106, Kind::Short),
    (Context::Tiff, 0x010e, Kind::Ascii),
    (Context::Tiff, 0x010f, Kind::Ascii),
    (Context::Tiff, 0x0110, Kind::Ascii),
    (Context::Tiff, 0x0112, Kind::Short),
    (Context::Tiff, 0x0115, Kind::Short),
    (Context::Tiff, 0x0116, Kind::Long),
    (Context::Tiff, 0x011a, Kind::Rational),
    (Context::Tiff, 0x011b, Kind::Rational),
    (Context::Tiff, 0x011c, Kind::Short),
    (Context::Tiff, 0x0128, Kind::Short),
    (Context::Tiff, 0x0131, Kind::Ascii),
    (Context::Tiff, 0x0132, Kind::Ascii),
    (Context::Tiff, 0x013b, Kind::Ascii),
    (Context::Tiff, 0x013e, Kind::Rational),
    (Context::Tiff, 0x013f, Kind::Rational),
    (Context::Tiff, 0x0211, Kind::Rational),
    (Context::Tiff, 0x0213, Kind::Short),
    (Context::Tiff, 0x0214, Kind::Rational),
    (Context::Tiff, 0x02bc, Kind::Byte),
    (Context::Tiff, 0x4746, Kind::Short),
    (Context::Tiff, 0x8298, Kind::Ascii),
    (Context::Tiff, 0x83bb, Kind::Long),
    (Context::Tiff, 0x8773, Kind::Undefined),
    (Context::Exif, 0x829a, Kind::Rational),
    (Context::Exif, 0x829d, Kind::Rational),
    (Context::Exif, 0x8822, Kind::Short),
    (Context::Exif, 0x8827, Kind::Short),
    (Context::Exif, 0x9000, Kind::Undefined),
    (Context::Exif, 0x9003, Kind::Ascii),
    (Context::Exif, 0x9004, Kind::Ascii),
    (Context::Exif, 0x9101, Kind::Undefined),
    (Context::Exif, 0x9201, Kind::SRational),
    (Context::Exif, 0x9202, Kind::Rational),
    (Context::Exif, 0x9204, Kind::SRational),
    (Context::Exif, 0x9205, Kind::Rational),
    (Context::Exif, 0x9207, Kind::Short),
    (Context::Exif, 0x9208, Kind::Short),
    (Context::Exif, 0x9209, Kind::Short),
    (Context::Exif, 0x920a, Kind::Rational),
    (Context::Exif, 0x927c, Kind::Undefined),
    (Context::Exif, 0x9290, Kind::Ascii),
    (Context::Exif, 0x9291, Kind::Ascii),
    (Context::Exif, 0x9292, Kind::Ascii),
    (Context::Exif, 0xa000, Kind::Undefined),
    (Context::Exif, 0xa001, Kind::Short),
    (Context::Exif, 0xa002, Kind::Long),
    (Context::Exif, 0xa003, Kind::Long),
    (Context::Exif, 0xa217, Kind::Short),
    (Context::Exif, 0xa300, Kind::Undefined),
    (Context::Exif, 0xa301, Kind::Undefined),
    (Context::Exif, 0xa401, Kind::Short),
    (Context::Exif, 0xa402, Kind::Short),
    (Context::Exif, 0xa403, Kind::Short),
    (Context::Exif, 0xa404, Kind::Rational),
    (Context::Exif, 0xa405, Kind::Short),
    (Context::Exif, 0xa406, Kind::Short),
    (Context::Exif, 0xa420, Kind::Ascii),
    (Context::Exif, 0xa430, Kind::Ascii),
    (Context::Exif, 0xa431, Kind::Ascii),
    (Context::Exif, 0xa432, Kind::Rational),
    (Context::Exif, 0xa433, Kind::Ascii),
    (Context::Exif, 0xa434, Kind::Ascii),
    (Context::Exif, 0xa435, Kind::Ascii),
    (Context::Interop, 0x0001, Kind::Ascii),
    (Context::Interop, 0x0002, Kind::Undefined),
    (Context::Gps, 0x0000, Kind::Byte),
    (Context::Gps, 0x0001, Kind::Ascii),
    (Context::Gps, 0x0002, Kind::Rational),
    (Context::Gps, 0x0003, Kind::Ascii),
    (Context::Gps, 0x0004, Kind::Rational),
    (Context::Gps, 0x0005, Kind::Byte),
    (Context::Gps, 0x0006, Kind::Rational),
    (Context::Gps, 0x0007, Kind::Rational),
    (Context::Gps, 0x0012, Kind::Ascii),
    (Context::Gps, 0x001d, Kind::Ascii),
];

impl Kind {
    fn of(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Byte(_) => Self::Byte,
            Value::Ascii(_) => Self::Ascii,
            Value::Short(_) => Self::Short,
            Value::Long(_) => Self::Long,
            Value::Rational(_) => Self::Rational,
            Value::SByte(_) => Self::SByte,
            Value::Undefined(..) => Self::Undefined,
            Value::SShort(_) => Self::SShort,
            Value::SLong(_) => Self::SLong,
            Value::SRational(_) => Self::SRational,
            Value::Float(_) => Self::Float,
            Value::Double(_) => Self::Double,
            _ => return None,
        })
    }

    /// Parse `text` as a value of this kind. Numeric kinds take whitespace
    /// separated components, rationals `n/d` (or a bare integer).
    fn parse(self, text: &str) -> Option<Value> {
        fn list<T: FromStr>(text: &str) -> Option<Vec<T>> {
            let items: Option<Vec<T>> = text.split_whitespace().map(|t| t.parse().ok()).collect();
            items.filter(|v| !v.is_empty())
        }
        fn ratios<T: FromStr + From<u8>>(text: &str) -> Option<Vec<(T, T)>> {
            let items: Option<Vec<(T, T)>> = text
                .split_whitespace()
                .map(|token| match token.split_once('/') {
                    Some((n, d)) => Some((n.parse().ok()?, d.parse().ok()?)),
                    None => Some((token.parse().ok()?, T::from(1))),
                })
                .collect();
            items.filter(|v| !v.is_empty())
        }

        Some(match self {
            Self::Ascii => Value::Ascii(vec![text.as_bytes().to_vec()]),
            Self::Byte => Value::Byte(list(text)?),
            Self::Undefined => Value::Undefined(list(text)?, 0),
            Self::Short => Value::Short(list(text)?),
            Self::Long => Value::Long(list(text)?),
            Self::SByte => Value::SByte(list(text)?),
            Self::SShort => Value::SShort(list(text)?),
            Self::SLong => Value::SLong(list(text)?),
            Self::Float => Value::Float(list(text)?),
            Self::Double => Value::Double(list(text)?),
            Self::Rational => Value::Rational(
                ratios::<u32>(text)?
                    .into_iter()
                    .map(|(num, denom)| Rational { num, denom })
                    .collect(),
            ),
            Self::SRational => Value::SRational(
                ratios::<i32>(text)?
                    .into_iter()
                    .map(|(num, denom)| SRational { num, denom })
                    .collect(),
            ),
        })
    }
}

/// Values that hold text in an encoding of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    /// An 8-byte charset prefix, then the text.
    Comment,
    /// NUL-terminated UTF-16LE in a BYTE array (the Windows `XP*` tags).
    Utf16,
}

/// Parse a `0xNNNN` tag name.
pub(crate) fn parse_hex_u16(name: &str) -> Option<u16> {
    let digits = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X"))?;
    u16::from_str_radix(digits, 16).ok()
}

/// A parsed `Exif.<Group>.<Tag>` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExifKey {
    pub(crate) group: Group,
    pub(crate) tag: u16,
}

impl ExifKey {
    pub(crate) fn parse(key: &str) -> Result<Self> {
        let mut parts = key.splitn(3, '.');
        let (Some("Exif"), Some(group), Some(tag_name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_key(key));
        };
        let group = Group::from_name(group).ok_or_else(|| Error::invalid_key(key))?;
        let context = group.context();

        let tag = NAMES
            .iter()
            .find(|(c, _, name)| *c == context && *name == tag_name)
            .map(|(_, number, _)| *number)
            .or_else(|| {
                KNOWN_TAGS
                    .iter()
                    .find(|(tag, name)| tag.context() == context && name == tag_name)
                    .map(|(tag, _)| tag.number())
            })
            .or_else(|| parse_hex_u16(tag_name))
            .ok_or_else(|| {
                Error::codec(
                    ErrorCode::InvalidTag,
                    format!("Invalid tag name or ifdId `{tag_name}', ifdId {}", group.name()),
                )
            })?;

        Ok(Self { group, tag })
    }

    fn exif_tag(&self) -> Tag {
        Tag(self.group.context(), self.tag)
    }

    fn tag_name(&self) -> String {
        let context = self.group.context();
        if let Some((_, _, name)) = NAMES.iter().find(|(c, n, _)| *c == context && *n == self.tag) {
            return (*name).to_string();
        }
        let tag = self.exif_tag();
        match tag.description() {
            Some(_) => tag.to_string(),
            None => format!("0x{:04x}", self.tag),
        }
    }

    /// Kind a new value of this tag takes when set from text.
    fn default_kind(&self) -> Kind {
        let context = self.group.context();
        KINDS
            .iter()
            .find(|(c, tag, _)| *c == context && *tag == self.tag)
            .map(|(_, _, kind)| *kind)
            .or_else(|| {
                self.exif_tag()
                    .default_value()
                    .as_ref()
                    .and_then(Kind::of)
            })
            .unwrap_or(Kind::Undefined)
    }

    fn text_encoding(&self) -> Option<TextEncoding> {
        match self.group {
            Group::Photo if self.tag == TAG_USER_COMMENT => Some(TextEncoding::Comment),
            Group::Image | Group::Thumbnail if XP_TAGS.contains(&self.tag) => {
                Some(TextEncoding::Utf16)
            }
            _ => None,
        }
    }

    pub(crate) fn render(&self) -> String {
        format!("Exif.{}.{}", self.group.name(), self.tag_name())
    }

    /// Tags the writer owns; they never appear as entries.
    fn is_layout(&self) -> bool {
        LAYOUT_TAGS.contains(&self.exif_tag())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Exifdatum {
    pub(crate) key: ExifKey,
    pub(crate) value: Value,
}

impl Exifdatum {
    /// Text form of the value. Numeric components are space-joined and
    /// rationals render as `n/d`.
    pub(crate) fn render(&self, little_endian: bool) -> String {
        fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
            items
                .into_iter()
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }

        match (self.key.text_encoding(), &self.value) {
            (Some(TextEncoding::Comment), Value::Undefined(bytes, _)) => {
                return decode_comment(bytes, little_endian);
            }
            (Some(TextEncoding::Utf16), Value::Byte(bytes)) => return decode_utf16(bytes, true),
            _ => {}
        }

        match &self.value {
            Value::Ascii(lines) => join(lines.iter().map(|l| String::from_utf8_lossy(l))),
            Value::Byte(v) | Value::Undefined(v, _) => join(v),
            Value::Short(v) => join(v),
            Value::Long(v) => join(v),
            Value::SByte(v) => join(v),
            Value::SShort(v) => join(v),
            Value::SLong(v) => join(v),
            Value::Float(v) => join(v),
            Value::Double(v) => join(v),
            Value::Rational(v) => join(v.iter().map(|r| format!("{}/{}", r.num, r.denom))),
            Value::SRational(v) => join(v.iter().map(|r| format!("{}/{}", r.num, r.denom))),
            _ => String::new(),
        }
    }

    fn to_field(&self) -> Field {
        Field {
            tag: self.key.exif_tag(),
            ifd_num: self.key.group.ifd(),
            value: self.value.clone(),
        }
    }
}

/// Encode `text` as NUL-terminated UTF-16LE, the layout of the `XP*` tags.
fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    bytes.extend([0, 0]);
    bytes
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// UserComment layout: ASCII when it fits, UTF-16 in the tree's byte order
/// otherwise.
fn encode_comment(text: &str, little_endian: bool) -> Vec<u8> {
    if text.is_ascii() {
        let mut bytes = ASCII_CHARSET.to_vec();
        bytes.extend_from_slice(text.as_bytes());
        return bytes;
    }
    let mut bytes = UNICODE_CHARSET.to_vec();
    for unit in text.encode_utf16() {
        if little_endian {
            bytes.extend(unit.to_le_bytes());
        } else {
            bytes.extend(unit.to_be_bytes());
        }
    }
    bytes
}

fn decode_comment(bytes: &[u8], little_endian: bool) -> String {
    match bytes.split_at_checked(8) {
        Some((charset, text)) if charset == UNICODE_CHARSET => decode_utf16(text, little_endian),
        Some((_, text)) => String::from_utf8_lossy(text)
            .trim_end_matches(['\0', ' '])
            .to_string(),
        None => String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string(),
    }
}

/// Bytes of a BYTE, UNDEFINED or LONG value as stored in the file.
pub(crate) fn value_bytes(value: &Value, little_endian: bool) -> Option<Vec<u8>> {
    match value {
        Value::Byte(bytes) | Value::Undefined(bytes, _) => Some(bytes.clone()),
        Value::Long(words) => Some(
            words
                .iter()
                .flat_map(|w| if little_endian { w.to_le_bytes() } else { w.to_be_bytes() })
                .collect(),
        ),
        _ => None,
    }
}

/// Image data of one IFD carried across a rewrite.
pub(crate) enum Pixels<'a> {
    Strips(In, Vec<&'a [u8]>),
    Tiles(In, Vec<&'a [u8]>),
}

/// The decoded EXIF tree of one image, in decode order.
#[derive(Debug, Clone)]
pub(crate) struct ExifMetadata {
    pub(crate) little_endian: bool,
    pub(crate) entries: Vec<Exifdatum>,
    pub(crate) thumbnail: Option<Bytes>,
    /// Payload as last read or written; reused while the store is clean.
    pub(crate) raw: Option<Bytes>,
    pub(crate) dirty: bool,
}

impl Default for ExifMetadata {
    fn default() -> Self {
        Self {
            little_endian: true,
            entries: Vec::new(),
            thumbnail: None,
            raw: None,
            dirty: false,
        }
    }
}

impl ExifMetadata {
    /// Decode a TIFF structure (`II*\0...`).
    pub(crate) fn decode(data: &Bytes) -> Result<Self> {
        let parsed = Reader::new()
            .read_raw(data.to_vec())
            .map_err(|e| Error::corrupted(format!("Failed to decode Exif data: {e}")))?;

        let mut exif = Self {
            little_endian: data.starts_with(b"II"),
            raw: Some(data.clone()),
            ..Self::default()
        };
        let mut thumbnail = (None, None);

        for field in parsed.fields() {
            let Some(group) = Group::of(field.tag, field.ifd_num) else {
                log::debug!("Skipping {} outside the keyed IFDs", field.tag);
                continue;
            };
            if Kind::of(&field.value).is_none() {
                log::debug!("Skipping {} with an unknown value type", field.tag);
                continue;
            }
            if group == Group::Thumbnail && field.tag == Tag::JPEGInterchangeFormat {
                thumbnail.0 = field.value.get_uint(0);
            }
            if group == Group::Thumbnail && field.tag == Tag::JPEGInterchangeFormatLength {
                thumbnail.1 = field.value.get_uint(0);
            }

            let key = ExifKey {
                group,
                tag: field.tag.number(),
            };
            if !key.is_layout() {
                exif.entries.push(Exifdatum {
                    key,
                    value: field.value.clone(),
                });
            }
        }

        if let (Some(start), Some(len)) = thumbnail {
            let (start, len) = (start as usize, len as usize);
            match start.checked_add(len).filter(|&end| end <= data.len()) {
                Some(end) => exif.thumbnail = Some(data.slice(start..end)),
                None => log::warn!("Thumbnail data out of bounds, dropping it"),
            }
        }

        log::debug!("Decoded {} Exif entries", exif.entries.len());
        Ok(exif)
    }

    pub(crate) fn position(&self, key: &ExifKey) -> Option<usize> {
        self.entries.iter().position(|d| d.key == *key)
    }

    /// Remove and return the first entry of IFD0 with `tag`.
    pub(crate) fn take_image_tag(&mut self, tag: u16) -> Option<Value> {
        let pos = self.position(&ExifKey {
            group: Group::Image,
            tag,
        })?;
        Some(self.entries.remove(pos).value)
    }

    pub(crate) fn image_tag(&self, tag: u16) -> Option<&Value> {
        self.entries
            .iter()
            .find(|d| d.key.group == Group::Image && d.key.tag == tag)
            .map(|d| &d.value)
    }

    fn upsert(&mut self, key: ExifKey, value: Value) {
        match self.position(&key) {
            Some(pos) => self.entries[pos].value = value,
            None => self.entries.push(Exifdatum { key, value }),
        }
        self.dirty = true;
    }

    /// Set `key` from text, parsed as the existing entry's type or the
    /// tag's default type. Comment and `XP*` tags take the text as is.
    pub(crate) fn set_string(&mut self, key: &str, text: &str) -> Result<()> {
        let key = ExifKey::parse(key)?;
        let value = match key.text_encoding() {
            Some(TextEncoding::Comment) => {
                Value::Undefined(encode_comment(text, self.little_endian), 0)
            }
            Some(TextEncoding::Utf16) => Value::Byte(encode_utf16le(text)),
            None => {
                let kind = self
                    .position(&key)
                    .and_then(|pos| Kind::of(&self.entries[pos].value))
                    .unwrap_or_else(|| key.default_kind());
                kind.parse(text)
                    .ok_or_else(|| invalid_value(&key.render(), text))?
            }
        };
        self.upsert(key, value);
        Ok(())
    }

    pub(crate) fn set_short(&mut self, key: &str, text: &str) -> Result<()> {
        let key = ExifKey::parse(key)?;
        let value = Kind::Short
            .parse(text)
            .ok_or_else(|| invalid_value(&key.render(), text))?;
        self.upsert(key, value);
        Ok(())
    }

    /// Remove every entry with `key`. Returns whether anything was removed.
    pub(crate) fn strip(&mut self, key: &str) -> Result<bool> {
        let key = ExifKey::parse(key)?;
        let before = self.entries.len();
        self.entries.retain(|d| d.key != key);
        let removed = self.entries.len() != before;
        self.dirty |= removed;
        Ok(removed)
    }

    /// Lay out the tree as a TIFF structure. `pixels` carries image data
    /// across when the tree is a whole TIFF file; `extra` fields replace
    /// entries with the same tag. Returns `None` when there is nothing to
    /// write.
    pub(crate) fn encode(&self, pixels: &[Pixels<'_>], extra: Vec<Field>) -> Result<Option<Vec<u8>>> {
        let replaced: Vec<(Tag, In)> = extra.iter().map(|e| (e.tag, e.ifd_num)).collect();
        let mut fields: Vec<Field> = self
            .entries
            .iter()
            .filter(|d| !d.key.is_layout())
            .map(Exifdatum::to_field)
            .filter(|f| !replaced.contains(&(f.tag, f.ifd_num)))
            .chain(extra)
            .collect();

        if fields.is_empty() && pixels.is_empty() && self.thumbnail.is_none() {
            return Ok(None);
        }
        fields.sort_by_key(|f| (f.ifd_num == In::THUMBNAIL, f.tag.number()));

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        for data in pixels {
            match data {
                Pixels::Strips(ifd, strips) => writer.set_strips(strips, *ifd),
                Pixels::Tiles(ifd, tiles) => writer.set_tiles(tiles, *ifd),
            }
        }
        if let Some(thumbnail) = &self.thumbnail {
            writer.set_jpeg(thumbnail, In::THUMBNAIL);
        }

        let mut out = Cursor::new(Vec::new());
        writer
            .write(&mut out, self.little_endian)
            .map_err(|e| Error::corrupted(format!("Failed to encode Exif data: {e}")))?;
        Ok(Some(out.into_inner()))
    }
}

fn invalid_value(key: &str, text: &str) -> Error {
    Error::codec(
        ErrorCode::InvalidTypeValue,
        format!("Invalid value `{text}' for {key}"),
    )
}
