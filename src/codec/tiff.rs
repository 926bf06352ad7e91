//! TIFF container: the file is itself the EXIF tree. IPTC, XMP and the ICC
//! profile live in IFD0 tags; pixel data sits in strips or tiles that a
//! rewrite carries across.

use ::exif::{Context, Field, In, Reader, Tag, Value};
use img_parts::Bytes;

use super::exif::{self, ExifMetadata, Pixels, TAG_ICC, TAG_IPTC, TAG_XMP};
use super::xmp::XmpMetadata;
use super::{Decoded, Metadata, Update, Updates};
use crate::error::{Error, ErrorCode, Result};

fn broken(e: impl std::fmt::Display) -> Error {
    Error::codec(
        ErrorCode::FailedToReadImageData,
        format!("Failed to read image data: {e}"),
    )
}

pub(crate) fn validate(data: &Bytes) -> Result<()> {
    Reader::new().read_raw(data.to_vec()).map(|_| ()).map_err(broken)
}

pub(crate) fn read(data: &Bytes) -> Result<Decoded> {
    let mut exif = ExifMetadata::decode(data)?;
    let little_endian = exif.little_endian;
    let payload = |value: Value| exif::value_bytes(&value, little_endian).map(Bytes::from);

    let iptc = exif
        .take_image_tag(TAG_IPTC)
        .and_then(payload)
        .map(|iim| super::decode_iptc(&iim))
        .unwrap_or_default();
    let xmp = exif
        .take_image_tag(TAG_XMP)
        .and_then(payload)
        .map(|packet| XmpMetadata::decode(&packet))
        .unwrap_or_default();

    let dimension = |tag| exif.image_tag(tag).and_then(|v| v.get_uint(0)).unwrap_or(0);
    let width = dimension(Tag::ImageWidth.number());
    let height = dimension(Tag::ImageLength.number());
    let icc = exif
        .image_tag(TAG_ICC)
        .and_then(|v| exif::value_bytes(v, little_endian))
        .map(Bytes::from);

    Ok(Decoded {
        metadata: Metadata { exif, iptc, xmp },
        width,
        height,
        icc,
    })
}

/// Slices of `data` named by parallel offset and length fields.
fn chunks<'a>(data: &'a [u8], offsets: &Value, lengths: &Value) -> Result<Vec<&'a [u8]>> {
    let offsets = offsets.iter_uint().into_iter().flatten();
    let lengths = lengths.iter_uint().into_iter().flatten();
    offsets
        .zip(lengths)
        .map(|(offset, len)| {
            let (start, len) = (offset as usize, len as usize);
            start
                .checked_add(len)
                .and_then(|end| data.get(start..end))
                .ok_or_else(|| broken("image data extends beyond the file"))
        })
        .collect()
}

/// Strip or tile data of IFD0 and IFD1 in `io`.
fn pixels(io: &Bytes) -> Result<Vec<Pixels<'_>>> {
    let parsed = Reader::new().read_raw(io.to_vec()).map_err(broken)?;
    let mut found = Vec::new();
    for ifd in [In::PRIMARY, In::THUMBNAIL] {
        let field = |tag| parsed.get_field(tag, ifd).map(|f| &f.value);
        if let (Some(offsets), Some(lengths)) =
            (field(Tag::StripOffsets), field(Tag::StripByteCounts))
        {
            found.push(Pixels::Strips(ifd, chunks(io, offsets, lengths)?));
        } else if let (Some(offsets), Some(lengths)) =
            (field(Tag::TileOffsets), field(Tag::TileByteCounts))
        {
            found.push(Pixels::Tiles(ifd, chunks(io, offsets, lengths)?));
        }
    }
    Ok(found)
}

/// Current payload of a store: freshly encoded when dirty, as read otherwise.
fn current(update: &Update, raw: &Option<Bytes>) -> Option<Bytes> {
    match update {
        Update::Keep => raw.clone(),
        Update::Remove => None,
        Update::Replace(payload) => Some(payload.clone()),
    }
}

/// Lay the whole file out again with the current metadata, carrying the
/// pixel data of `io` across.
pub(crate) fn write(io: &Bytes, metadata: &Metadata, updates: &Updates) -> Result<Bytes> {
    let image_tag = |tag| Tag(Context::Tiff, tag);
    let mut extra = Vec::new();
    if let Some(iim) = current(&updates.iptc, &metadata.iptc.raw) {
        extra.push(Field {
            tag: image_tag(TAG_IPTC),
            ifd_num: In::PRIMARY,
            value: Value::Undefined(iim.to_vec(), 0),
        });
    }
    if let Some(packet) = current(&updates.xmp, &metadata.xmp.raw) {
        extra.push(Field {
            tag: image_tag(TAG_XMP),
            ifd_num: In::PRIMARY,
            value: Value::Byte(packet.to_vec()),
        });
    }

    let pixels = pixels(io)?;
    Ok(metadata
        .exif
        .encode(&pixels, extra)?
        .map(Bytes::from)
        .unwrap_or_else(|| io.clone()))
}
