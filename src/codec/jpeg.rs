//! JPEG container: metadata lives in APPn segments.

use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageICC};

use super::iptc::{self, PHOTOSHOP_HEADER};
use super::{Payloads, Update, Updates};
use crate::error::{Error, ErrorCode, Result};

const APP0: u8 = 0xe0;
const APP1: u8 = 0xe1;
const APP2: u8 = 0xe2;
const APP13: u8 = 0xed;

pub(crate) const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Largest payload a segment can carry (length field minus itself).
const MAX_SEGMENT_PAYLOAD: usize = 65533;

fn parse(data: &Bytes) -> Result<Jpeg> {
    Jpeg::from_bytes(data.clone()).map_err(|e| {
        Error::codec(
            ErrorCode::FailedToReadImageData,
            format!("Failed to read image data: {e}"),
        )
    })
}

pub(crate) fn validate(data: &Bytes) -> Result<()> {
    parse(data).map(|_| ())
}

fn is_exif(segment: &JpegSegment) -> bool {
    segment.marker() == APP1 && segment.contents().starts_with(EXIF_HEADER)
}

fn is_xmp(segment: &JpegSegment) -> bool {
    segment.marker() == APP1 && segment.contents().starts_with(XMP_HEADER)
}

fn is_iptc(segment: &JpegSegment) -> bool {
    segment.marker() == APP13 && segment.contents().starts_with(PHOTOSHOP_HEADER)
}

/// SOF markers carry the frame geometry; C4, C8 and CC are not frames.
fn is_sof(marker: u8) -> bool {
    (0xc0..=0xcf).contains(&marker) && !matches!(marker, 0xc4 | 0xc8 | 0xcc)
}

pub(crate) fn read(data: &Bytes) -> Result<Payloads> {
    let jpeg = parse(data)?;
    let mut payloads = Payloads::default();

    for segment in jpeg.segments() {
        let contents = segment.contents();
        if payloads.exif.is_none() && is_exif(segment) {
            payloads.exif = Some(contents.slice(EXIF_HEADER.len()..));
        } else if payloads.xmp.is_none() && is_xmp(segment) {
            payloads.xmp = Some(contents.slice(XMP_HEADER.len()..));
        } else if payloads.iptc.is_none() && is_iptc(segment) {
            payloads.iptc = iptc::find_iim(contents).map(|range| contents.slice(range));
        } else if payloads.width == 0 && is_sof(segment.marker()) && contents.len() >= 5 {
            payloads.height = u32::from(u16::from_be_bytes([contents[1], contents[2]]));
            payloads.width = u32::from(u16::from_be_bytes([contents[3], contents[4]]));
        }
    }

    payloads.icc = jpeg.icc_profile();
    Ok(payloads)
}

fn segment(marker: u8, header: &[u8], payload: &[u8]) -> Result<JpegSegment> {
    let size = header.len() + payload.len();
    if size > MAX_SEGMENT_PAYLOAD {
        return Err(Error::codec(
            ErrorCode::TooLargeJpegSegment,
            format!("JPEG segment too large: {size} bytes"),
        ));
    }
    let mut contents = Vec::with_capacity(size);
    contents.extend_from_slice(header);
    contents.extend_from_slice(payload);
    Ok(JpegSegment::new_with_contents(marker, Bytes::from(contents)))
}

/// Index just past the last leading APPn segment whose marker is in `after`.
fn insert_position(segments: &[JpegSegment], after: &[u8]) -> usize {
    segments
        .iter()
        .take_while(|s| (APP0..=0xef).contains(&s.marker()))
        .enumerate()
        .filter(|(_, s)| after.contains(&s.marker()))
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(0)
}

fn apply(
    jpeg: &mut Jpeg,
    update: Update,
    matches: fn(&JpegSegment) -> bool,
    build: impl FnOnce(&Bytes) -> Result<JpegSegment>,
    after: &[u8],
) -> Result<()> {
    let replacement = match update {
        Update::Keep => return Ok(()),
        Update::Remove => None,
        Update::Replace(payload) => Some(build(&payload)?),
    };
    let segments = jpeg.segments_mut();
    let pos = segments.iter().position(matches);
    match (pos, replacement) {
        (Some(p), Some(segment)) => segments[p] = segment,
        (Some(p), None) => {
            segments.remove(p);
        }
        (None, Some(segment)) => {
            let at = insert_position(segments, after);
            segments.insert(at, segment);
        }
        (None, None) => {}
    }
    Ok(())
}

/// Rewrite the metadata segments named by `updates` on top of `io`.
pub(crate) fn write(io: &Bytes, updates: Updates) -> Result<Bytes> {
    let mut jpeg = parse(io)?;

    apply(
        &mut jpeg,
        updates.exif,
        is_exif,
        |payload| segment(APP1, EXIF_HEADER, payload),
        &[APP0],
    )?;
    apply(
        &mut jpeg,
        updates.xmp,
        is_xmp,
        |payload| segment(APP1, XMP_HEADER, payload),
        &[APP0, APP1],
    )?;

    // APP13 may hold other Photoshop resources; those survive IPTC changes.
    let iim = match updates.iptc {
        Update::Keep => None,
        Update::Remove => Some(None),
        Update::Replace(iim) => Some(Some(iim)),
    };
    let iptc_update = match iim {
        None => Update::Keep,
        Some(iim) => {
            let existing = jpeg
                .segments()
                .iter()
                .find(|s| is_iptc(s))
                .map(|s| s.contents().clone());
            match iptc::build_app13(existing.as_deref(), iim.as_deref()) {
                Some(block) => Update::Replace(Bytes::from(block)),
                None => Update::Remove,
            }
        }
    };
    apply(
        &mut jpeg,
        iptc_update,
        is_iptc,
        |block| segment(APP13, &[], block),
        &[APP0, APP1, APP2],
    )?;

    Ok(jpeg.encoder().bytes())
}
