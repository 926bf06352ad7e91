//! WebP container: EXIF, XMP and ICC live in RIFF chunks next to the bitstream.

use img_parts::riff::{RiffChunk, RiffContent};
use img_parts::webp::{
    CHUNK_ALPH, CHUNK_ANIM, CHUNK_EXIF, CHUNK_ICCP, CHUNK_VP8, CHUNK_VP8L, CHUNK_VP8X, CHUNK_XMP,
    WebP,
};
use img_parts::{Bytes, ImageICC};

use super::jpeg::EXIF_HEADER;
use super::{Payloads, Update, Updates};
use crate::error::{Error, ErrorCode, Result};

const FLAG_ICC: u8 = 0x20;
const FLAG_ALPHA: u8 = 0x10;
const FLAG_EXIF: u8 = 0x08;
const FLAG_XMP: u8 = 0x04;
const FLAG_ANIMATION: u8 = 0x02;

const VP8X_LEN: usize = 10;

fn parse(data: &Bytes) -> Result<WebP> {
    let webp = WebP::from_bytes(data.clone()).map_err(|e| {
        Error::codec(
            ErrorCode::FailedToReadImageData,
            format!("Failed to read image data: {e}"),
        )
    })?;
    if webp.chunks().is_empty() {
        return Err(Error::codec(
            ErrorCode::FailedToReadImageData,
            "WebP file has no chunks",
        ));
    }
    Ok(webp)
}

pub(crate) fn validate(data: &Bytes) -> Result<()> {
    parse(data).map(|_| ())
}

fn data(webp: &WebP, id: [u8; 4]) -> Option<&Bytes> {
    webp.chunk_by_id(id)?.content().data()
}

fn le24(b: &[u8]) -> u32 {
    u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16
}

/// Canvas size from the first chunk that describes one.
fn dimensions(webp: &WebP) -> Option<(u32, u32)> {
    webp.chunks().iter().find_map(|chunk| {
        let d = chunk.content().data()?;
        match chunk.id() {
            CHUNK_VP8X if d.len() >= VP8X_LEN => Some((le24(&d[4..7]) + 1, le24(&d[7..10]) + 1)),
            CHUNK_VP8 if d.len() >= 10 && d[3..6] == [0x9du8, 0x01, 0x2a] => Some((
                u32::from(u16::from_le_bytes([d[6], d[7]]) & 0x3fff),
                u32::from(u16::from_le_bytes([d[8], d[9]]) & 0x3fff),
            )),
            CHUNK_VP8L if d.len() >= 5 && d[0] == 0x2f => {
                let bits = u32::from_le_bytes([d[1], d[2], d[3], d[4]]);
                Some(((bits & 0x3fff) + 1, ((bits >> 14) & 0x3fff) + 1))
            }
            _ => None,
        }
    })
}

pub(crate) fn read(io: &Bytes) -> Result<Payloads> {
    let webp = parse(io)?;
    let mut payloads = Payloads::default();

    // Writers disagree on whether the chunk repeats the JPEG "Exif\0\0" prefix.
    payloads.exif = data(&webp, CHUNK_EXIF).map(|exif| {
        if exif.starts_with(EXIF_HEADER) {
            exif.slice(EXIF_HEADER.len()..)
        } else {
            exif.clone()
        }
    });
    payloads.xmp = data(&webp, CHUNK_XMP).cloned();
    payloads.icc = webp.icc_profile();

    if let Some((width, height)) = dimensions(&webp) {
        payloads.width = width;
        payloads.height = height;
    }
    Ok(payloads)
}

fn apply(webp: &mut WebP, id: [u8; 4], update: Update) {
    match update {
        Update::Keep => {}
        Update::Remove => webp.remove_chunks_by_id(id),
        Update::Replace(payload) => {
            let chunk = RiffChunk::new(id, RiffContent::Data(payload));
            let chunks = webp.chunks_mut();
            match chunks.iter().position(|c| c.id() == id) {
                Some(p) => chunks[p] = chunk,
                None => chunks.push(chunk),
            }
        }
    }
}

/// Bring the VP8X header in line with the chunks present, creating it when
/// the file needs the extended layout.
///
/// `ImageEXIF::set_exif` would drop VP8X for files that still need it for
/// alpha, animation or XMP, so the header is maintained here.
fn sync_vp8x(webp: &mut WebP) {
    let vp8l_alpha = data(webp, CHUNK_VP8L)
        .filter(|d| d.len() >= 5)
        .map(|d| d[4] & 0x10 != 0)
        .unwrap_or(false);

    let mut flags = 0u8;
    for (id, flag) in [
        (CHUNK_ICCP, FLAG_ICC),
        (CHUNK_ALPH, FLAG_ALPHA),
        (CHUNK_EXIF, FLAG_EXIF),
        (CHUNK_XMP, FLAG_XMP),
        (CHUNK_ANIM, FLAG_ANIMATION),
    ] {
        if webp.has_chunk(id) {
            flags |= flag;
        }
    }
    if vp8l_alpha {
        flags |= FLAG_ALPHA;
    }

    let current = data(webp, CHUNK_VP8X).cloned();
    let header = match current {
        Some(existing) => {
            let mut header = existing.to_vec();
            if header.len() < VP8X_LEN {
                header.resize(VP8X_LEN, 0);
            }
            header[0] = (header[0] & (FLAG_ALPHA | FLAG_ANIMATION)) | flags;
            header
        }
        None if flags & (FLAG_ICC | FLAG_EXIF | FLAG_XMP) != 0 => {
            let (width, height) = dimensions(webp).unwrap_or((1, 1));
            let mut header = vec![0u8; VP8X_LEN];
            header[0] = flags;
            header[4..7].copy_from_slice(&width.saturating_sub(1).to_le_bytes()[..3]);
            header[7..10].copy_from_slice(&height.saturating_sub(1).to_le_bytes()[..3]);
            header
        }
        None => return,
    };

    let chunk = RiffChunk::new(CHUNK_VP8X, RiffContent::Data(Bytes::from(header)));
    let chunks = webp.chunks_mut();
    match chunks.iter().position(|c| c.id() == CHUNK_VP8X) {
        Some(p) => chunks[p] = chunk,
        None => chunks.insert(0, chunk),
    }
}

/// Rewrite the metadata chunks named by `updates` on top of `io`.
pub(crate) fn write(io: &Bytes, updates: Updates) -> Result<Bytes> {
    if matches!(updates.iptc, Update::Replace(_)) {
        return Err(Error::codec(
            ErrorCode::InvalidSettingForImage,
            "Setting IPTC metadata in WebP images is not supported",
        ));
    }

    let mut webp = parse(io)?;
    apply(&mut webp, CHUNK_EXIF, updates.exif);
    apply(&mut webp, CHUNK_XMP, updates.xmp);
    // EXIF precedes XMP at the tail of the file.
    let chunks = webp.chunks_mut();
    if let (Some(e), Some(x)) = (
        chunks.iter().position(|c| c.id() == CHUNK_EXIF),
        chunks.iter().position(|c| c.id() == CHUNK_XMP),
    ) {
        if e > x {
            chunks.swap(e, x);
        }
    }
    sync_vp8x(&mut webp);

    if u64::from(webp.len()) >= u64::from(u32::MAX) {
        return Err(Error::codec(ErrorCode::ValueTooLarge, "WebP file exceeds 4 GiB"));
    }
    Ok(webp.encoder().bytes())
}
