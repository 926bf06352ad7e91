//! In-crate metadata codec.
//!
//! Containers (`jpeg`, `webp`, TIFF) only locate and replace payloads; the
//! metadata families (`exif`, `iptc`, `xmp`) decode and encode them. The
//! image layer talks to this module through [`read`] and [`write`].

pub(crate) mod exif;
pub(crate) mod iptc;
pub(crate) mod jpeg;
pub(crate) mod tiff;
pub(crate) mod webp;
pub(crate) mod xmp;

use std::fmt;

use img_parts::Bytes;
use serde::{Deserialize, Serialize};

use self::exif::ExifMetadata;
use self::iptc::IptcMetadata;
use self::xmp::XmpMetadata;
use crate::error::Result;

/// Container formats the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    WebP,
    Tiff,
}

impl ImageFormat {
    /// Sniff the container from its leading bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xff, 0xd8, 0xff]) {
            Some(Self::Jpeg)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(Self::WebP)
        } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::WebP => "WebP",
            Self::Tiff => "TIFF",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Tiff => "image/tiff",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw payloads located by a container reader.
#[derive(Debug, Default)]
pub(crate) struct Payloads {
    pub(crate) exif: Option<Bytes>,
    /// IIM dataset stream, already unwrapped from any Photoshop block.
    pub(crate) iptc: Option<Bytes>,
    pub(crate) xmp: Option<Bytes>,
    pub(crate) icc: Option<Bytes>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// What a container writer does with one payload.
#[derive(Debug, Clone)]
pub(crate) enum Update {
    Keep,
    Remove,
    Replace(Bytes),
}

#[derive(Debug, Clone)]
pub(crate) struct Updates {
    pub(crate) exif: Update,
    pub(crate) iptc: Update,
    pub(crate) xmp: Update,
}

/// The three metadata families of one image.
#[derive(Debug, Clone, Default)]
pub(crate) struct Metadata {
    pub(crate) exif: ExifMetadata,
    pub(crate) iptc: IptcMetadata,
    pub(crate) xmp: XmpMetadata,
}

impl Metadata {
    pub(crate) fn is_dirty(&self) -> bool {
        self.exif.dirty || self.iptc.dirty || self.xmp.dirty
    }
}

/// Everything `read` learns about an image.
#[derive(Debug)]
pub(crate) struct Decoded {
    pub(crate) metadata: Metadata,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) icc: Option<Bytes>,
}

/// Check that `data` is a well-formed container of `format`.
pub(crate) fn validate(format: ImageFormat, data: &Bytes) -> Result<()> {
    match format {
        ImageFormat::Jpeg => jpeg::validate(data),
        ImageFormat::WebP => webp::validate(data),
        ImageFormat::Tiff => tiff::validate(data),
    }
}

fn decode_exif(payload: &Bytes) -> ExifMetadata {
    ExifMetadata::decode(payload).unwrap_or_else(|e| {
        log::warn!("Failed to decode Exif metadata: {e}");
        ExifMetadata {
            raw: Some(payload.clone()),
            ..ExifMetadata::default()
        }
    })
}

pub(crate) fn decode_iptc(payload: &Bytes) -> IptcMetadata {
    IptcMetadata::decode(payload).unwrap_or_else(|e| {
        log::warn!("Failed to decode IPTC metadata: {e}");
        IptcMetadata {
            raw: Some(payload.clone()),
            ..IptcMetadata::default()
        }
    })
}

/// Decode metadata, geometry and ICC profile.
pub(crate) fn read(format: ImageFormat, data: &Bytes) -> Result<Decoded> {
    let payloads = match format {
        ImageFormat::Jpeg => jpeg::read(data)?,
        ImageFormat::WebP => webp::read(data)?,
        ImageFormat::Tiff => return tiff::read(data),
    };

    let metadata = Metadata {
        exif: payloads.exif.as_ref().map(decode_exif).unwrap_or_default(),
        iptc: payloads.iptc.as_ref().map(decode_iptc).unwrap_or_default(),
        xmp: payloads
            .xmp
            .as_ref()
            .map(XmpMetadata::decode)
            .unwrap_or_default(),
    };

    Ok(Decoded {
        metadata,
        width: payloads.width,
        height: payloads.height,
        icc: payloads.icc,
    })
}

fn updates(metadata: &Metadata) -> Result<Updates> {
    fn update(dirty: bool, encoded: impl FnOnce() -> Result<Option<Vec<u8>>>) -> Result<Update> {
        if !dirty {
            return Ok(Update::Keep);
        }
        Ok(match encoded()? {
            Some(payload) => Update::Replace(Bytes::from(payload)),
            None => Update::Remove,
        })
    }

    Ok(Updates {
        exif: update(metadata.exif.dirty, || metadata.exif.encode(&[], Vec::new()))?,
        iptc: update(metadata.iptc.dirty, || metadata.iptc.encode())?,
        xmp: update(metadata.xmp.dirty, || {
            Ok(metadata.xmp.encode().map(String::into_bytes))
        })?,
    })
}

/// Record the payloads just written as the stores' clean state.
fn commit(metadata: &mut Metadata, updates: &Updates) {
    fn settle(raw: &mut Option<Bytes>, dirty: &mut bool, update: &Update) {
        match update {
            Update::Keep => {}
            Update::Remove => *raw = None,
            Update::Replace(payload) => *raw = Some(payload.clone()),
        }
        *dirty = false;
    }
    settle(&mut metadata.exif.raw, &mut metadata.exif.dirty, &updates.exif);
    settle(&mut metadata.iptc.raw, &mut metadata.iptc.dirty, &updates.iptc);
    settle(&mut metadata.xmp.raw, &mut metadata.xmp.dirty, &updates.xmp);
}

/// Serialize `metadata` into the container. JPEG and WebP rewrite only the
/// dirty payloads of `io`; a TIFF is laid out again around its pixel data.
/// On success every store is clean.
pub(crate) fn write(format: ImageFormat, io: &Bytes, metadata: &mut Metadata) -> Result<Bytes> {
    if !metadata.is_dirty() {
        return Ok(io.clone());
    }

    let updates = updates(metadata)?;
    let written = match format {
        ImageFormat::Jpeg => jpeg::write(io, updates.clone())?,
        ImageFormat::WebP => webp::write(io, updates.clone())?,
        ImageFormat::Tiff => tiff::write(io, metadata, &updates)?,
    };

    commit(metadata, &updates);
    if format == ImageFormat::Tiff {
        // The EXIF tree of a TIFF is the whole file.
        metadata.exif.raw = Some(written.clone());
    }
    log::debug!("Wrote {} bytes of {format}", written.len());
    Ok(written)
}
