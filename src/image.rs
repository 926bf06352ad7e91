//! The image handle: owns the container bytes and the decoded metadata.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use img_parts::Bytes;
use parking_lot::RwLock;

use crate::codec::{self, ImageFormat, Metadata};
use crate::error::{Error, ErrorCode, Result};
use crate::store::{ExifData, IptcData, MetadataFormat, MetadataStore, XmpData};

/// Shared handle to the state of one image. Stores, entries and iterators
/// each hold one, which keeps the state alive for as long as they exist.
pub(crate) type Shared = Arc<RwLock<ImageState>>;

pub(crate) struct ImageState {
    format: ImageFormat,
    /// Current serialization, reflecting every mutation so far.
    io: Bytes,
    metadata: Metadata,
    metadata_read: bool,
    width: u32,
    height: u32,
    icc: Option<Bytes>,
}

impl ImageState {
    pub(crate) fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn load(&mut self) -> Result<()> {
        let decoded = codec::read(self.format, &self.io)?;
        self.metadata = decoded.metadata;
        self.width = decoded.width;
        self.height = decoded.height;
        self.icc = decoded.icc;
        self.metadata_read = true;
        log::debug!(
            "Read metadata: {} Exif, {} IPTC, {} XMP entries",
            self.metadata.exif.entries.len(),
            self.metadata.iptc.entries.len(),
            self.metadata.xmp.entries.len()
        );
        Ok(())
    }
}

/// An opened image.
///
/// Cloning is cheap and yields another handle to the same image. All
/// methods take `&self`; mutations are serialized internally, but callers
/// must not mutate while enumerating one of the image's stores.
#[derive(Clone)]
pub struct Image {
    state: Shared,
}

impl Image {
    /// Open the image at `path`. The file is read into memory; nothing is
    /// ever written back to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            Error::codec(
                ErrorCode::DataSourceOpenFailed,
                format!("{}: Failed to open the data source: {e}", path.display()),
            )
        })?;

        let format = ImageFormat::detect(&data).ok_or_else(|| {
            Error::codec(
                ErrorCode::FileContainsUnknownImageType,
                format!(
                    "{}: The file contains data of an unknown image type",
                    path.display()
                ),
            )
        })?;

        log::debug!("Opened {} as {format}", path.display());
        Self::from_parts(format, Bytes::from(data))
    }

    /// Open an image held in memory. The buffer is kept, not copied.
    pub fn open_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::precondition("input is empty"));
        }

        let format = ImageFormat::detect(&data).ok_or_else(|| {
            Error::codec(
                ErrorCode::MemoryContainsUnknownImageType,
                "The memory contains data of an unknown image type",
            )
        })?;

        Self::from_parts(format, data)
    }

    fn from_parts(format: ImageFormat, data: Bytes) -> Result<Self> {
        codec::validate(format, &data)?;
        Ok(Self {
            state: Arc::new(RwLock::new(ImageState {
                format,
                io: data,
                metadata: Metadata::default(),
                metadata_read: false,
                width: 0,
                height: 0,
                icc: None,
            })),
        })
    }

    /// Decode metadata, geometry and ICC profile from the current bytes.
    /// Safe to call repeatedly.
    pub fn read_metadata(&self) -> Result<()> {
        self.state.write().load()
    }

    pub fn format(&self) -> ImageFormat {
        self.state.read().format
    }

    /// Width in pixels; zero until [`read_metadata`](Self::read_metadata).
    pub fn pixel_width(&self) -> u32 {
        self.state.read().width
    }

    /// Height in pixels; zero until [`read_metadata`](Self::read_metadata).
    pub fn pixel_height(&self) -> u32 {
        self.state.read().height
    }

    /// The embedded ICC profile, if any.
    pub fn icc_profile(&self) -> Option<Bytes> {
        self.state.read().icc.clone()
    }

    /// The current serialized image. Calls without an intervening mutation
    /// share one buffer; a mutation installs a new buffer and leaves
    /// previously returned ones untouched.
    pub fn get_bytes(&self) -> Bytes {
        self.state.read().io.clone()
    }

    pub fn exif_data(&self) -> ExifData {
        MetadataStore::new(self.state.clone())
    }

    pub fn iptc_data(&self) -> IptcData {
        MetadataStore::new(self.state.clone())
    }

    pub fn xmp_data(&self) -> XmpData {
        MetadataStore::new(self.state.clone())
    }

    /// Apply `change` and re-serialize. Either both the metadata and the
    /// bytes are updated or neither is.
    fn mutate(&self, change: impl FnOnce(&mut Metadata) -> Result<()>) -> Result<()> {
        let mut state = self.state.write();
        if !state.metadata_read {
            state.load()?;
        }

        let mut metadata = state.metadata.clone();
        change(&mut metadata)?;
        let io = codec::write(state.format, &state.io, &mut metadata)?;

        state.metadata = metadata;
        state.io = io;
        Ok(())
    }

    /// Set `key` from text. `format` is `"exif"` or `"iptc"`.
    pub fn set_metadata_string(&self, format: &str, key: &str, value: &str) -> Result<()> {
        match format {
            "exif" => self.set_exif_string(key, value),
            "iptc" => self.set_iptc_string(key, value),
            _ => Err(Error::precondition(format!("invalid metadata type: {format}"))),
        }
    }

    /// Set `key` to an unsigned short. `format` is `"exif"` or `"iptc"`.
    pub fn set_metadata_short(&self, format: &str, key: &str, value: &str) -> Result<()> {
        match format {
            "exif" => self.set_exif_short(key, value),
            "iptc" => self.set_iptc_short(key, value),
            _ => Err(Error::precondition(format!("invalid metadata type: {format}"))),
        }
    }

    pub fn set_exif_string(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|m| m.exif.set_string(key, value))
    }

    pub fn set_exif_short(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|m| m.exif.set_short(key, value))
    }

    pub fn set_iptc_string(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|m| m.iptc.set_string(key, value))
    }

    pub fn set_iptc_short(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|m| m.iptc.set_short(key, value))
    }

    /// Remove every entry with `key`. An absent key is not an error.
    pub fn strip_key(&self, format: MetadataFormat, key: &str) -> Result<()> {
        self.mutate(|m| {
            let removed = match format {
                MetadataFormat::Exif => m.exif.strip(key)?,
                MetadataFormat::Iptc => m.iptc.strip(key)?,
                MetadataFormat::Xmp => m.xmp.strip(key)?,
            };
            if !removed {
                log::debug!("{key} not present, nothing to strip");
            }
            Ok(())
        })
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Image")
            .field("format", &state.format)
            .field("len", &state.io.len())
            .field("width", &state.width)
            .field("height", &state.height)
            .finish()
    }
}
