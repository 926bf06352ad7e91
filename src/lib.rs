//! # exiv
//!
//! Read and write EXIF, IPTC and XMP metadata embedded in JPEG, WebP and
//! TIFF images.
//!
//! An [`Image`] owns the container bytes. After [`Image::read_metadata`] its
//! metadata is reachable through one live store per family
//! ([`ExifData`], [`IptcData`], [`XmpData`]). Stores, the entries they hand
//! out and their iterators keep the image alive; they always reflect the
//! image's current state, including mutations made after they were obtained.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use exiv::{Image, MetadataFormat};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = Image::open("photo.jpg")?;
//!     image.read_metadata()?;
//!     println!("{}x{}", image.pixel_width(), image.pixel_height());
//!
//!     let exif = image.exif_data();
//!     println!("Make: {}", exif.get_string("Exif.Image.Make")?);
//!
//!     image.set_metadata_string("exif", "Exif.Image.Artist", "Jane")?;
//!     image.set_metadata_string("iptc", "Iptc.Application2.Caption", "Sunset")?;
//!     image.strip_key(MetadataFormat::Exif, "Exif.Photo.MakerNote")?;
//!
//!     // The store obtained earlier already sees the change.
//!     assert_eq!(exif.get_string("Exif.Image.Artist")?, "Jane");
//!
//!     for datum in image.iptc_data().iterator() {
//!         println!("{} = {}", datum.key(), datum);
//!     }
//!
//!     std::fs::write("photo-tagged.jpg", image.get_bytes())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every failure is an [`Error`] with a numeric [`code`](Error::code) and a
//! message. Code `0` marks local precondition failures; other codes are
//! stable identifiers from the codec (see [`ErrorCode`]).
//!
//! ## Supported Formats
//!
//! | Format | EXIF | IPTC | XMP | ICC (read) |
//! |--------|------|------|-----|------------|
//! | JPEG   | APP1 | APP13 (Photoshop 8BIM) | APP1 | APP2 |
//! | WebP   | `EXIF` chunk | not supported | `XMP ` chunk | `ICCP` chunk |
//! | TIFF   | IFD tree | tag `0x83BB` | tag `0x02BC` | tag `0x8773` |
//!
//! ## Modules
//!
//! - [`config`]: configuration for the command-line tool
//! - [`logging`]: diagnostic verbosity

mod codec;
pub mod config;
mod error;
mod image;
pub mod logging;
mod store;

pub use codec::ImageFormat;
pub use error::{Error, ErrorCode, Result};
pub use image::Image;
pub use logging::{LogLevel, set_log_level};
pub use store::{
    Datum, DatumIterator, Exif, ExifData, ExifDatum, ExifDatumIterator, Family, Iptc, IptcData,
    IptcDatum, IptcDatumIterator, MetadataFormat, MetadataProvider, MetadataStore, Xmp, XmpData,
    XmpDatum, XmpDatumIterator,
};

/// Byte buffer type used for image data. Cheap to clone; clones share storage.
pub use img_parts::Bytes;
