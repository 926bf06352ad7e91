//! Fixture builders shared by the integration tests.
//!
//! Pixel data is encoded with the `image` crate; metadata payloads are
//! assembled by hand so the tests know exactly what each fixture holds.

#![allow(dead_code)]

use std::io::Cursor;

use exiv::Image;
use image::{DynamicImage, RgbImage};
use img_parts::jpeg::Jpeg;
use img_parts::webp::WebP;
use img_parts::{Bytes, ImageICC};

pub const MAKE: &str = "FakeMake";
pub const CAPTION: &str = "A quiet harbour";
pub const KEYWORDS: [&str; 2] = ["boats", "dusk"];

pub const ICC_PROFILE: &[u8] = b"not a real profile, only bytes";

pub const XMP_PACKET: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmp:CreatorTool="fixture">
   <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Harbour</rdf:li></rdf:Alt></dc:title>
   <dc:subject><rdf:Bag><rdf:li>boats</rdf:li><rdf:li>dusk</rdf:li></rdf:Bag></dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

fn encode(format: image::ImageFormat) -> Vec<u8> {
    let pixels = DynamicImage::ImageRgb8(RgbImage::new(1, 1));
    let mut out = Cursor::new(Vec::new());
    pixels.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// A 1x1 JPEG without any metadata.
pub fn plain_jpeg() -> Vec<u8> {
    encode(image::ImageFormat::Jpeg)
}

/// A 1x1 lossless WebP without any metadata.
pub fn plain_webp() -> Vec<u8> {
    encode(image::ImageFormat::WebP)
}

/// A 1x1 TIFF without any metadata.
pub fn plain_tiff() -> Vec<u8> {
    encode(image::ImageFormat::Tiff)
}

/// Little-endian TIFF block with IFD0 = { Make, Orientation = 1 }.
pub fn exif_block() -> Vec<u8> {
    let make = format!("{MAKE}\0");
    // header (8) + count (2) + 2 entries (24) + next IFD (4)
    let data_offset: u32 = 8 + 2 + 24 + 4;

    let mut out = Vec::new();
    out.extend_from_slice(b"II*\0");
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());

    // Make, ASCII
    out.extend_from_slice(&0x010fu16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&(make.len() as u32).to_le_bytes());
    out.extend_from_slice(&data_offset.to_le_bytes());

    // Orientation, SHORT, inline
    out.extend_from_slice(&0x0112u16.to_le_bytes());
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&[1, 0, 0, 0]);

    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(make.as_bytes());
    out
}

/// IIM stream: Caption once, Keywords twice.
pub fn iim_block() -> Vec<u8> {
    let mut out = Vec::new();
    let mut dataset = |number: u8, value: &str| {
        out.extend_from_slice(&[0x1c, 2, number]);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    };
    dataset(120, CAPTION);
    for keyword in KEYWORDS {
        dataset(25, keyword);
    }
    out
}

/// APP13 payload: `Photoshop 3.0` header plus one IPTC-NAA resource.
pub fn app13_payload() -> Vec<u8> {
    let iim = iim_block();
    let mut out = Vec::new();
    out.extend_from_slice(b"Photoshop 3.0\0");
    out.extend_from_slice(b"8BIM");
    out.extend_from_slice(&0x0404u16.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(iim.len() as u32).to_be_bytes());
    out.extend_from_slice(&iim);
    if iim.len() % 2 != 0 {
        out.push(0);
    }
    out
}

fn segment(marker: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0xff, marker];
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// A 1x1 JPEG carrying Exif, XMP and IPTC right after SOI.
pub fn tagged_jpeg() -> Vec<u8> {
    let plain = plain_jpeg();

    let mut exif = b"Exif\0\0".to_vec();
    exif.extend_from_slice(&exif_block());
    let mut xmp = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    xmp.extend_from_slice(XMP_PACKET.as_bytes());

    let mut out = plain[..2].to_vec();
    out.extend(segment(0xe1, &exif));
    out.extend(segment(0xe1, &xmp));
    out.extend(segment(0xed, &app13_payload()));
    out.extend_from_slice(&plain[2..]);
    out
}

/// A 1x1 JPEG with `ICC_PROFILE` in an APP2 segment.
pub fn icc_jpeg() -> Vec<u8> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(plain_jpeg())).unwrap();
    jpeg.set_icc_profile(Some(Bytes::from_static(ICC_PROFILE)));
    jpeg.encoder().bytes().to_vec()
}

/// A 1x1 extended WebP with `ICC_PROFILE` in an ICCP chunk.
pub fn icc_webp() -> Vec<u8> {
    let mut webp = WebP::from_bytes(Bytes::from(plain_webp())).unwrap();
    webp.set_icc_profile(Some(Bytes::from_static(ICC_PROFILE)));
    webp.encoder().bytes().to_vec()
}

/// Open `data` and read its metadata.
pub fn open(data: Vec<u8>) -> Image {
    let image = Image::open_bytes(data).unwrap();
    image.read_metadata().unwrap();
    image
}
