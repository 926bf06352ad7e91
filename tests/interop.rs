//! Output must stay readable by other decoders.

mod common;

use std::path::Path;

use common::MAKE;
use exiv::Image;
use nom_exif::*;
use tempfile::TempDir;

fn exif_entry(path: &Path, tag: ExifTag) -> Option<String> {
    let mut parser = MediaParser::new();
    let ms = MediaSource::file_path(path).unwrap();
    let iter: ExifIter = parser.parse(ms).unwrap();
    let exif: Exif = iter.into();
    exif.get(tag).map(|value| value.to_string())
}

fn write_out(dir: &TempDir, name: &str, image: &Image) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, image.get_bytes()).unwrap();
    path
}

#[test]
fn nom_exif_reads_jpeg_fixture() {
    let dir = TempDir::new().unwrap();
    let image = common::open(common::tagged_jpeg());
    let path = write_out(&dir, "fixture.jpg", &image);

    let make = exif_entry(&path, ExifTag::Make).unwrap();
    assert!(make.contains(MAKE), "{make}");
}

#[test]
fn nom_exif_reads_rewritten_jpeg() {
    let dir = TempDir::new().unwrap();
    let image = common::open(common::tagged_jpeg());
    image.set_exif_string("Exif.Image.Model", "Model X").unwrap();
    image
        .set_exif_string("Exif.Photo.DateTimeOriginal", "2024:05:01 10:00:00")
        .unwrap();
    let path = write_out(&dir, "rewritten.jpg", &image);

    assert!(exif_entry(&path, ExifTag::Make).unwrap().contains(MAKE));
    assert!(exif_entry(&path, ExifTag::Model).unwrap().contains("Model X"));
    assert!(exif_entry(&path, ExifTag::DateTimeOriginal).is_some());
}

#[test]
fn image_crate_decodes_rewritten_containers() {
    for data in [common::tagged_jpeg(), common::plain_webp(), common::plain_tiff()] {
        let image = common::open(data);
        image.set_exif_string("Exif.Image.Artist", "Jane").unwrap();
        image.strip_key(exiv::MetadataFormat::Exif, "Exif.Image.Make").unwrap();

        let decoded = image::load_from_memory(&image.get_bytes()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1, 1), "{image:?}");
    }
}
