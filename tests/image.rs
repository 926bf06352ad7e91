mod common;

use std::collections::BTreeMap;
use std::thread;

use common::{CAPTION, KEYWORDS, MAKE};
use exiv::{Image, ImageFormat, MetadataFormat, MetadataProvider};
use tempfile::TempDir;

// ── opening ───────────────────────────────────────────────────────────

#[test]
fn nonexistent_path_fails_with_fixed_code() {
    let dir = TempDir::new().unwrap();
    let err = Image::open(dir.path().join("missing.jpg")).unwrap_err();
    assert_eq!(err.code(), 9);
    assert!(err.message().contains("Failed to open the data source"));
}

#[test]
fn unknown_file_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "just text").unwrap();
    assert_eq!(Image::open(&path).unwrap_err().code(), 11);
}

#[test]
fn empty_input_is_a_local_error() {
    let err = Image::open_bytes(Vec::new()).unwrap_err();
    assert_eq!(err.code(), 0);
    assert_eq!(err.message(), "input is empty");
}

#[test]
fn unknown_memory_type_is_rejected() {
    assert_eq!(Image::open_bytes(b"GIF89a".to_vec()).unwrap_err().code(), 12);
}

#[test]
fn open_from_disk_matches_memory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tagged.jpg");
    std::fs::write(&path, common::tagged_jpeg()).unwrap();

    let image = Image::open(&path).unwrap();
    image.read_metadata().unwrap();
    assert_eq!(image.format(), ImageFormat::Jpeg);
    assert_eq!(image.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
}

// ── geometry and profile ──────────────────────────────────────────────

#[test]
fn dimensions_are_zero_until_read() {
    let image = Image::open_bytes(common::plain_jpeg()).unwrap();
    assert_eq!((image.pixel_width(), image.pixel_height()), (0, 0));

    image.read_metadata().unwrap();
    assert_eq!((image.pixel_width(), image.pixel_height()), (1, 1));
}

#[test]
fn every_container_reports_one_pixel() {
    for data in [common::plain_jpeg(), common::plain_webp(), common::plain_tiff()] {
        let image = common::open(data);
        assert_eq!((image.pixel_width(), image.pixel_height()), (1, 1), "{image:?}");
    }
}

#[test]
fn missing_icc_profile_is_not_an_error() {
    let image = common::open(common::plain_jpeg());
    assert!(image.icc_profile().is_none());
}

#[test]
fn icc_profile_is_read_from_every_container() {
    for data in [common::icc_jpeg(), common::icc_webp()] {
        let image = common::open(data);
        assert_eq!(image.icc_profile().as_deref(), Some(common::ICC_PROFILE), "{image:?}");
        assert_eq!((image.pixel_width(), image.pixel_height()), (1, 1));
    }

    let tiff = common::open(common::plain_tiff());
    tiff.set_exif_string("Exif.Image.InterColorProfile", "7 8 9").unwrap();
    let reopened = common::open(tiff.get_bytes().to_vec());
    assert_eq!(reopened.icc_profile().as_deref(), Some(&[7u8, 8, 9][..]));
}

#[test]
fn icc_profile_survives_metadata_writes() {
    let image = common::open(common::icc_webp());
    image.set_exif_string("Exif.Image.Make", MAKE).unwrap();

    let reopened = common::open(image.get_bytes().to_vec());
    assert_eq!(reopened.icc_profile().as_deref(), Some(common::ICC_PROFILE));
    assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
}

#[test]
fn read_metadata_is_repeatable() {
    let image = common::open(common::tagged_jpeg());
    let before = image.exif_data().all_tags();
    image.read_metadata().unwrap();
    image.read_metadata().unwrap();
    assert_eq!(image.exif_data().all_tags(), before);
}

// ── lookups ───────────────────────────────────────────────────────────

#[test]
fn find_key_distinguishes_malformed_absent_and_present() {
    let image = common::open(common::tagged_jpeg());
    let exif = image.exif_data();

    assert_eq!(exif.find_key("NotAKey").unwrap_err().code(), 6);
    assert_eq!(exif.find_key("Exif.Image.NoSuchTag").unwrap_err().code(), 7);
    assert!(exif.find_key("Exif.Photo.Flash").unwrap().is_none());

    let make = exif.find_key("Exif.Image.Make").unwrap().unwrap();
    assert_eq!(make.key(), "Exif.Image.Make");
    assert_eq!(make.to_string(), MAKE);
    assert_eq!(exif.get_string("Exif.Image.Orientation").unwrap(), "1");
}

#[test]
fn get_string_reports_key_not_found() {
    let image = common::open(common::tagged_jpeg());
    let err = image.exif_data().get_string("Exif.Photo.Flash").unwrap_err();
    assert!(err.is_key_not_found());
    assert_eq!(err.code(), 0);
}

#[test]
fn iptc_keys_are_checked() {
    let image = common::open(common::tagged_jpeg());
    let iptc = image.iptc_data();

    assert_eq!(iptc.get_string("Iptc.Application2.Caption").unwrap(), CAPTION);
    assert_eq!(iptc.find_key("Iptc.NoRecord.Caption").unwrap_err().code(), 5);
    assert_eq!(iptc.find_key("Iptc.Application2.NoDataset").unwrap_err().code(), 4);
    assert_eq!(iptc.find_key("Exif.Image.Make").unwrap_err().code(), 6);
}

#[test]
fn xmp_properties_render() {
    let image = common::open(common::tagged_jpeg());
    let xmp = image.xmp_data();

    assert_eq!(xmp.get_string("Xmp.dc.title").unwrap(), "Harbour");
    assert_eq!(xmp.get_string("Xmp.dc.subject").unwrap(), KEYWORDS.join(", "));
    assert_eq!(xmp.get_string("Xmp.xmp.CreatorTool").unwrap(), "fixture");
    assert_eq!(xmp.find_key("Xmp.nosuch.title").unwrap_err().code(), 35);
}

#[test]
fn stores_share_the_provider_contract() {
    let image = common::open(common::tagged_jpeg());
    let providers: Vec<(Box<dyn MetadataProvider>, &str, &str)> = vec![
        (Box::new(image.exif_data()), "Exif.Image.Make", MAKE),
        (Box::new(image.iptc_data()), "Iptc.Application2.Caption", CAPTION),
        (Box::new(image.xmp_data()), "Xmp.dc.title", "Harbour"),
    ];
    for (provider, key, expected) in providers {
        assert_eq!(provider.get_string(key).unwrap(), expected);
    }
}

// ── traversal ─────────────────────────────────────────────────────────

#[test]
fn iteration_matches_all_tags() {
    let image = common::open(common::tagged_jpeg());

    for (iterated, all) in [
        (collect(image.exif_data().iterator()), image.exif_data().all_tags()),
        (collect(image.iptc_data().iterator()), image.iptc_data().all_tags()),
        (collect(image.xmp_data().iterator()), image.xmp_data().all_tags()),
    ] {
        assert!(!all.is_empty());
        assert_eq!(iterated, all);
    }

    let first = collect(image.iptc_data().iterator());
    let second = collect(image.iptc_data().iterator());
    assert_eq!(first, second);
}

fn collect<F: exiv::Family>(iter: exiv::DatumIterator<F>) -> BTreeMap<String, String> {
    iter.map(|datum| (datum.key().to_string(), datum.to_string()))
        .collect()
}

#[test]
fn repeated_datasets_are_each_visited() {
    let image = common::open(common::tagged_jpeg());
    let iptc = image.iptc_data();

    let keywords: Vec<String> = iptc
        .iterator()
        .filter(|d| d.key() == "Iptc.Application2.Keywords")
        .map(|d| d.to_string())
        .collect();
    assert_eq!(keywords, KEYWORDS);
    assert_eq!(iptc.len(), 1 + KEYWORDS.len());
}

#[test]
fn has_next_does_not_advance() {
    let image = common::open(common::tagged_jpeg());
    let mut iter = image.exif_data().iterator();

    assert!(iter.has_next());
    assert!(iter.has_next());
    let mut count = 0;
    while iter.has_next() {
        iter.next().unwrap();
        count += 1;
    }
    assert_eq!(count, image.exif_data().len());
    assert!(iter.next().is_none());
}

#[test]
fn plain_image_has_empty_stores() {
    let image = common::open(common::plain_jpeg());
    assert!(image.exif_data().is_empty());
    assert!(image.iptc_data().iterator().next().is_none());
    assert!(image.xmp_data().all_tags().is_empty());
}

// ── mutation ──────────────────────────────────────────────────────────

#[test]
fn set_then_read_back() {
    let image = common::open(common::tagged_jpeg());

    image
        .set_metadata_string("exif", "Exif.Image.Artist", "Jane Doe")
        .unwrap();
    image
        .set_metadata_string("iptc", "Iptc.Application2.Headline", "Boats")
        .unwrap();
    image
        .set_metadata_short("exif", "Exif.Image.Orientation", "6")
        .unwrap();
    image.read_metadata().unwrap();

    assert_eq!(image.exif_data().get_string("Exif.Image.Artist").unwrap(), "Jane Doe");
    assert_eq!(image.exif_data().get_string("Exif.Image.Orientation").unwrap(), "6");
    assert_eq!(
        image.iptc_data().get_string("Iptc.Application2.Headline").unwrap(),
        "Boats"
    );
    // Untouched families survive the rewrite.
    assert_eq!(image.xmp_data().get_string("Xmp.dc.title").unwrap(), "Harbour");
}

#[test]
fn written_bytes_reopen_with_changes() {
    let image = common::open(common::plain_jpeg());
    image.set_exif_string("Exif.Image.Make", "Acme").unwrap();
    image.set_iptc_string("Iptc.Application2.Caption", "Hello").unwrap();

    let reopened = common::open(image.get_bytes().to_vec());
    assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), "Acme");
    assert_eq!(
        reopened.iptc_data().get_string("Iptc.Application2.Caption").unwrap(),
        "Hello"
    );
    assert_eq!((reopened.pixel_width(), reopened.pixel_height()), (1, 1));
}

#[test]
fn comment_and_windows_tags_take_text() {
    let image = common::open(common::tagged_jpeg());
    image.set_exif_string("Exif.Photo.UserComment", "Low tide").unwrap();
    image.set_exif_string("Exif.Image.XPTitle", "Hafen bei Dämmerung").unwrap();
    image.set_exif_string("Exif.Image.XPKeywords", "boats;dusk").unwrap();

    let reopened = common::open(image.get_bytes().to_vec());
    let exif = reopened.exif_data();
    assert_eq!(exif.get_string("Exif.Photo.UserComment").unwrap(), "Low tide");
    assert_eq!(exif.get_string("Exif.Image.XPTitle").unwrap(), "Hafen bei Dämmerung");
    assert_eq!(exif.get_string("Exif.Image.XPKeywords").unwrap(), "boats;dusk");
    assert_eq!(exif.get_string("Exif.Image.Make").unwrap(), MAKE);
}

#[test]
fn failed_set_leaves_state_unchanged() {
    let image = common::open(common::tagged_jpeg());
    let bytes = image.get_bytes();
    let tags = image.exif_data().all_tags();

    assert_eq!(
        image
            .set_metadata_string("exif", "Exif.Image.NoSuchTag", "x")
            .unwrap_err()
            .code(),
        7
    );
    assert_eq!(
        image
            .set_metadata_string("iptc", "Iptc.Bogus.Caption", "x")
            .unwrap_err()
            .code(),
        5
    );
    assert_eq!(
        image
            .set_metadata_short("exif", "Exif.Image.Orientation", "sideways")
            .unwrap_err()
            .code(),
        56
    );

    assert_eq!(image.get_bytes().as_ptr(), bytes.as_ptr());
    assert_eq!(image.exif_data().all_tags(), tags);
}

#[test]
fn unknown_metadata_type_is_a_local_error() {
    let image = common::open(common::tagged_jpeg());

    let err = image
        .set_metadata_string("xmp", "Xmp.dc.title", "x")
        .unwrap_err();
    assert_eq!(err.code(), 0);
    assert_eq!(err.message(), "invalid metadata type: xmp");
    assert_eq!(
        image.set_metadata_short("gps", "Exif.Image.Make", "1").unwrap_err().code(),
        0
    );
    assert_eq!("gps".parse::<MetadataFormat>().unwrap_err().code(), 0);
}

#[test]
fn setting_same_value_keeps_length() {
    let image = common::open(common::tagged_jpeg());

    image.set_exif_string("Exif.Image.Artist", "Jane").unwrap();
    let first = image.get_bytes().len();
    image.set_exif_string("Exif.Image.Artist", "Jane").unwrap();
    assert_eq!(image.get_bytes().len(), first);

    image.set_iptc_string("Iptc.Application2.Caption", CAPTION).unwrap();
    let first = image.get_bytes().len();
    image.set_iptc_string("Iptc.Application2.Caption", CAPTION).unwrap();
    assert_eq!(image.get_bytes().len(), first);
}

#[test]
fn strip_then_not_found() {
    let image = common::open(common::tagged_jpeg());

    image.strip_key(MetadataFormat::Exif, "Exif.Image.Make").unwrap();
    image.strip_key(MetadataFormat::Iptc, "Iptc.Application2.Keywords").unwrap();
    image.strip_key(MetadataFormat::Xmp, "Xmp.dc.subject").unwrap();
    image.read_metadata().unwrap();

    assert!(image.exif_data().get_string("Exif.Image.Make").unwrap_err().is_key_not_found());
    assert!(image.iptc_data().find_key("Iptc.Application2.Keywords").unwrap().is_none());
    assert!(image.xmp_data().find_key("Xmp.dc.subject").unwrap().is_none());
    assert_eq!(image.xmp_data().get_string("Xmp.dc.title").unwrap(), "Harbour");
}

#[test]
fn stripping_an_xmp_property_keeps_the_rest() {
    let image = common::open(common::tagged_jpeg());
    image.strip_key(MetadataFormat::Xmp, "Xmp.dc.title").unwrap();
    image.read_metadata().unwrap();

    let reopened = common::open(image.get_bytes().to_vec());
    for xmp in [image.xmp_data(), reopened.xmp_data()] {
        assert!(xmp.get_string("Xmp.dc.title").unwrap_err().is_key_not_found());
        assert_eq!(xmp.get_string("Xmp.dc.subject").unwrap(), KEYWORDS.join(", "));
        assert_eq!(xmp.get_string("Xmp.xmp.CreatorTool").unwrap(), "fixture");
    }
    assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
}

#[test]
fn strip_absent_key_is_not_an_error() {
    let image = common::open(common::tagged_jpeg());
    image.strip_key(MetadataFormat::Exif, "Exif.Photo.Flash").unwrap();
    image.strip_key(MetadataFormat::Exif, "Exif.Photo.Flash").unwrap();
    assert_eq!(
        image.strip_key(MetadataFormat::Exif, "Flash").unwrap_err().code(),
        6
    );
}

// ── live views and lifetime ───────────────────────────────────────────

#[test]
fn stores_see_later_mutations() {
    let image = common::open(common::tagged_jpeg());
    let exif = image.exif_data();
    let make = exif.find_key("Exif.Image.Make").unwrap().unwrap();

    image.set_exif_string("Exif.Image.Make", "Other").unwrap();
    assert_eq!(exif.get_string("Exif.Image.Make").unwrap(), "Other");
    assert_eq!(make.to_string(), "Other");

    image.strip_key(MetadataFormat::Exif, "Exif.Image.Make").unwrap();
    assert_eq!(make.to_string(), "");
}

#[test]
fn derived_objects_keep_the_image_alive() {
    let (store, datum, mut iter) = {
        let image = common::open(common::tagged_jpeg());
        let store = image.iptc_data();
        let datum = image
            .exif_data()
            .find_key("Exif.Image.Make")
            .unwrap()
            .unwrap();
        let iter = image.xmp_data().iterator();
        (store, datum, iter)
    };

    assert_eq!(store.get_string("Iptc.Application2.Caption").unwrap(), CAPTION);
    assert_eq!(datum.to_string(), MAKE);
    assert!(iter.next().is_some());
}

#[test]
fn get_bytes_shares_storage_until_mutated() {
    let image = common::open(common::tagged_jpeg());
    let first = image.get_bytes();
    let second = image.get_bytes();
    assert_eq!(first.as_ptr(), second.as_ptr());

    let snapshot = first.to_vec();
    image.set_exif_string("Exif.Image.Artist", "Jane").unwrap();
    let third = image.get_bytes();
    assert_ne!(third.len(), first.len());
    assert_eq!(&first[..], &snapshot[..]);
}

// ── containers ────────────────────────────────────────────────────────

#[test]
fn webp_round_trip() {
    let image = common::open(common::plain_webp());
    assert_eq!(image.format(), ImageFormat::WebP);

    image.set_exif_string("Exif.Image.Make", MAKE).unwrap();
    let reopened = common::open(image.get_bytes().to_vec());
    assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
    assert_eq!((reopened.pixel_width(), reopened.pixel_height()), (1, 1));
}

#[test]
fn webp_rejects_iptc() {
    let image = common::open(common::plain_webp());
    let bytes = image.get_bytes();

    let err = image
        .set_iptc_string("Iptc.Application2.Caption", "nope")
        .unwrap_err();
    assert_eq!(err.code(), 32);
    assert_eq!(image.get_bytes().as_ptr(), bytes.as_ptr());
}

#[test]
fn tiff_round_trip() {
    let image = common::open(common::plain_tiff());
    assert_eq!(image.format(), ImageFormat::Tiff);

    image.set_exif_string("Exif.Image.Make", MAKE).unwrap();
    image.set_iptc_string("Iptc.Application2.Caption", CAPTION).unwrap();
    let first = image.get_bytes().len();
    image.set_exif_string("Exif.Image.Make", MAKE).unwrap();
    assert_eq!(image.get_bytes().len(), first);

    let reopened = common::open(image.get_bytes().to_vec());
    assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
    assert_eq!(
        reopened.iptc_data().get_string("Iptc.Application2.Caption").unwrap(),
        CAPTION
    );
    assert_eq!((reopened.pixel_width(), reopened.pixel_height()), (1, 1));
}

// ── concurrency ───────────────────────────────────────────────────────

#[test]
fn independent_images_mutate_concurrently() {
    let source = common::tagged_jpeg();

    thread::scope(|scope| {
        for i in 0..8 {
            let data = source.clone();
            scope.spawn(move || {
                let image = common::open(data);
                let artist = format!("Artist {i}");

                let before = image.get_bytes().len();
                image.set_exif_string("Exif.Image.Artist", &artist).unwrap();
                let added = image.get_bytes().len();
                assert!(added > before);

                image.set_exif_string("Exif.Image.Artist", &artist).unwrap();
                assert_eq!(image.get_bytes().len(), added);

                let reopened = common::open(image.get_bytes().to_vec());
                assert_eq!(
                    reopened.exif_data().get_string("Exif.Image.Artist").unwrap(),
                    artist
                );
                assert_eq!(reopened.exif_data().get_string("Exif.Image.Make").unwrap(), MAKE);
            });
        }
    });
}
