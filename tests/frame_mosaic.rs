use std::path::{Path, PathBuf};

use lumosaic::{
    CatalogSource, FrameOutcome, FramePool, MosaicConfig, list_frames, mosaic_frames, mosaic_image,
    pixels_for, prepare_catalog,
};

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "lumosaic_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn write_gray(path: &Path, w: u32, h: u32, v: u8) {
    image::RgbaImage::from_pixel(w, h, image::Rgba([v, v, v, 255]))
        .save(path)
        .unwrap();
}

/// References with mean brightness 50 ("dark") and 200 ("bright").
fn dark_bright_refs(root: &Path) -> PathBuf {
    let refs = root.join("refs");
    std::fs::create_dir_all(&refs).unwrap();
    write_gray(&refs.join("bright.png"), 24, 24, 200);
    write_gray(&refs.join("dark.png"), 24, 24, 50);
    refs
}

fn cfg(tile_size: u32) -> MosaicConfig {
    MosaicConfig {
        tile_size,
        canonical_size: 16,
        workers: Some(2),
        ..MosaicConfig::default()
    }
}

fn pixel(img: &image::RgbaImage, x: u32, y: u32) -> [u8; 4] {
    img.get_pixel(x, y).0
}

#[test]
fn tiles_take_the_nearest_brightness_reference() {
    let tmp = temp_dir("frame_nearest");
    let refs = dark_bright_refs(&tmp);

    // Left tile brightness 60, right tile 130.
    let mut frame = image::RgbaImage::from_pixel(32, 16, image::Rgba([60, 60, 60, 255]));
    for y in 0..16 {
        for x in 16..32 {
            frame.put_pixel(x, y, image::Rgba([130, 130, 130, 255]));
        }
    }
    let input = tmp.join("frame.png");
    frame.save(&input).unwrap();

    let out = tmp.join("out").join("mosaic.png");
    let tally = mosaic_image(
        &input,
        &out,
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg(16),
    )
    .unwrap();
    assert_eq!((tally.total, tally.matched, tally.failed), (2, 2, 0));

    let mosaic = image::open(&out).unwrap().to_rgba8();
    assert_eq!(mosaic.dimensions(), (32, 16));
    assert_eq!(pixel(&mosaic, 3, 3), [50, 50, 50, 255]);
    // |130 - 50| = 80 > |130 - 200| = 70
    assert_eq!(pixel(&mosaic, 20, 3), [200, 200, 200, 255]);

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn empty_catalog_yields_a_blank_canvas() {
    let tmp = temp_dir("frame_empty_catalog");
    let refs = tmp.join("refs");
    std::fs::create_dir_all(&refs).unwrap();

    let input = tmp.join("frame.png");
    write_gray(&input, 20, 12, 90);
    let out = tmp.join("mosaic.png");
    let tally = mosaic_image(
        &input,
        &out,
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg(8),
    )
    .unwrap();
    assert_eq!(tally.total, 6);
    assert_eq!(tally.matched, 0);

    let mosaic = image::open(&out).unwrap().to_rgba8();
    assert_eq!(mosaic.dimensions(), (20, 12));
    assert!(mosaic.pixels().all(|p| p.0 == [0, 0, 0, 0]));

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn edge_tiles_are_clipped_and_filled() {
    let tmp = temp_dir("frame_clipped");
    let refs = dark_bright_refs(&tmp);

    let input = tmp.join("frame.png");
    write_gray(&input, 18, 18, 220);
    let out = tmp.join("mosaic.png");
    let tally = mosaic_image(
        &input,
        &out,
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg(16),
    )
    .unwrap();
    assert_eq!((tally.total, tally.matched), (4, 4));

    let mosaic = image::open(&out).unwrap().to_rgba8();
    assert_eq!(mosaic.dimensions(), (18, 18));
    assert!(mosaic.pixels().all(|p| p.0 == [200, 200, 200, 255]));

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn reused_manifest_matches_a_fresh_build() {
    let tmp = temp_dir("frame_manifest");
    let refs = dark_bright_refs(&tmp);
    let cfg = cfg(8);
    let pixels = pixels_for(&cfg);
    let pool = FramePool::new(2).unwrap();

    let catalog_dir = tmp.join("catalog");
    let built = prepare_catalog(
        &CatalogSource::Build { refs_dir: refs },
        &catalog_dir,
        &cfg,
        pixels.as_ref(),
        &pool,
    )
    .unwrap();
    let loaded = prepare_catalog(
        &CatalogSource::Manifest(catalog_dir.join(lumosaic::CATALOG_MANIFEST_FILE)),
        &tmp.join("unused"),
        &cfg,
        pixels.as_ref(),
        &pool,
    )
    .unwrap();
    assert_eq!(built, loaded);

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn failed_frames_are_reported_and_backfilled() {
    let tmp = temp_dir("frame_sequence_failure");
    let refs = dark_bright_refs(&tmp);
    let cfg = cfg(4);
    let pixels = pixels_for(&cfg);
    let pool = FramePool::new(2).unwrap();
    let catalog = prepare_catalog(
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg,
        pixels.as_ref(),
        &pool,
    )
    .unwrap();

    let frames_dir = tmp.join("frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    for n in 1..=5u8 {
        let path = frames_dir.join(lumosaic::frame_file_name(u64::from(n)));
        if n == 3 {
            std::fs::write(&path, b"not a png").unwrap();
        } else {
            write_gray(&path, 8, 8, n * 40);
        }
    }
    let frames = list_frames(&frames_dir).unwrap();
    assert_eq!(frames.len(), 5);

    let mosaic_dir = tmp.join("mosaic");
    let report = mosaic_frames(&frames, &mosaic_dir, &catalog, &cfg, pixels, &pool).unwrap();
    let summary = &report.summary;
    assert_eq!((summary.total, summary.succeeded, summary.failed), (5, 4, 1));
    assert!(matches!(summary.results[2].outcome, FrameOutcome::Failure(_)));
    assert!(summary.is_degraded(cfg.failure_warn_ratio));

    // Every slot exists so the sequence can be encoded without gaps.
    assert_eq!(list_frames(&mosaic_dir).unwrap().len(), 5);

    // Both references are resized to 4x4 exactly once.
    assert_eq!(report.cache.misses, 2);
    assert!(report.cache.hits > 0);

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn stale_mosaic_frames_from_a_longer_run_are_removed() {
    let tmp = temp_dir("frame_stale_outputs");
    let refs = dark_bright_refs(&tmp);
    let cfg = cfg(4);
    let pixels = pixels_for(&cfg);
    let pool = FramePool::new(2).unwrap();
    let catalog = prepare_catalog(
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg,
        pixels.as_ref(),
        &pool,
    )
    .unwrap();

    let frames_dir = tmp.join("frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    for n in 1..=3u64 {
        write_gray(&frames_dir.join(lumosaic::frame_file_name(n)), 8, 8, 60);
    }
    let frames = list_frames(&frames_dir).unwrap();

    // Leftovers from an earlier six-frame run in the same output directory.
    let mosaic_dir = tmp.join("mosaic");
    std::fs::create_dir_all(&mosaic_dir).unwrap();
    for n in 4..=6u64 {
        write_gray(&mosaic_dir.join(lumosaic::frame_file_name(n)), 8, 8, 255);
    }
    std::fs::write(mosaic_dir.join("notes.txt"), b"keep me").unwrap();

    let report = mosaic_frames(&frames, &mosaic_dir, &catalog, &cfg, pixels, &pool).unwrap();
    assert_eq!(report.summary.succeeded, 3);

    let outputs = list_frames(&mosaic_dir).unwrap();
    let names: Vec<_> = outputs
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec!["frame_000001.png", "frame_000002.png", "frame_000003.png"]
    );
    assert!(mosaic_dir.join("notes.txt").exists());

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn mosaic_directory_must_not_be_the_frames_directory() {
    let tmp = temp_dir("frame_same_dir");
    let refs = dark_bright_refs(&tmp);
    let cfg = cfg(4);
    let pixels = pixels_for(&cfg);
    let pool = FramePool::new(1).unwrap();
    let catalog = prepare_catalog(
        &CatalogSource::Build { refs_dir: refs },
        &tmp.join("catalog"),
        &cfg,
        pixels.as_ref(),
        &pool,
    )
    .unwrap();

    let frames_dir = tmp.join("frames");
    std::fs::create_dir_all(&frames_dir).unwrap();
    write_gray(&frames_dir.join(lumosaic::frame_file_name(1)), 8, 8, 60);
    let frames = list_frames(&frames_dir).unwrap();

    let err = mosaic_frames(&frames, &frames_dir, &catalog, &cfg, pixels, &pool).unwrap_err();
    assert!(err.is_fatal());
    // The input frame is untouched.
    assert_eq!(list_frames(&frames_dir).unwrap().len(), 1);

    std::fs::remove_dir_all(&tmp).ok();
}
