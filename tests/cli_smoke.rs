use std::path::{Path, PathBuf};

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_lumosaic")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "lumosaic.exe"
            } else {
                "lumosaic"
            });
            p
        })
}

fn write_gray(path: &Path, w: u32, h: u32, v: u8) {
    image::RgbaImage::from_pixel(w, h, image::Rgba([v, v, v, 255]))
        .save(path)
        .unwrap();
}

fn fixture(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("cli_smoke").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    let refs = dir.join("refs");
    std::fs::create_dir_all(&refs).unwrap();
    write_gray(&refs.join("dark.png"), 12, 12, 40);
    write_gray(&refs.join("light.png"), 12, 12, 210);
    write_gray(&dir.join("in.png"), 24, 20, 180);
    dir
}

#[test]
fn cli_catalog_writes_manifest() {
    let dir = fixture("catalog");
    let out = dir.join("catalog");

    let status = std::process::Command::new(exe())
        .args(["catalog", "--canonical-size", "8", "--refs"])
        .arg(dir.join("refs"))
        .arg("--out")
        .arg(&out)
        .status()
        .unwrap();

    assert!(status.success());
    let manifest = out.join("catalog.json");
    assert!(manifest.exists());
    let catalog = lumosaic::BrightnessCatalog::load_manifest(&manifest).unwrap();
    assert_eq!(catalog.len(), 2);
}

#[test]
fn cli_frame_writes_png() {
    let dir = fixture("frame");
    let out_path = dir.join("out.png");

    let status = std::process::Command::new(exe())
        .args(["frame", "--tile-size", "8", "--workers", "2", "--in"])
        .arg(dir.join("in.png"))
        .arg("--out")
        .arg(&out_path)
        .arg("--refs")
        .arg(dir.join("refs"))
        .arg("--catalog-dir")
        .arg(dir.join("catalog"))
        .status()
        .unwrap();

    assert!(status.success());
    let mosaic = image::open(&out_path).unwrap().to_rgba8();
    assert_eq!(mosaic.dimensions(), (24, 20));
    assert_eq!(mosaic.get_pixel(23, 19).0, [210, 210, 210, 255]);
}

#[test]
fn cli_rejects_zero_tile_size() {
    let dir = fixture("bad_tile");

    let status = std::process::Command::new(exe())
        .args(["frame", "--tile-size", "0", "--in"])
        .arg(dir.join("in.png"))
        .arg("--out")
        .arg(dir.join("out.png"))
        .arg("--refs")
        .arg(dir.join("refs"))
        .status()
        .unwrap();

    assert!(!status.success());
    assert!(!dir.join("out.png").exists());
}
