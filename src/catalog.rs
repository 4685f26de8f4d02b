use std::path::{Path, PathBuf};

use anyhow::Context as _;
use rayon::prelude::*;

use crate::assets::pixels::{PixelAccess, grayscale};
use crate::brightness::mean_brightness;
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::pool::FramePool;

/// File name of the JSON manifest written next to the normalized reference images.
pub const CATALOG_MANIFEST_FILE: &str = "catalog.json";

const REFERENCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"];

/// A normalized reference image and its mean brightness.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReferenceImage {
    /// Path of the normalized (canonical-size) copy.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub mean_brightness: f64,
}

/// What to do when two references have exactly the same mean brightness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollisionPolicy {
    /// Keep only the first reference seen for a given brightness.
    KeepFirst,
    /// Keep every reference. Matching still prefers the first inserted among equals.
    #[default]
    KeepAll,
}

/// Read-only collection of references, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BrightnessCatalog {
    policy: CollisionPolicy,
    entries: Vec<ReferenceImage>,
}

impl BrightnessCatalog {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            entries: Vec::new(),
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Append a reference. Returns `false` if it was dropped by [`CollisionPolicy::KeepFirst`].
    pub fn insert(&mut self, image: ReferenceImage) -> MosaicResult<bool> {
        if !image.mean_brightness.is_finite() {
            return Err(MosaicError::validation(format!(
                "reference '{}' has non-finite brightness",
                image.path.display()
            )));
        }
        if self.policy == CollisionPolicy::KeepFirst
            && self
                .entries
                .iter()
                .any(|e| e.mean_brightness == image.mean_brightness)
        {
            return Ok(false);
        }
        self.entries.push(image);
        Ok(true)
    }

    pub fn entries(&self) -> &[ReferenceImage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Nearest reference by absolute brightness delta, scanning in insertion order.
    ///
    /// The first entry reaching the minimum delta wins. `None` for an empty catalog.
    pub fn nearest(&self, brightness: f64) -> Option<&ReferenceImage> {
        let mut best: Option<(&ReferenceImage, f64)> = None;
        for entry in &self.entries {
            let delta = (entry.mean_brightness - brightness).abs();
            match best {
                Some((_, best_delta)) if delta >= best_delta => {}
                _ => best = Some((entry, delta)),
            }
        }
        best.map(|(entry, _)| entry)
    }

    /// Build a sorted lookup structure answering the same queries as [`Self::nearest`].
    pub fn index(&self) -> CatalogIndex<'_> {
        CatalogIndex::new(self)
    }

    /// Write the catalog as JSON to `path`.
    ///
    /// Entries stored under the manifest's directory are written relative to it, so the catalog
    /// directory can be moved as a unit.
    pub fn write_manifest(&self, path: &Path) -> MosaicResult<()> {
        let base = path.parent().unwrap_or(Path::new(""));
        let portable = Self {
            policy: self.policy,
            entries: self
                .entries
                .iter()
                .map(|e| ReferenceImage {
                    path: e.path.strip_prefix(base).unwrap_or(&e.path).to_path_buf(),
                    ..e.clone()
                })
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&portable).context("serialize catalog manifest")?;
        std::fs::write(path, json)
            .with_context(|| format!("write catalog manifest '{}'", path.display()))?;
        Ok(())
    }

    /// Read a manifest written by [`Self::write_manifest`].
    ///
    /// Relative entry paths resolve against the manifest's directory.
    pub fn load_manifest(path: &Path) -> MosaicResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read catalog manifest '{}'", path.display()))?;
        let mut catalog: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse catalog manifest '{}'", path.display()))?;
        let base = path.parent().unwrap_or(Path::new(""));
        for entry in &mut catalog.entries {
            if entry.path.is_relative() {
                entry.path = base.join(&entry.path);
            }
            if !entry.mean_brightness.is_finite() {
                return Err(MosaicError::validation(format!(
                    "catalog manifest entry '{}' has non-finite brightness",
                    entry.path.display()
                )));
            }
        }
        Ok(catalog)
    }
}

/// Catalog entries sorted by brightness for `O(log n)` nearest lookups.
///
/// Results, including the first-inserted tie-break, are identical to
/// [`BrightnessCatalog::nearest`].
#[derive(Debug)]
pub struct CatalogIndex<'a> {
    catalog: &'a BrightnessCatalog,
    // (brightness, insertion index), ordered by brightness then insertion index.
    sorted: Vec<(f64, usize)>,
}

impl<'a> CatalogIndex<'a> {
    fn new(catalog: &'a BrightnessCatalog) -> Self {
        let mut sorted: Vec<(f64, usize)> = catalog
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.mean_brightness, i))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Self { catalog, sorted }
    }

    pub fn nearest(&self, brightness: f64) -> Option<&'a ReferenceImage> {
        if self.sorted.is_empty() {
            return None;
        }

        // `above` is the first entry with brightness >= target. Within a run of equal
        // brightness the first slot has the lowest insertion index.
        let above = self.sorted.partition_point(|&(b, _)| b < brightness);
        let upper = self.sorted.get(above).copied();
        let lower = above.checked_sub(1).map(|i| {
            let run_value = self.sorted[i].0;
            let run_start = self.sorted.partition_point(|&(b, _)| b < run_value);
            self.sorted[run_start]
        });

        let pick = match (lower, upper) {
            (Some(lo), Some(hi)) => {
                let d_lo = (lo.0 - brightness).abs();
                let d_hi = (hi.0 - brightness).abs();
                if d_lo < d_hi || (d_lo == d_hi && lo.1 < hi.1) {
                    lo
                } else {
                    hi
                }
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return None,
        };
        self.catalog.entries.get(pick.1)
    }
}

/// List reference image files in `dir`, sorted by file name.
pub fn list_reference_images(dir: &Path) -> MosaicResult<Vec<PathBuf>> {
    let read = std::fs::read_dir(dir)
        .with_context(|| format!("read reference directory '{}'", dir.display()))?;
    let mut paths = Vec::new();
    for entry in read {
        let entry =
            entry.with_context(|| format!("read reference directory '{}'", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| REFERENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Options for [`build_catalog`].
#[derive(Clone, Debug)]
pub struct CatalogBuildOpts {
    /// Edge length every reference is normalized to.
    pub canonical_size: u32,
    /// Where the normalized copies and the manifest are written.
    pub out_dir: PathBuf,
    pub policy: CollisionPolicy,
}

/// Normalize every reference, measure its brightness, and collect the catalog.
///
/// References are processed in parallel on `pool` but inserted in input order, so the catalog is
/// identical across runs. Any single failure aborts the build.
#[tracing::instrument(skip(sources, pixels, pool), fields(count = sources.len()))]
pub fn build_catalog(
    sources: &[PathBuf],
    opts: &CatalogBuildOpts,
    pixels: &dyn PixelAccess,
    pool: &FramePool,
) -> MosaicResult<BrightnessCatalog> {
    if opts.canonical_size == 0 {
        return Err(MosaicError::validation("canonical size must be > 0"));
    }
    let out_dir = prepare_out_dir(&opts.out_dir)
        .map_err(|e| MosaicError::catalog_build(&opts.out_dir, e))?;
    let opts = &CatalogBuildOpts {
        out_dir,
        ..opts.clone()
    };

    let normalized = pool.install(|| {
        sources
            .par_iter()
            .enumerate()
            .map(|(i, src)| {
                normalize_reference(i, src, opts, pixels)
                    .map_err(|e| MosaicError::catalog_build(src, e))
            })
            .collect::<MosaicResult<Vec<_>>>()
    })?;

    let mut catalog = BrightnessCatalog::new(opts.policy);
    let mut dropped = 0usize;
    for image in normalized {
        if !catalog.insert(image)? {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::warn!(
            dropped,
            "references collapsed onto an identical brightness (keep-first policy)"
        );
    }

    let manifest = opts.out_dir.join(CATALOG_MANIFEST_FILE);
    catalog
        .write_manifest(&manifest)
        .map_err(|e| MosaicError::catalog_build(&manifest, e))?;
    tracing::info!(
        references = catalog.len(),
        out_dir = %opts.out_dir.display(),
        "built brightness catalog"
    );
    Ok(catalog)
}

/// Create `dir` and return it as an absolute path.
fn prepare_out_dir(dir: &Path) -> MosaicResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create catalog output directory '{}'", dir.display()))?;
    let absolute = std::path::absolute(dir)
        .with_context(|| format!("resolve catalog output directory '{}'", dir.display()))?;
    Ok(absolute)
}

fn normalize_reference(
    ordinal: usize,
    src: &Path,
    opts: &CatalogBuildOpts,
    pixels: &dyn PixelAccess,
) -> MosaicResult<ReferenceImage> {
    let decoded = pixels.decode(src)?;
    let resized = pixels.resize(&decoded, opts.canonical_size, opts.canonical_size)?;
    let mean = mean_brightness(&grayscale(&resized))?;

    let stem = src
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reference");
    // Ordinal prefix keeps `a.png` and `a.jpg` from overwriting each other.
    let out_path = opts.out_dir.join(format!("{ordinal:05}_{stem}.png"));
    pixels.write(&resized, &out_path)?;
    tracing::debug!(src = %src.display(), mean, "normalized reference");

    Ok(ReferenceImage {
        path: out_path,
        width: opts.canonical_size,
        height: opts.canonical_size,
        mean_brightness: mean,
    })
}
