use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::assets::pixels::ResizeFilter;
use crate::catalog::{CATALOG_MANIFEST_FILE, CollisionPolicy};
use crate::foundation::core::Fps;
use crate::foundation::error::{MosaicError, MosaicResult};

pub const DEFAULT_TILE_SIZE: u32 = 32;
pub const DEFAULT_CANONICAL_SIZE: u32 = 256;
pub const DEFAULT_FPS: u32 = 24;
pub const DEFAULT_FAILURE_WARN_RATIO: f64 = 0.1;

/// Upper bound on the default worker count. Each worker holds a decoded frame plus its resized
/// tiles, so the default stays well below large core counts.
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Tunables for a mosaic run.
///
/// Every field has a default, so a JSON config file only needs the values it overrides.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MosaicConfig {
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Edge length every reference image is normalized to.
    pub canonical_size: u32,
    /// Concurrent frame workers. `None` derives a value from the CPU count.
    pub workers: Option<usize>,
    /// Frame rate used for both extraction and re-encoding.
    pub fps: u32,
    /// Canvas fill for tiles without a match (straight RGBA8).
    pub background_rgba: [u8; 4],
    pub collision_policy: CollisionPolicy,
    pub resize_filter: ResizeFilter,
    /// Retained bytes before the resized-reference cache starts evicting. `None` never evicts.
    pub cache_max_bytes: Option<u64>,
    /// Fraction of failed frames above which the run summary warns about degraded output.
    pub failure_warn_ratio: f64,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            canonical_size: DEFAULT_CANONICAL_SIZE,
            workers: None,
            fps: DEFAULT_FPS,
            background_rgba: [0, 0, 0, 0],
            collision_policy: CollisionPolicy::default(),
            resize_filter: ResizeFilter::default(),
            cache_max_bytes: None,
            failure_warn_ratio: DEFAULT_FAILURE_WARN_RATIO,
        }
    }
}

impl MosaicConfig {
    pub fn from_path(path: &Path) -> MosaicResult<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse config '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> MosaicResult<()> {
        if self.tile_size == 0 {
            return Err(MosaicError::validation("tile_size must be > 0"));
        }
        if self.canonical_size == 0 {
            return Err(MosaicError::validation("canonical_size must be > 0"));
        }
        if self.workers == Some(0) {
            return Err(MosaicError::validation("workers must be >= 1 when set"));
        }
        if self.fps == 0 {
            return Err(MosaicError::validation("fps must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.failure_warn_ratio) {
            return Err(MosaicError::validation(
                "failure_warn_ratio must be within [0, 1]",
            ));
        }
        Ok(())
    }

    /// Worker count to use: the configured value, or [`default_worker_count`].
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }

    pub fn frame_rate(&self) -> MosaicResult<Fps> {
        Fps::new(self.fps, 1)
    }
}

/// One less than the available parallelism, clamped to `1..=MAX_DEFAULT_WORKERS`.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, MAX_DEFAULT_WORKERS)
}

/// Directory layout of a run's outputs under one root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Normalized reference images and the catalog manifest.
    pub fn catalog_dir(&self) -> PathBuf {
        self.root.join("catalog")
    }

    pub fn catalog_manifest_path(&self) -> PathBuf {
        self.catalog_dir().join(CATALOG_MANIFEST_FILE)
    }

    /// Frames extracted from the source video.
    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Composited mosaic frames, named like their source frames.
    pub fn mosaic_dir(&self) -> PathBuf {
        self.root.join("mosaic")
    }

    pub fn video_path(&self) -> PathBuf {
        self.root.join("mosaic.mp4")
    }

    pub fn ensure(&self) -> MosaicResult<()> {
        for dir in [self.catalog_dir(), self.frames_dir(), self.mosaic_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create output directory '{}'", dir.display()))?;
        }
        Ok(())
    }
}
