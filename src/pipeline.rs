use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::assets::media::{clear_frames, extract_frames, is_ffprobe_on_path, probe_video};
use crate::assets::pixels::{ImagePixels, PixelAccess};
use crate::cache::{CacheStats, ResizedCache};
use crate::catalog::{BrightnessCatalog, CatalogBuildOpts, build_catalog, list_reference_images};
use crate::compositor::{FrameCompositor, TileTally};
use crate::config::{MosaicConfig, OutputLayout};
use crate::encode_ffmpeg::{EncodeConfig, EncodeProgress, encode_frame_sequence};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::pool::{CancelToken, FrameJob, FrameOutcome, FramePool, RunSummary};
use crate::tiling::tile_count;

/// Where a run's catalog comes from.
#[derive(Clone, Debug)]
pub enum CatalogSource {
    /// Normalize every image in a reference directory.
    Build { refs_dir: PathBuf },
    /// Reuse a previously written `catalog.json`.
    Manifest(PathBuf),
}

/// Result of compositing a set of frames.
#[derive(Clone, Debug)]
pub struct FramesReport {
    pub summary: RunSummary,
    pub cache: CacheStats,
}

/// Result of a full video run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub catalog_size: usize,
    pub frames: FramesReport,
    pub video_path: PathBuf,
    pub frames_encoded: u64,
}

/// Default pixel adapter for `cfg`.
pub fn pixels_for(cfg: &MosaicConfig) -> Arc<dyn PixelAccess> {
    Arc::new(ImagePixels::new(cfg.resize_filter))
}

/// Build the catalog into `catalog_dir`, or load it from a manifest.
pub fn prepare_catalog(
    source: &CatalogSource,
    catalog_dir: &Path,
    cfg: &MosaicConfig,
    pixels: &dyn PixelAccess,
    pool: &FramePool,
) -> MosaicResult<BrightnessCatalog> {
    let catalog = match source {
        CatalogSource::Build { refs_dir } => {
            let sources = list_reference_images(refs_dir)?;
            let opts = CatalogBuildOpts {
                canonical_size: cfg.canonical_size,
                out_dir: catalog_dir.to_path_buf(),
                policy: cfg.collision_policy,
            };
            build_catalog(&sources, &opts, pixels, pool)?
        }
        CatalogSource::Manifest(path) => BrightnessCatalog::load_manifest(path)?,
    };
    if catalog.is_empty() {
        tracing::warn!("reference catalog is empty; every mosaic frame will be blank");
    }
    Ok(catalog)
}

/// Composite every frame in `frames` into `out_dir`, keeping each frame's file name.
///
/// Frame files already in `out_dir` are removed first, so the directory ends up holding exactly
/// one output per input frame.
///
/// Frame failures are contained: they are counted in the summary, and the failed slot is filled
/// with the untouched source frame so the output sequence stays gap-free for encoding.
pub fn mosaic_frames(
    frames: &[PathBuf],
    out_dir: &Path,
    catalog: &BrightnessCatalog,
    cfg: &MosaicConfig,
    pixels: Arc<dyn PixelAccess>,
    pool: &FramePool,
) -> MosaicResult<FramesReport> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create mosaic directory '{}'", out_dir.display()))?;
    let out_abs = std::path::absolute(out_dir)
        .with_context(|| format!("resolve mosaic directory '{}'", out_dir.display()))?;
    let reads_from_out_dir = frames.iter().any(|f| {
        f.parent()
            .and_then(|p| std::path::absolute(p).ok())
            .is_some_and(|p| p == out_abs)
    });
    if reads_from_out_dir {
        return Err(MosaicError::validation(format!(
            "mosaic directory '{}' must differ from the frames directory",
            out_dir.display()
        )));
    }
    clear_frames(out_dir)?;
    let jobs = frames
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let name = input.file_name().ok_or_else(|| {
                MosaicError::validation(format!("frame path '{}' has no file name", input.display()))
            })?;
            Ok(FrameJob {
                index: FrameIndex(i as u64),
                input: input.clone(),
                output: out_dir.join(name),
            })
        })
        .collect::<MosaicResult<Vec<_>>>()?;

    if let Some(first) = frames.first() {
        match pixels.decode_metadata(first) {
            Ok(dims) => tracing::info!(
                width = dims.width,
                height = dims.height,
                tiles_per_frame = tile_count(dims.width, dims.height, cfg.tile_size),
                "frame geometry"
            ),
            Err(e) => tracing::warn!(error = %e, "could not read first frame dimensions"),
        }
    }

    let cache = ResizedCache::with_max_bytes(Arc::clone(&pixels), cfg.cache_max_bytes);
    let compositor = FrameCompositor::new(
        catalog,
        &cache,
        pixels.as_ref(),
        cfg.tile_size,
        cfg.background_rgba,
    )?;

    let summary = pool.run(&jobs, |job| compositor.process(job));
    fill_failed_frames(&jobs, &summary);
    report_summary(&summary, cfg.failure_warn_ratio);

    let cache = cache.stats();
    tracing::info!(
        entries = cache.entries,
        bytes = cache.bytes,
        hits = cache.hits,
        misses = cache.misses,
        evictions = cache.evictions,
        "resized reference cache"
    );
    Ok(FramesReport { summary, cache })
}

/// Mosaic one still image.
pub fn mosaic_image(
    input: &Path,
    output: &Path,
    source: &CatalogSource,
    catalog_dir: &Path,
    cfg: &MosaicConfig,
) -> MosaicResult<TileTally> {
    cfg.validate()?;
    let pixels = pixels_for(cfg);
    let pool = FramePool::new(cfg.effective_workers())?;
    let catalog = prepare_catalog(source, catalog_dir, cfg, pixels.as_ref(), &pool)?;
    pool.shutdown();

    crate::encode_ffmpeg::ensure_parent_dir(output)?;
    let cache = ResizedCache::with_max_bytes(Arc::clone(&pixels), cfg.cache_max_bytes);
    let compositor = FrameCompositor::new(
        &catalog,
        &cache,
        pixels.as_ref(),
        cfg.tile_size,
        cfg.background_rgba,
    )?;
    let job = FrameJob {
        index: FrameIndex(0),
        input: input.to_path_buf(),
        output: output.to_path_buf(),
    };
    let tally = compositor.process(&job)?;
    tracing::info!(
        tiles = tally.total,
        matched = tally.matched,
        failed = tally.failed,
        out = %output.display(),
        "wrote mosaic image"
    );
    Ok(tally)
}

/// Full run: catalog, frame extraction, frame compositing, video encoding.
///
/// Catalog-build, extraction and encoding failures abort the run; frame failures are reported in
/// the returned summary.
pub fn render_mosaic_video(
    video: &Path,
    source: &CatalogSource,
    layout: &OutputLayout,
    cfg: &MosaicConfig,
) -> MosaicResult<RunReport> {
    render_mosaic_video_with_cancel(video, source, layout, cfg, &CancelToken::default())
}

/// [`render_mosaic_video`] that stops when `cancel` fires.
///
/// The token is checked between stages and before every frame. Frames already compositing finish;
/// the run then returns [`MosaicError::Cancelled`] without encoding.
#[tracing::instrument(skip(video, source, cfg, cancel), fields(video = %video.display()))]
pub fn render_mosaic_video_with_cancel(
    video: &Path,
    source: &CatalogSource,
    layout: &OutputLayout,
    cfg: &MosaicConfig,
    cancel: &CancelToken,
) -> MosaicResult<RunReport> {
    cfg.validate()?;
    check_cancelled(cancel, "start")?;
    layout.ensure()?;
    let fps = cfg.frame_rate()?;
    let pixels = pixels_for(cfg);
    let pool = FramePool::with_cancel(cfg.effective_workers(), cancel.clone())?;

    let catalog = prepare_catalog(source, &layout.catalog_dir(), cfg, pixels.as_ref(), &pool)?;
    check_cancelled(cancel, "catalog")?;

    if is_ffprobe_on_path() {
        let info = probe_video(video)?;
        tracing::info!(
            width = info.width,
            height = info.height,
            source_fps = info.source_fps(),
            duration_sec = info.duration_sec,
            "probed source video"
        );
    }
    let frames = extract_frames(video, &layout.frames_dir(), fps)?;
    check_cancelled(cancel, "extraction")?;

    let report = mosaic_frames(
        &frames,
        &layout.mosaic_dir(),
        &catalog,
        cfg,
        Arc::clone(&pixels),
        &pool,
    )?;
    pool.shutdown();
    check_cancelled(cancel, "compositing")?;

    if report.summary.succeeded == 0 {
        return Err(MosaicError::encoding(
            "no frame was composited successfully; refusing to encode",
        ));
    }

    let encode_cfg = EncodeConfig {
        frames_dir: layout.mosaic_dir(),
        fps,
        out_path: layout.video_path(),
        overwrite: true,
    };
    let mut last_logged = 0u64;
    let total = report.summary.total;
    let frames_encoded = encode_frame_sequence(&encode_cfg, &mut |p: EncodeProgress| {
        // Roughly every tenth of the sequence.
        if p.finished || p.frames_encoded >= last_logged + (total / 10).max(1) {
            last_logged = p.frames_encoded;
            tracing::info!(encoded = p.frames_encoded, total, "encoding mosaic video");
        }
    })?;

    tracing::info!(out = %layout.video_path().display(), frames_encoded, "wrote mosaic video");
    Ok(RunReport {
        catalog_size: catalog.len(),
        frames: report,
        video_path: layout.video_path(),
        frames_encoded,
    })
}

fn check_cancelled(cancel: &CancelToken, stage: &str) -> MosaicResult<()> {
    if cancel.is_cancelled() {
        tracing::warn!(stage, "run cancelled");
        return Err(MosaicError::Cancelled);
    }
    Ok(())
}

fn fill_failed_frames(jobs: &[FrameJob], summary: &RunSummary) {
    for (job, result) in jobs.iter().zip(&summary.results) {
        if result.is_success() {
            continue;
        }
        if let Err(e) = std::fs::copy(&job.input, &job.output) {
            tracing::warn!(
                frame = job.index.0,
                error = %e,
                "could not substitute source frame for failed mosaic frame"
            );
        }
    }
}

fn report_summary(summary: &RunSummary, warn_ratio: f64) {
    tracing::info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        abandoned = summary.abandoned,
        mean_match_rate = summary.mean_match_rate(),
        "mosaic frames done"
    );
    if summary.is_degraded(warn_ratio) {
        tracing::warn!(
            failure_ratio = summary.failure_ratio(),
            threshold = warn_ratio,
            "many frames failed; output quality may be degraded"
        );
    }
    for r in &summary.results {
        if let FrameOutcome::Failure(reason) = &r.outcome {
            tracing::debug!(frame = r.index.0, path = %r.path.display(), reason, "failed frame");
        }
    }
}
