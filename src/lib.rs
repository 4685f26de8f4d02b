//! Lumosaic turns a video into a photo mosaic of itself.
//!
//! Every frame is cut into square tiles; each tile is replaced by the reference image whose mean
//! brightness is nearest to the tile's own. The pipeline is:
//!
//! - Normalize a reference directory into a [`BrightnessCatalog`]
//! - Extract the source video into numbered frames (requires `ffmpeg` on PATH)
//! - Composite frames concurrently on a bounded [`FramePool`], sharing one [`ResizedCache`]
//! - Re-encode the composited frames into an MP4
//!
//! [`render_mosaic_video`] runs all of it; the individual stages are public for callers that
//! only need one of them.
#![forbid(unsafe_code)]

mod assets;
mod foundation;

pub(crate) mod brightness;
pub(crate) mod cache;
pub(crate) mod catalog;
pub(crate) mod compositor;
/// Run configuration and output layout.
pub mod config;
pub(crate) mod encode_ffmpeg;
pub(crate) mod pipeline;
pub(crate) mod pool;
pub(crate) mod tiling;

pub use crate::foundation::core::{Dimensions, Fps, FrameIndex, Tile};
pub use crate::foundation::error::{MosaicError, MosaicResult};

pub use crate::assets::media::{
    FRAME_PATTERN, VideoSourceInfo, clear_frames, extract_frames, frame_file_name, is_ffmpeg_on_path,
    is_ffprobe_on_path, list_frames, probe_video,
};
pub use crate::assets::pixels::{
    CompositePlacement, ImagePixels, PixelAccess, ResizeFilter, composite, grayscale,
    grayscale_region,
};
pub use crate::brightness::mean_brightness;
pub use crate::cache::{CacheKey, CacheStats, ResizedCache};
pub use crate::catalog::{
    BrightnessCatalog, CATALOG_MANIFEST_FILE, CatalogBuildOpts, CatalogIndex, CollisionPolicy,
    ReferenceImage, build_catalog, list_reference_images,
};
pub use crate::compositor::{ComposedFrame, FrameCompositor, TileMatch, TileTally};
pub use crate::config::{MosaicConfig, OutputLayout};
pub use crate::encode_ffmpeg::{EncodeConfig, EncodeProgress, encode_frame_sequence};
pub use crate::pipeline::{
    CatalogSource, FramesReport, RunReport, mosaic_frames, mosaic_image, pixels_for,
    prepare_catalog, render_mosaic_video, render_mosaic_video_with_cancel,
};
pub use crate::pool::{
    CancelToken, FrameJob, FrameOutcome, FramePool, FrameResult, RunSummary,
};
pub use crate::tiling::{decompose, tile_count};
