use std::path::PathBuf;

use image::RgbaImage;

use crate::assets::pixels::{CompositePlacement, PixelAccess, composite, grayscale_region};
use crate::brightness::mean_brightness;
use crate::cache::ResizedCache;
use crate::catalog::{BrightnessCatalog, CatalogIndex};
use crate::foundation::core::{Dimensions, Tile};
use crate::foundation::error::{MosaicError, MosaicResult};
use crate::pool::FrameJob;
use crate::tiling::decompose;

/// Outcome of matching one tile against the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMatch {
    pub tile: Tile,
    pub mean_brightness: f64,
    /// `None` when the catalog is empty; the tile stays blank.
    pub reference_path: Option<PathBuf>,
}

/// Per-frame tile counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileTally {
    pub total: u64,
    pub matched: u64,
    pub failed: u64,
}

impl TileTally {
    /// Fraction of tiles that received a replacement. A frame without tiles reports `0.0`.
    pub fn match_rate(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// A composited frame and the matches that produced it.
#[derive(Clone, Debug)]
pub struct ComposedFrame {
    pub image: RgbaImage,
    pub matches: Vec<TileMatch>,
    pub tally: TileTally,
}

/// Turns source frames into mosaic frames.
///
/// Holds only shared, read-only state (plus the internally synchronized cache), so one
/// compositor is shared by every frame worker.
pub struct FrameCompositor<'a> {
    index: CatalogIndex<'a>,
    cache: &'a ResizedCache,
    pixels: &'a dyn PixelAccess,
    tile_size: u32,
    background: [u8; 4],
}

impl<'a> FrameCompositor<'a> {
    pub fn new(
        catalog: &'a BrightnessCatalog,
        cache: &'a ResizedCache,
        pixels: &'a dyn PixelAccess,
        tile_size: u32,
        background: [u8; 4],
    ) -> MosaicResult<Self> {
        if tile_size == 0 {
            return Err(MosaicError::validation("tile size must be > 0"));
        }
        Ok(Self {
            index: catalog.index(),
            cache,
            pixels,
            tile_size,
            background,
        })
    }

    /// Replace every tile of `frame` with its nearest-brightness reference.
    ///
    /// Tile failures are logged and the tile is left as background.
    pub fn compose(&self, frame: &RgbaImage) -> MosaicResult<ComposedFrame> {
        let dims = Dimensions::new(frame.width(), frame.height());
        let tiles = decompose(dims.width, dims.height, self.tile_size)?;

        let mut tally = TileTally {
            total: tiles.len() as u64,
            ..TileTally::default()
        };
        let mut matches = Vec::with_capacity(tiles.len());
        let mut placements = Vec::with_capacity(tiles.len());

        for tile in tiles {
            match self.place_tile(frame, tile) {
                Ok((m, placement)) => {
                    if let Some(p) = placement {
                        tally.matched += 1;
                        placements.push(p);
                    }
                    matches.push(m);
                }
                Err(e) => {
                    tally.failed += 1;
                    tracing::warn!(error = %MosaicError::tile(tile, e), "skipping tile");
                }
            }
        }

        Ok(ComposedFrame {
            image: composite(dims, self.background, &placements),
            matches,
            tally,
        })
    }

    /// Decode `job.input`, compose it, and write the result to `job.output`.
    #[tracing::instrument(level = "debug", skip(self), fields(frame = job.index.0))]
    pub fn process(&self, job: &FrameJob) -> MosaicResult<TileTally> {
        let run = || -> MosaicResult<TileTally> {
            let frame = self.pixels.decode(&job.input)?;
            if frame.width() == 0 || frame.height() == 0 {
                return Err(MosaicError::decode(&job.input, "frame has no pixels"));
            }
            let composed = self.compose(&frame)?;
            self.pixels.write(&composed.image, &job.output)?;
            Ok(composed.tally)
        };
        run().map_err(|e| MosaicError::frame(&job.input, e))
    }

    fn place_tile(
        &self,
        frame: &RgbaImage,
        tile: Tile,
    ) -> MosaicResult<(TileMatch, Option<CompositePlacement>)> {
        let gray = grayscale_region(frame, tile)?;
        let mean = mean_brightness(&gray)?;

        let Some(reference) = self.index.nearest(mean) else {
            return Ok((
                TileMatch {
                    tile,
                    mean_brightness: mean,
                    reference_path: None,
                },
                None,
            ));
        };

        let buffer = self.cache.get(&reference.path, tile.width, tile.height)?;
        Ok((
            TileMatch {
                tile,
                mean_brightness: mean,
                reference_path: Some(reference.path.clone()),
            },
            Some(CompositePlacement {
                buffer,
                left: tile.x,
                top: tile.y,
            }),
        ))
    }
}
