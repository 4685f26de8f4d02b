use std::path::Path;
use std::sync::Arc;

use image::{RgbaImage, imageops};

use crate::foundation::core::{Dimensions, Tile};
use crate::foundation::error::{MosaicError, MosaicResult};

/// Resampling filter used when normalizing references and sizing replacement tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    fn filter_type(self) -> imageops::FilterType {
        match self {
            Self::Nearest => imageops::FilterType::Nearest,
            Self::Triangle => imageops::FilterType::Triangle,
            Self::CatmullRom => imageops::FilterType::CatmullRom,
            Self::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// A resized replacement ready to be stamped onto the output canvas.
#[derive(Clone, Debug)]
pub struct CompositePlacement {
    pub buffer: Arc<RgbaImage>,
    pub left: u32,
    pub top: u32,
}

/// Image codec operations the mosaic pipeline depends on.
///
/// Implementations must be shareable across frame workers. Every failure carries the path that
/// was being read or written.
pub trait PixelAccess: Send + Sync {
    fn decode(&self, path: &Path) -> MosaicResult<RgbaImage>;

    fn decode_metadata(&self, path: &Path) -> MosaicResult<Dimensions>;

    fn resize(&self, img: &RgbaImage, width: u32, height: u32) -> MosaicResult<RgbaImage>;

    fn write(&self, img: &RgbaImage, path: &Path) -> MosaicResult<()>;
}

/// [`PixelAccess`] backed by the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImagePixels {
    pub filter: ResizeFilter,
}

impl ImagePixels {
    pub fn new(filter: ResizeFilter) -> Self {
        Self { filter }
    }
}

impl PixelAccess for ImagePixels {
    fn decode(&self, path: &Path) -> MosaicResult<RgbaImage> {
        let reader = image::ImageReader::open(path)
            .map_err(|e| MosaicError::decode(path, e))?
            .with_guessed_format()
            .map_err(|e| MosaicError::decode(path, e))?;
        let img = reader.decode().map_err(|e| MosaicError::decode(path, e))?;
        Ok(img.to_rgba8())
    }

    fn decode_metadata(&self, path: &Path) -> MosaicResult<Dimensions> {
        let (width, height) =
            image::image_dimensions(path).map_err(|e| MosaicError::decode(path, e))?;
        Ok(Dimensions::new(width, height))
    }

    fn resize(&self, img: &RgbaImage, width: u32, height: u32) -> MosaicResult<RgbaImage> {
        if width == 0 || height == 0 {
            return Err(MosaicError::validation(format!(
                "resize target must be non-empty, got {width}x{height}"
            )));
        }
        if img.width() == 0 || img.height() == 0 {
            return Err(MosaicError::validation("cannot resize an empty image"));
        }
        if img.dimensions() == (width, height) {
            return Ok(img.clone());
        }
        Ok(imageops::resize(img, width, height, self.filter.filter_type()))
    }

    fn write(&self, img: &RgbaImage, path: &Path) -> MosaicResult<()> {
        img.save(path).map_err(|e| MosaicError::encode(path, e))
    }
}

/// Whole-image grayscale intensities, row-major.
pub fn grayscale(img: &RgbaImage) -> Vec<u8> {
    imageops::grayscale(img).into_raw()
}

/// Grayscale intensities of one tile of `img`, row-major.
pub fn grayscale_region(img: &RgbaImage, tile: Tile) -> MosaicResult<Vec<u8>> {
    let fits_x = tile.x.checked_add(tile.width).is_some_and(|r| r <= img.width());
    let fits_y = tile.y.checked_add(tile.height).is_some_and(|b| b <= img.height());
    if !fits_x || !fits_y {
        return Err(MosaicError::validation(format!(
            "region ({}, {}, {}x{}) exceeds image bounds {}x{}",
            tile.x,
            tile.y,
            tile.width,
            tile.height,
            img.width(),
            img.height()
        )));
    }
    let region = imageops::crop_imm(img, tile.x, tile.y, tile.width, tile.height).to_image();
    Ok(imageops::grayscale(&region).into_raw())
}

/// Stamp every placement onto a `dims`-sized canvas filled with `background`.
///
/// Placements are clipped at the canvas edge. Later placements win where they overlap.
pub fn composite(
    dims: Dimensions,
    background: [u8; 4],
    placements: &[CompositePlacement],
) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(dims.width, dims.height, image::Rgba(background));
    for p in placements {
        imageops::replace(
            &mut canvas,
            p.buffer.as_ref(),
            i64::from(p.left),
            i64::from(p.top),
        );
    }
    canvas
}
