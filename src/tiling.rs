use crate::foundation::core::Tile;
use crate::foundation::error::{MosaicError, MosaicResult};

/// Number of tiles a `width` x `height` frame splits into with edge length `tile_size`.
pub fn tile_count(width: u32, height: u32, tile_size: u32) -> u64 {
    if tile_size == 0 {
        return 0;
    }
    u64::from(width.div_ceil(tile_size)) * u64::from(height.div_ceil(tile_size))
}

/// Split a frame into a row-major raster of tiles.
///
/// Tiles are `tile_size` square except along the right and bottom edges, where they are clipped
/// to the frame. A frame with a zero dimension has no tiles.
pub fn decompose(width: u32, height: u32, tile_size: u32) -> MosaicResult<Vec<Tile>> {
    if tile_size == 0 {
        return Err(MosaicError::validation("tile size must be > 0"));
    }

    let mut tiles = Vec::with_capacity(tile_count(width, height, tile_size) as usize);
    let mut y = 0u32;
    while y < height {
        let th = tile_size.min(height - y);
        let mut x = 0u32;
        while x < width {
            let tw = tile_size.min(width - x);
            tiles.push(Tile {
                x,
                y,
                width: tw,
                height: th,
            });
            x = match x.checked_add(tile_size) {
                Some(next) => next,
                None => break,
            };
        }
        y = match y.checked_add(tile_size) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn t(x: u32, y: u32, width: u32, height: u32) -> Tile {
        Tile {
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn clips_edge_tiles_on_both_axes() {
        let tiles = decompose(18, 18, 16).unwrap();
        assert_eq!(
            tiles,
            vec![t(0, 0, 16, 16), t(16, 0, 2, 16), t(0, 16, 16, 2), t(16, 16, 2, 2)]
        );
    }

    #[test]
    fn exact_multiple_has_no_clipped_tiles() {
        let tiles = decompose(64, 32, 16).unwrap();
        assert_eq!(tiles.len(), 8);
        assert!(tiles.iter().all(|t| t.width == 16 && t.height == 16));
    }

    #[test]
    fn tile_larger_than_frame_yields_one_tile() {
        assert_eq!(decompose(5, 3, 100).unwrap(), vec![t(0, 0, 5, 3)]);
    }

    #[test]
    fn zero_tile_size_is_rejected_and_empty_frames_have_no_tiles() {
        assert!(decompose(10, 10, 0).is_err());
        assert!(decompose(0, 10, 4).unwrap().is_empty());
        assert!(decompose(10, 0, 4).unwrap().is_empty());
        assert_eq!(tile_count(10, 10, 0), 0);
    }

    proptest! {
        #[test]
        fn tiles_cover_every_pixel_exactly_once(w in 1u32..70, h in 1u32..70, ts in 1u32..40) {
            let tiles = decompose(w, h, ts).unwrap();
            prop_assert_eq!(tiles.len() as u64, tile_count(w, h, ts));
            prop_assert_eq!(
                tiles.len() as u64,
                u64::from(w.div_ceil(ts)) * u64::from(h.div_ceil(ts))
            );

            let mut hits = vec![0u8; (w * h) as usize];
            for tile in &tiles {
                prop_assert!(!tile.is_empty());
                prop_assert!(tile.width <= ts && tile.height <= ts);
                for py in tile.y..tile.y + tile.height {
                    for px in tile.x..tile.x + tile.width {
                        hits[(py * w + px) as usize] += 1;
                    }
                }
            }
            prop_assert!(hits.iter().all(|&n| n == 1));
        }

        #[test]
        fn tiles_are_row_major(w in 1u32..100, h in 1u32..100, ts in 1u32..32) {
            let tiles = decompose(w, h, ts).unwrap();
            for pair in tiles.windows(2) {
                prop_assert!((pair[0].y, pair[0].x) < (pair[1].y, pair[1].x));
            }
        }
    }
}
