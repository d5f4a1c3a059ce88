//! Icon tiling: RGB888 bitmaps → RGB565 in 8×8 Morton-ordered tiles.
//!
//! The 3DS GPU samples textures tile by tile.  Tiles are 8×8 pixels and are
//! stored left-to-right, top-to-bottom; inside a tile the 64 pixels follow a
//! Z-order curve where the slot index interleaves the bits of the local
//! coordinates:
//!
//! ```text
//! slot = x0 | y0<<1 | x1<<2 | y1<<3 | x2<<4 | y2<<5
//! ```
//!
//! Any other order still produces a structurally valid SMDH, but the icon
//! shows up scrambled on the home menu.
//!
//! # Edges
//! Images whose sides are not multiples of 8 are covered by whole tiles;
//! positions outside the image are emitted as `0x0000` one pixel at a time.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

/// Side length of one hardware tile.
pub const TILE_SIZE: u32 = 8;
const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

pub const SMALL_ICON_SIZE: u32 = 24;
pub const LARGE_ICON_SIZE: u32 = 48;
/// 24×24 pixels × 2 bytes.
pub const SMALL_ICON_BYTES: usize = 0x480;
/// 48×48 pixels × 2 bytes.
pub const LARGE_ICON_BYTES: usize = 0x1200;

// ── Colour packing ───────────────────────────────────────────────────────────

/// Reduce an 8-bit-per-channel colour to RGB565 (red in the top 5 bits).
pub const fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

// ── Morton permutation ───────────────────────────────────────────────────────

const fn morton_slot(x: usize, y: usize) -> usize {
    (x & 1) | ((y & 1) << 1) | ((x & 2) << 1) | ((y & 2) << 2) | ((x & 4) << 2) | ((y & 4) << 3)
}

const fn build_morton_table() -> [u8; TILE_PIXELS] {
    let mut table = [0u8; TILE_PIXELS];
    let mut i = 0;
    while i < TILE_PIXELS {
        table[i] = morton_slot(i % 8, i / 8) as u8;
        i += 1;
    }
    table
}

/// `MORTON_TABLE[y * 8 + x]` is the slot of local pixel `(x, y)` in its tile.
pub const MORTON_TABLE: [u8; TILE_PIXELS] = build_morton_table();

// ── Pixel sources ────────────────────────────────────────────────────────────

/// Anything that can answer point queries for RGB samples.
pub trait PixelSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Colour at `(x, y)`; only called for in-bounds coordinates.
    fn rgb(&self, x: u32, y: u32) -> [u8; 3];
}

impl PixelSource for RgbImage {
    fn width(&self) -> u32 { RgbImage::width(self) }
    fn height(&self) -> u32 { RgbImage::height(self) }
    fn rgb(&self, x: u32, y: u32) -> [u8; 3] { self.get_pixel(x, y).0 }
}

/// Resample `img` to a `size`×`size` RGB bitmap ready for tiling.
pub fn resize_square(img: &DynamicImage, size: u32) -> RgbImage {
    imageops::resize(&img.to_rgb8(), size, size, FilterType::Lanczos3)
}

fn padded(dim: u32) -> u32 {
    dim.div_ceil(TILE_SIZE) * TILE_SIZE
}

// ── TiledIcon ────────────────────────────────────────────────────────────────

/// RGB565 little-endian pixels in tile/Morton order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledIcon {
    width:  u32,
    height: u32,
    data:   Vec<u8>,
}

impl TiledIcon {
    /// Tile every pixel of `src`.  Total: never fails for any size.
    pub fn tile<S: PixelSource + ?Sized>(src: &S) -> Self {
        let (width, height) = (src.width(), src.height());
        let tiles_x = padded(width) / TILE_SIZE;
        let tiles_y = padded(height) / TILE_SIZE;
        let mut data = vec![0u8; (tiles_x * tiles_y) as usize * TILE_PIXELS * 2];

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let base = (ty * tiles_x + tx) as usize * TILE_PIXELS;
                for (local, &slot) in MORTON_TABLE.iter().enumerate() {
                    let x = tx * TILE_SIZE + (local % 8) as u32;
                    let y = ty * TILE_SIZE + (local / 8) as u32;
                    if x >= width || y >= height {
                        continue; // already zero
                    }
                    let [r, g, b] = src.rgb(x, y);
                    let at = (base + slot as usize) * 2;
                    data[at..at + 2].copy_from_slice(&rgb565(r, g, b).to_le_bytes());
                }
            }
        }
        Self { width, height, data }
    }

    /// An all-black icon, used when no source image is supplied.
    pub fn blank(size: u32) -> Self {
        let side = padded(size) as usize;
        Self { width: size, height: size, data: vec![0u8; side * side * 2] }
    }

    /// Wrap already-tiled bytes read back from an SMDH block.
    pub(crate) fn from_tiled_bytes(size: u32, data: Vec<u8>) -> Self {
        Self { width: size, height: size, data }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn as_bytes(&self) -> &[u8] { &self.data }
    pub fn into_bytes(self) -> Vec<u8> { self.data }

    /// Undo the tile permutation: RGB565 values in row-major order, exactly
    /// `width * height` of them.  Colour reduction is not reversed.
    pub fn to_raster(&self) -> Vec<u16> {
        let tiles_x = padded(self.width) / TILE_SIZE;
        let mut out = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let tile = ((y / TILE_SIZE) * tiles_x + x / TILE_SIZE) as usize;
                let local = ((y % TILE_SIZE) * TILE_SIZE + x % TILE_SIZE) as usize;
                let at = (tile * TILE_PIXELS + MORTON_TABLE[local] as usize) * 2;
                let value = self.data
                    .get(at..at + 2)
                    .map(|p| u16::from_le_bytes([p[0], p[1]]))
                    .unwrap_or(0);
                out.push(value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn colour_packing_reference_values() {
        assert_eq!(rgb565(255, 255, 255), 0xFFFF);
        assert_eq!(rgb565(0, 0, 0), 0x0000);
        assert_eq!(rgb565(255, 0, 0), 0xF800);
        assert_eq!(rgb565(0, 255, 0), 0x07E0);
        assert_eq!(rgb565(0, 0, 255), 0x001F);
    }

    #[test]
    fn morton_table_is_a_permutation() {
        let slots: HashSet<u8> = MORTON_TABLE.iter().copied().collect();
        assert_eq!(slots.len(), 64);
        assert!(slots.iter().all(|&s| s < 64));
        assert_eq!(MORTON_TABLE[0], 0);
        assert_eq!(MORTON_TABLE[1], 1); // (1, 0)
        assert_eq!(MORTON_TABLE[8], 2); // (0, 1)
        assert_eq!(MORTON_TABLE[9], 3); // (1, 1)
        assert_eq!(MORTON_TABLE[2], 4); // (2, 0)
        assert_eq!(MORTON_TABLE[63], 63);
    }

    #[test]
    fn tile_8x8_is_bijective() {
        // Encode each pixel's position in its colour so slots can be traced back.
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([0, (y * 8 + x) as u8 * 4, 0]));
        let icon = TiledIcon::tile(&img);
        assert_eq!(icon.as_bytes().len(), 128);

        let mut seen = HashSet::new();
        for slot in 0..64 {
            let v = u16::from_le_bytes([icon.as_bytes()[slot * 2], icon.as_bytes()[slot * 2 + 1]]);
            seen.insert(v);
        }
        assert_eq!(seen.len(), 64, "every source pixel lands in exactly one slot");
    }

    #[test]
    fn solid_red_large_icon() {
        let img = RgbImage::from_pixel(48, 48, Rgb([255, 0, 0]));
        let icon = TiledIcon::tile(&img);
        assert_eq!(icon.as_bytes().len(), LARGE_ICON_BYTES);
        assert!(icon.as_bytes()
            .chunks_exact(2)
            .all(|p| u16::from_le_bytes([p[0], p[1]]) == 0xF800));
    }

    #[test]
    fn small_icon_size() {
        let img = RgbImage::from_pixel(SMALL_ICON_SIZE, SMALL_ICON_SIZE, Rgb([1, 2, 3]));
        assert_eq!(TiledIcon::tile(&img).as_bytes().len(), SMALL_ICON_BYTES);
        assert_eq!(TiledIcon::blank(SMALL_ICON_SIZE).as_bytes().len(), SMALL_ICON_BYTES);
    }

    #[test]
    fn out_of_bounds_pixels_are_black() {
        let img = RgbImage::from_pixel(10, 3, Rgb([255, 255, 255]));
        let icon = TiledIcon::tile(&img);
        // Two tiles wide, one tile tall.
        assert_eq!(icon.as_bytes().len(), 2 * 64 * 2);

        let white = icon.as_bytes()
            .chunks_exact(2)
            .filter(|p| u16::from_le_bytes([p[0], p[1]]) == 0xFFFF)
            .count();
        assert_eq!(white, 30);
        // Second tile holds only columns 8..10 of rows 0..3.
        let second = &icon.as_bytes()[128..];
        let lit: Vec<usize> = second.chunks_exact(2)
            .enumerate()
            .filter(|(_, p)| p[0] != 0)
            .map(|(i, _)| i)
            .collect();
        let expected: Vec<usize> = {
            let mut v: Vec<usize> = (0..3)
                .flat_map(|y| (0..2).map(move |x| MORTON_TABLE[y * 8 + x] as usize))
                .collect();
            v.sort();
            v
        };
        assert_eq!(lit, expected);
    }

    #[test]
    fn raster_undoes_tiling() {
        let img = RgbImage::from_fn(24, 24, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 0]));
        let raster = TiledIcon::tile(&img).to_raster();
        for y in 0..24 {
            for x in 0..24 {
                let [r, g, b] = img.get_pixel(x, y).0;
                assert_eq!(raster[(y * 24 + x) as usize], rgb565(r, g, b));
            }
        }
    }

    #[test]
    fn resize_produces_requested_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 60, Rgb([0, 0, 255])));
        let small = resize_square(&img, SMALL_ICON_SIZE);
        assert_eq!(small.dimensions(), (24, 24));
    }

    proptest! {
        #[test]
        fn tiling_is_deterministic(w in 1u32..40, h in 1u32..40, seed in any::<u8>()) {
            let img = RgbImage::from_fn(w, h, |x, y| {
                Rgb([seed.wrapping_add(x as u8), seed ^ (y as u8), (x * y) as u8])
            });
            let a = TiledIcon::tile(&img);
            let b = TiledIcon::tile(&img);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.as_bytes().len() as u32, padded(w) * padded(h) * 2);
            prop_assert_eq!(a.to_raster().len() as u32, w * h);
        }
    }
}
