/// Image preprocessing for digit recognition
///
/// Turns an RGBA crop into a binary ink bitmap:
/// 1. Convert to grayscale (integer BT.601 weights)
/// 2. Binarize at a fraction of full intensity
/// 3. Optionally invert (light digits on dark HUDs stay "ink" either way)
/// 4. Upscale by an integer factor with nearest-neighbor replication
use image::RgbaImage;
use rayon::prelude::*;
use tracing::warn;

/// Largest upscaled bitmap `binarize` will allocate
pub const MAX_BITMAP_PIXELS: u64 = 1 << 26;

/// Row-major binary image, one byte per pixel (1 = ink)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    bits: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, bit: bool) {
        let idx = y as usize * self.width as usize + x as usize;
        self.bits[idx] = bit as u8;
    }

    pub fn ink_count(&self) -> usize {
        self.bits.iter().filter(|&&b| b == 1).count()
    }

    /// Copy of the columns `x0..x1`
    pub fn columns(&self, x0: u32, x1: u32) -> Bitmap {
        let x1 = x1.min(self.width);
        let x0 = x0.min(x1);
        let mut out = Bitmap::new(x1 - x0, self.height);
        for y in 0..self.height {
            for x in x0..x1 {
                out.set(x - x0, y, self.get(x, y) == 1);
            }
        }
        out
    }

    /// Nearest-neighbor resample to `dst_w` x `dst_h`
    pub fn resize_nearest(&self, dst_w: u32, dst_h: u32) -> Bitmap {
        let mut out = Bitmap::new(dst_w, dst_h);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        for y in 0..dst_h {
            let sy = (y as u64 * self.height as u64 / dst_h as u64) as u32;
            for x in 0..dst_w {
                let sx = (x as u64 * self.width as u64 / dst_w as u64) as u32;
                out.set(x, y, self.get(sx, sy) == 1);
            }
        }
        out
    }

    /// Encode as a bitstring of '0'/'1', row-major
    pub fn to_bitstring(&self) -> String {
        self.bits.iter().map(|&b| if b == 1 { '1' } else { '0' }).collect()
    }
}

/// Binarization settings for one health-number detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binarizer {
    threshold: f32,
    invert: bool,
    scale: u32,
}

impl Binarizer {
    /// # Arguments
    /// * `threshold` - Ink threshold as a fraction of full intensity (0-1)
    /// * `invert` - Treat dark pixels as ink instead of light ones
    /// * `scale` - Integer upscale factor (1 = none)
    pub fn new(threshold: f32, invert: bool, scale: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            invert,
            scale: scale.max(1),
        }
    }

    /// Grayscale value using fixed-point BT.601 weights
    #[inline]
    pub fn gray(r: u8, g: u8, b: u8) -> u8 {
        ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
    }

    /// Convert an RGBA crop into an upscaled ink bitmap
    ///
    /// Returns an empty bitmap when the upscaled size overflows or exceeds
    /// `MAX_BITMAP_PIXELS`. Optimized with row-parallel processing: every output row only reads
    /// its source row.
    pub fn binarize(&self, image: &RgbaImage) -> Bitmap {
        let (width, height) = image.dimensions();
        let threshold = (self.threshold * 255.0).round() as u8;
        let scale = self.scale;
        let upscaled = width
            .checked_mul(scale)
            .zip(height.checked_mul(scale))
            .filter(|&(w, h)| w as u64 * h as u64 <= MAX_BITMAP_PIXELS);
        let Some((out_w, out_h)) = upscaled else {
            warn!(
                "Upscaled bitmap {}x{} x{} exceeds {} pixels, skipping read",
                width, height, scale, MAX_BITMAP_PIXELS
            );
            return Bitmap::new(0, 0);
        };
        let mut out = Bitmap::new(out_w, out_h);
        if out_w == 0 {
            return out;
        }

        let invert = self.invert;
        out.bits
            .par_chunks_mut(out_w as usize)
            .enumerate()
            .for_each(|(oy, row)| {
                let y = oy as u32 / scale;
                for x in 0..width {
                    let p = image.get_pixel(x, y);
                    let ink = (Self::gray(p[0], p[1], p[2]) >= threshold) != invert;
                    let start = (x * scale) as usize;
                    row[start..start + scale as usize].fill(ink as u8);
                }
            });

        out
    }
}
