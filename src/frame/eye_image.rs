//! RGBA8 images for eye buffers and warped output

use std::path::Path;

use crate::core::types::{Result, Vec2};

/// Row-major RGBA8 image, top row first
#[derive(Clone, Debug, PartialEq)]
pub struct EyeImage {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 4]>,
}

impl EyeImage {
    /// Black, fully opaque image
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0, 255])
    }

    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// Build from a per-pixel function `f(x, y)`
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { width, height, pixels }
    }

    /// Copy out of a buffer whose rows are `bytes_per_row` apart, as GPU
    /// readbacks are. Returns None if `data` is too short.
    pub fn from_padded_rows(width: u32, height: u32, bytes_per_row: u32, data: &[u8]) -> Option<Self> {
        let row_bytes = width as usize * 4;
        let stride = bytes_per_row as usize;
        if stride < row_bytes || data.len() < stride * height.saturating_sub(1) as usize + row_bytes {
            return None;
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height as usize {
            let row = &data[y * stride..y * stride + row_bytes];
            pixels.extend_from_slice(bytemuck::cast_slice::<u8, [u8; 4]>(row));
        }
        Some(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        &mut self.pixels
    }

    /// Rows as mutable slices, for parallel fills
    pub fn rows_mut(&mut self) -> std::slice::ChunksExactMut<'_, [u8; 4]> {
        self.pixels.chunks_exact_mut(self.width.max(1) as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, color: [u8; 4]) {
        self.pixels[(y * self.width + x) as usize] = color;
    }

    /// Bilinearly filtered channel value in [0, 255] at texture coordinate `uv`.
    /// Coordinates outside [0, 1] read as black.
    #[inline]
    pub fn sample_channel(&self, uv: Vec2, channel: usize) -> f32 {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
            return 0.0;
        }
        let fx = (uv.x * self.width as f32 - 0.5).max(0.0);
        let fy = (uv.y * self.height as f32 - 0.5).max(0.0);
        let max_x = self.width - 1;
        let max_y = self.height - 1;
        let x0 = (fx as u32).min(max_x);
        let y0 = (fy as u32).min(max_y);
        let x1 = (x0 + 1).min(max_x);
        let y1 = (y0 + 1).min(max_y);
        let tx = (fx - x0 as f32).clamp(0.0, 1.0);
        let ty = (fy - y0 as f32).clamp(0.0, 1.0);

        let texel = |x: u32, y: u32| self.pixels[(y * self.width + x) as usize][channel] as f32;
        let top = texel(x0, y0) * (1.0 - tx) + texel(x1, y0) * tx;
        let bottom = texel(x0, y1) * (1.0 - tx) + texel(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// All four channels at `uv`
    pub fn sample_bilinear(&self, uv: Vec2) -> [f32; 4] {
        [0, 1, 2, 3].map(|c| self.sample_channel(uv, c))
    }

    /// Copy `src` into this image with its top-left corner at (`x`, `y`), clipped
    pub fn blit(&mut self, src: &EyeImage, x: u32, y: u32) {
        for sy in 0..src.height.min(self.height.saturating_sub(y)) {
            let cols = src.width.min(self.width.saturating_sub(x)) as usize;
            let dst_start = ((y + sy) * self.width + x) as usize;
            let src_start = (sy * src.width) as usize;
            self.pixels[dst_start..dst_start + cols]
                .copy_from_slice(&src.pixels[src_start..src_start + cols]);
        }
    }

    /// Sub-rectangle copy
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> EyeImage {
        let width = width.min(self.width.saturating_sub(x));
        let height = height.min(self.height.saturating_sub(y));
        EyeImage::from_fn(width, height, |cx, cy| self.get(x + cx, y + cy))
    }

    /// Raw bytes, 4 per pixel
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// PNG-encoded copy of the image
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        use image::ImageEncoder;

        let mut png_data = Vec::new();
        image::codecs::png::PngEncoder::new(&mut png_data).write_image(
            self.as_bytes(),
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(png_data)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        image::save_buffer(
            path,
            self.as_bytes(),
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(())
    }
}
