//! Grayscale page canvases, monochrome conversion and packed 1-bit bitmaps.

use std::convert::Infallible;

use embedded_graphics::Pixel;
use embedded_graphics::pixelcolor::{Gray8, GrayColor};
use embedded_graphics::prelude::{DrawTarget, OriginDimensions, Size};
use image::imageops::{self, BiLevel};
use image::{GrayImage, Luma};

pub const WHITE: u8 = 255;
pub const BLACK: u8 = 0;

/// An 8-bit grayscale page that embedded-graphics primitives and fonts can
/// draw onto. Pixels outside the page are clipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayCanvas {
    image: GrayImage,
}

impl GrayCanvas {
    /// A white canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([WHITE])),
        }
    }

    pub fn from_image(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut GrayImage {
        &mut self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }

    /// Set a pixel, ignoring coordinates outside the canvas.
    pub fn set(&mut self, x: i32, y: i32, luma: u8) {
        if let Some((x, y)) = self.clip(x, y) {
            self.image.put_pixel(x, y, Luma([luma]));
        }
    }

    /// Blend `luma` over the pixel with `coverage` in 0..=255.
    pub fn blend(&mut self, x: i32, y: i32, luma: u8, coverage: u8) {
        let Some((x, y)) = self.clip(x, y) else {
            return;
        };
        let under = u32::from(self.image.get_pixel(x, y).0[0]);
        let cover = u32::from(coverage);
        let mixed = (u32::from(luma) * cover + under * (255 - cover) + 127) / 255;
        self.image.put_pixel(x, y, Luma([mixed as u8]));
    }

    /// Copy `source` with its top-left corner at (`x`, `y`).
    pub fn paste(&mut self, source: &GrayImage, x: i64, y: i64) {
        imageops::replace(&mut self.image, source, x, y);
    }

    fn clip(&self, x: i32, y: i32) -> Option<(u32, u32)> {
        let x = u32::try_from(x).ok()?;
        let y = u32::try_from(y).ok()?;
        (x < self.image.width() && y < self.image.height()).then_some((x, y))
    }
}

impl DrawTarget for GrayCanvas {
    type Color = Gray8;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set(point.x, point.y, color.luma());
        }
        Ok(())
    }
}

impl OriginDimensions for GrayCanvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

/// How a grayscale page is reduced to pure black and white.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdMode {
    /// Brighten, raise contrast, then Floyd-Steinberg error diffusion.
    /// Keeps photographs and illustrations recognisable.
    Diffuse { brightness: f32, contrast: f32 },
    /// Raise contrast, then a hard threshold (`value > cutoff` is white).
    /// Gives crisp glyph edges on text pages.
    HardCutoff { contrast: f32, cutoff: u8 },
}

impl ThresholdMode {
    pub const ILLUSTRATED: Self = Self::Diffuse {
        brightness: 1.15,
        contrast: 1.4,
    };

    pub const TEXT: Self = Self::HardCutoff {
        contrast: 2.0,
        cutoff: 140,
    };

    /// Mode for pages of a chapter with or without embedded images.
    pub fn for_chapter(has_embedded_image: bool) -> Self {
        if has_embedded_image {
            Self::ILLUSTRATED
        } else {
            Self::TEXT
        }
    }
}

/// Grayscale to black-and-white conversion.
pub trait Monochrome {
    /// Returns an image of the same size holding only 0 and 255.
    fn convert(&self, image: &GrayImage, mode: ThresholdMode) -> GrayImage;
}

/// Point operations and dithering from the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMonochrome;

impl Monochrome for StandardMonochrome {
    fn convert(&self, image: &GrayImage, mode: ThresholdMode) -> GrayImage {
        let mut out = image.clone();
        match mode {
            ThresholdMode::Diffuse {
                brightness,
                contrast,
            } => {
                adjust_brightness(&mut out, brightness);
                adjust_contrast(&mut out, contrast);
                imageops::dither(&mut out, &BiLevel);
            }
            ThresholdMode::HardCutoff { contrast, cutoff } => {
                adjust_contrast(&mut out, contrast);
                threshold(&mut out, cutoff);
            }
        }
        out
    }
}

fn clamp_round(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Scale every value towards or away from black.
pub fn adjust_brightness(image: &mut GrayImage, factor: f32) {
    for Luma([v]) in image.pixels_mut() {
        *v = clamp_round(f32::from(*v) * factor);
    }
}

/// Blend every value with the image's mean gray by `factor`.
pub fn adjust_contrast(image: &mut GrayImage, factor: f32) {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return;
    }
    let sum: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
    let mean = (sum as f64 / count as f64).round() as f32;

    for Luma([v]) in image.pixels_mut() {
        *v = clamp_round(mean + (f32::from(*v) - mean) * factor);
    }
}

/// `value > cutoff` becomes white, everything else black.
pub fn threshold(image: &mut GrayImage, cutoff: u8) {
    for Luma([v]) in image.pixels_mut() {
        *v = if *v > cutoff { WHITE } else { BLACK };
    }
}

/// Threshold used when packing a finished page: `value > 128` is white.
pub const PACK_CUTOFF: u8 = 128;

/// A 1-bit page: row-major, most significant bit first, rows padded to whole
/// bytes. A set bit is white.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PageBitmap {
    /// Bytes per packed row.
    pub fn row_bytes(width: u32) -> usize {
        width.div_ceil(8) as usize
    }

    /// Packed size of a `width` x `height` page.
    pub fn packed_len(width: u32, height: u32) -> usize {
        Self::row_bytes(width) * height as usize
    }

    /// Pack a grayscale page, thresholding at [`PACK_CUTOFF`].
    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let row_bytes = Self::row_bytes(width);
        let mut data = vec![0u8; row_bytes * height as usize];

        for (x, y, Luma([v])) in image.enumerate_pixels() {
            if *v > PACK_CUTOFF {
                data[y as usize * row_bytes + x as usize / 8] |= 0x80 >> (x % 8);
            }
        }

        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap already packed bytes. The length is not checked here; the
    /// container encoder rejects bitmaps whose data disagrees with their size.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Whether the data length matches the dimensions.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == Self::packed_len(self.width, self.height)
    }

    /// Whether pixel (`x`, `y`) is white; out-of-range pixels read as white.
    pub fn is_white(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return true;
        }
        let index = y as usize * Self::row_bytes(self.width) + x as usize / 8;
        self.data
            .get(index)
            .is_none_or(|byte| byte & (0x80 >> (x % 8)) != 0)
    }

    /// Expand back to 8-bit grayscale (0 or 255).
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.is_white(x, y) { WHITE } else { BLACK }])
        })
    }
}
