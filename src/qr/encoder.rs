//! QR code encoder

use crate::error::Result;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

/// Pixel size of one QR module
pub const DEFAULT_MODULE_SIZE: u32 = 10;

/// Width of the white quiet zone, in modules
pub const DEFAULT_BORDER: u32 = 4;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// QR code encoder
#[derive(Debug, Clone, Copy)]
pub struct QrEncoder {
    /// Error correction level
    ecc_level: EcLevel,
    module_size: u32,
    border: u32,
}

impl QrEncoder {
    /// Create a new QR encoder with the service defaults (High ECC, 10 px modules, 4 module border)
    pub fn new() -> Self {
        Self {
            ecc_level: EcLevel::H,
            module_size: DEFAULT_MODULE_SIZE,
            border: DEFAULT_BORDER,
        }
    }

    /// Encode text into a QR code image.
    ///
    /// The symbol version is picked automatically as the smallest that fits
    /// `data` at the configured error correction level.
    pub fn encode(&self, data: &str) -> Result<GrayImage> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), self.ecc_level)?;
        Ok(self.render(&code))
    }

    /// Encode text and serialize the image as PNG
    pub fn encode_png(&self, data: &str) -> Result<Vec<u8>> {
        let image = self.encode(data)?;

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        tracing::debug!(bytes = png.len(), "Rendered QR PNG");
        Ok(png)
    }

    fn render(&self, code: &QrCode) -> GrayImage {
        let modules = code.width() as u32;
        let scale = self.module_size.max(1);
        let side = (modules + 2 * self.border) * scale;
        let offset = self.border * scale;

        let mut image = GrayImage::from_pixel(side, side, LIGHT);

        for (i, color) in code.to_colors().iter().enumerate() {
            if *color != Color::Dark {
                continue;
            }
            let x = (i as u32) % modules;
            let y = (i as u32) / modules;
            for dy in 0..scale {
                for dx in 0..scale {
                    image.put_pixel(offset + x * scale + dx, offset + y * scale + dy, DARK);
                }
            }
        }

        image
    }
}

impl Default for QrEncoder {
    fn default() -> Self {
        Self::new()
    }
}
