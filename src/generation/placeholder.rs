//! Placeholder image for scenes that could not be generated.
//!
//! A flat light-grey PNG with a darker frame, sized to the configured
//! resolution, so downstream assembly always has a decodable image per scene.

use crate::error::GenerationError;
use crate::types::Resolution;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const FILL: Rgb<u8> = Rgb([200, 200, 200]);
const BORDER: Rgb<u8> = Rgb([150, 150, 150]);
const BORDER_WIDTH: u32 = 4;

/// Render the placeholder as PNG bytes.
pub fn render_placeholder(resolution: Resolution) -> Result<Vec<u8>, GenerationError> {
    if resolution.width == 0 || resolution.height == 0 {
        return Err(GenerationError::Placeholder(format!(
            "cannot render a {} placeholder",
            resolution
        )));
    }

    let (width, height) = (resolution.width, resolution.height);
    let image = RgbImage::from_fn(width, height, |x, y| {
        let on_border = x < BORDER_WIDTH
            || y < BORDER_WIDTH
            || x >= width.saturating_sub(BORDER_WIDTH)
            || y >= height.saturating_sub(BORDER_WIDTH);
        if on_border {
            BORDER
        } else {
            FILL
        }
    });

    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| GenerationError::Placeholder(e.to_string()))?;
    Ok(buffer.into_inner())
}
