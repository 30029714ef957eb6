//! Still-frame decoding and face crop extraction.

use crate::types::BoundingBox;
use image::{GrayImage, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("image payload is empty")]
    Empty,
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face region {x},{y} {width}x{height} lies outside the {image_width}x{image_height} frame")]
    RegionOutside {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        image_width: u32,
        image_height: u32,
    },
}

/// Decode a transport-encoded still image (JPEG, PNG, BMP, …) into RGB.
///
/// The format is sniffed from the payload; the client never declares it.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "decoded frame"
    );
    Ok(image.to_rgb8())
}

/// Crop `face` out of `image` and convert it to single-channel intensity.
pub fn face_region(image: &RgbImage, face: &BoundingBox) -> Result<GrayImage, FrameError> {
    let (x, y, w, h) = face
        .clamp_to(image.width(), image.height())
        .ok_or(FrameError::RegionOutside {
            x: face.x,
            y: face.y,
            width: face.width,
            height: face.height,
            image_width: image.width(),
            image_height: image.height(),
        })?;
    let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
    Ok(image::imageops::grayscale(&crop))
}
