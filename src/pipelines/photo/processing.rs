// SPDX-License-Identifier: GPL-3.0-only

//! Slow-path image processing
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! encoding workers:
//! - EXIF orientation lookup
//! - Power-of-two downsampling
//! - Rotation to upright and optional horizontal mirroring

use crate::backends::camera::types::Orientation;
use image::DynamicImage;
use image::imageops::FilterType;
use tracing::{debug, trace};

/// Read the EXIF orientation tag from encoded image bytes
///
/// Returns `None` when the container has no EXIF block, the block is
/// malformed, or the tag is missing.
pub fn exif_orientation(data: &[u8]) -> Option<Orientation> {
    let exif = match exif::Reader::new().read_from_container(&mut std::io::Cursor::new(data)) {
        Ok(exif) => exif,
        Err(e) => {
            trace!(error = %e, "No readable EXIF block");
            return None;
        }
    };

    let value = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)?;
    debug!(value, "EXIF orientation tag found");
    Some(Orientation::from_exif(u16::try_from(value).ok()?))
}

/// Divide both dimensions by `factor`
pub fn downsample(image: DynamicImage, factor: u32) -> DynamicImage {
    if factor <= 1 {
        return image;
    }
    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    debug!(
        from_width = image.width(),
        from_height = image.height(),
        width,
        height,
        factor,
        "Downsampling capture"
    );
    image.resize_exact(width, height, FilterType::Triangle)
}

/// Rotate to upright
pub fn apply_orientation(image: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => image,
        Orientation::Rotate90 => image.rotate90(),
        Orientation::Rotate180 => image.rotate180(),
        Orientation::Rotate270 => image.rotate270(),
    }
}

/// Mirror horizontally (front-lens selfie output)
pub fn mirror(image: DynamicImage) -> DynamicImage {
    image.fliph()
}
