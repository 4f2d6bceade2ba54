//! Face cropping — normalized detector boxes to raster crops.
//!
//! Detector boxes use a bottom-left origin with y growing upward; raster
//! coordinates use a top-left origin with y growing downward. The vertical
//! flip is `y_px = (1 - y - height) * image_height`.

use crate::types::{NormalizedBox, PixelRect};
use image::{DynamicImage, GenericImageView};
use thiserror::Error;

/// Distance from an integer below which a pixel coordinate is treated as exact.
const SNAP_EPSILON: f64 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CropError {
    #[error("crop region {bbox} does not intersect a {width}x{height} image")]
    InvalidGeometry {
        bbox: NormalizedBox,
        width: u32,
        height: u32,
    },
}

/// Map a normalized box onto the pixel grid of a `width` × `height` image.
///
/// The rectangle is made integral outward and clipped to the image bounds.
/// Boxes with non-finite or non-positive extents, or that fall entirely
/// outside the image, are rejected.
pub fn pixel_rect(bbox: &NormalizedBox, width: u32, height: u32) -> Result<PixelRect, CropError> {
    let invalid = || CropError::InvalidGeometry {
        bbox: *bbox,
        width,
        height,
    };

    let (bx, by, bw, bh) = (
        bbox.x as f64,
        bbox.y as f64,
        bbox.width as f64,
        bbox.height as f64,
    );
    if ![bx, by, bw, bh].iter().all(|v| v.is_finite()) || bw <= 0.0 || bh <= 0.0 {
        return Err(invalid());
    }

    let img_w = width as f64;
    let img_h = height as f64;

    let left = snap(bx * img_w).floor();
    let top = snap((1.0 - by - bh) * img_h).floor();
    let right = snap((bx + bw) * img_w).ceil();
    let bottom = snap((1.0 - by) * img_h).ceil();

    // Clip to the image; detector noise can push edges slightly outside.
    let left = left.max(0.0);
    let top = top.max(0.0);
    let right = right.min(img_w);
    let bottom = bottom.min(img_h);

    if right <= left || bottom <= top {
        return Err(invalid());
    }

    Ok(PixelRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Crop the face described by `bbox` out of `image`.
pub fn crop(image: &DynamicImage, bbox: &NormalizedBox) -> Result<DynamicImage, CropError> {
    let (width, height) = image.dimensions();
    let rect = pixel_rect(bbox, width, height)?;
    tracing::trace!(?rect, %bbox, "cropping face");
    Ok(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

fn snap(v: f64) -> f64 {
    let rounded = v.round();
    if (v - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        v
    }
}
