use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reserved key prefix for images captured by the user (as opposed to bundled assets).
pub const CAPTURED_PREFIX: &str = "uuid-";

/// Face bounding box in normalized image coordinates.
///
/// All fields lie in [0, 1]. The origin is the bottom-left corner of the
/// upright image and `y` grows upward, so `y` is the distance from the bottom
/// edge to the bottom of the box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }
}

impl fmt::Display for NormalizedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x={:.3} y={:.3} w={:.3} h={:.3}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Crop rectangle in raster coordinates (top-left origin, y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Which backing store an [`ImageRef`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// A face crop saved by enrollment.
    Captured,
    /// A default asset shipped with the application.
    Bundled,
}

/// Storage key of a face image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh, collision-resistant key for a captured JPEG crop.
    pub fn generate_captured() -> Self {
        Self(format!("{CAPTURED_PREFIX}{}.jpg", Uuid::new_v4()))
    }

    pub fn kind(&self) -> ImageKind {
        if self.0.starts_with(CAPTURED_PREFIX) {
            ImageKind::Captured
        } else {
            ImageKind::Bundled
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A person in the face/name database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub image: Option<ImageRef>,
}

impl Person {
    /// Whether this person can appear in a quiz.
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// A detected face together with its cropped raster.
///
/// Two detections are the same face when their bounding boxes are identical;
/// the crop is derived data and does not take part in equality.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounding_box: NormalizedBox,
    pub image: DynamicImage,
}

impl PartialEq for DetectedFace {
    fn eq(&self, other: &Self) -> bool {
        self.bounding_box == other.bounding_box
    }
}
