//! Face detection — the detector trait consumed by enrollment, and an SCRFD
//! implementation running via ONNX Runtime.
//!
//! Detectors report boxes in normalized, bottom-left-origin coordinates of the
//! upright image (after the orientation hint has been applied).

use crate::types::NormalizedBox;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// EXIF-style orientation of the stored pixels relative to the upright scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Up,
    Down,
    Left,
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

impl Orientation {
    /// Rotate/flip `image` so that it is displayed upright.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Up => image,
            Orientation::Down => image.rotate180(),
            Orientation::Left => image.rotate270(),
            Orientation::Right => image.rotate90(),
            Orientation::UpMirrored => image.fliph(),
            Orientation::DownMirrored => image.flipv(),
            Orientation::LeftMirrored => image.rotate90().fliph(),
            Orientation::RightMirrored => image.rotate270().fliph(),
        }
    }
}

impl std::str::FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Orientation::Up),
            "down" => Ok(Orientation::Down),
            "left" => Ok(Orientation::Left),
            "right" => Ok(Orientation::Right),
            "up-mirrored" => Ok(Orientation::UpMirrored),
            "down-mirrored" => Ok(Orientation::DownMirrored),
            "left-mirrored" => Ok(Orientation::LeftMirrored),
            "right-mirrored" => Ok(Orientation::RightMirrored),
            other => Err(format!("unknown orientation: {other}")),
        }
    }
}

/// Locates face regions in an image.
///
/// An empty result means "no faces"; internal failures are reported as
/// errors so callers can tell the two apart.
pub trait FaceDetector {
    fn detect(
        &mut self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Vec<NormalizedBox>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// Face candidate in upright pixel space (top-left origin), before normalization.
#[derive(Debug, Clone)]
struct PixelDetection {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Letterbox an upright RGB image into a NCHW float tensor.
    fn preprocess(image: &DynamicImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = (image.width().max(1), image.height().max(1));
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);

        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
        let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

        let resized = image
            .resize_exact(new_w, new_h, FilterType::Triangle)
            .to_rgb8();

        let input = SCRFD_INPUT_SIZE as usize;
        // Padding uses the mean so it normalizes to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
        let (off_x, off_y) = (pad_x.floor() as usize, pad_y.floor() as usize);

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (off_x + x as usize, off_y + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(
        &mut self,
        image: &DynamicImage,
        orientation: Orientation,
    ) -> Result<Vec<NormalizedBox>, DetectorError> {
        let upright = orientation.apply(image.clone());
        let (input, letterbox) = Self::preprocess(&upright);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), "SCRFD detection complete");

        Ok(kept
            .iter()
            .filter_map(|d| normalize(d, upright.width(), upright.height()))
            .collect())
    }
}

/// Discover output tensor ordering by name.
///
/// Named exports ("score_8", "bbox_16", ...) are mapped by name; anything
/// else falls back to the standard positional ordering
/// [0-2] = scores, [3-5] = bboxes.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0); 3];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(score), Some(bbox)) => named[slot] = (score, bbox),
            _ => {
                tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
                return [(0, 3), (1, 4), (2, 5)];
            }
        }
    }
    named
}

/// Decode detections for a single stride level into upright pixel space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<PixelDetection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let x1 = (anchor_x - offsets[0] * step - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_y - offsets[1] * step - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_x + offsets[2] * step - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_y + offsets[3] * step - letterbox.pad_y) / letterbox.scale;

        detections.push(PixelDetection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Convert a top-left-origin pixel detection into a bottom-left-origin
/// normalized box clamped to the image. Returns `None` for empty boxes.
fn normalize(det: &PixelDetection, width: u32, height: u32) -> Option<NormalizedBox> {
    let (w, h) = (width as f32, height as f32);
    let left = (det.x / w).clamp(0.0, 1.0);
    let right = ((det.x + det.width) / w).clamp(0.0, 1.0);
    let top = (det.y / h).clamp(0.0, 1.0);
    let bottom = ((det.y + det.height) / h).clamp(0.0, 1.0);

    if right <= left || bottom <= top {
        return None;
    }
    Some(NormalizedBox::new(left, 1.0 - bottom, right - left, bottom - top))
}

/// Non-Maximum Suppression: keep the most confident of overlapping detections.
fn nms(mut detections: Vec<PixelDetection>, iou_threshold: f32) -> Vec<PixelDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<PixelDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two pixel detections.
fn iou(a: &PixelDetection, b: &PixelDetection) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
