//! Face detection and embedding extraction via ONNX Runtime.
//!
//! The pipeline treats detection/embedding as an opaque capability behind
//! [`FaceEngine`]: boxes in, fixed-length embedding vectors out. The shipped
//! implementation runs a face detector and an embedding model as two ONNX
//! sessions on CPU.

use crate::types::{Embedding, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const DETECT_INPUT_WIDTH: usize = 320;
const DETECT_INPUT_HEIGHT: usize = 320;
const DETECT_MEAN: f32 = 127.5;
const DETECT_STD: f32 = 128.0;
const DETECT_VALUES_PER_ROW: usize = 5; // x1, y1, x2, y2, score

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5; // symmetric normalization, unlike the detector

/// Embedding dimension produced by the shipped embedder model.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Opaque face detection/embedding capability.
///
/// `detect` returns face boxes in the coordinates of the frame it was given;
/// `embed` returns one fixed-length vector per box. Implementations must not
/// hold state that changes results across calls for the same input.
pub trait FaceEngine {
    fn detect(&mut self, rgb: &[u8], width: u32, height: u32)
        -> Result<Vec<FaceBox>, EngineError>;

    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, EngineError>;

    /// Length of every embedding this engine produces.
    fn embedding_len(&self) -> usize;
}

/// ONNX-backed face engine: one detector session, one embedder session.
pub struct OnnxFaceEngine {
    detector: Session,
    embedder: Session,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

impl OnnxFaceEngine {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(
        detector_path: &str,
        embedder_path: &str,
        confidence_threshold: f32,
        nms_iou_threshold: f32,
    ) -> Result<Self, EngineError> {
        for path in [detector_path, embedder_path] {
            if !Path::new(path).exists() {
                return Err(EngineError::ModelNotFound(path.to_string()));
            }
        }

        let detector = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::<()>::from)?
            .commit_from_file(detector_path)?;
        tracing::info!(path = detector_path, "face detector model loaded");

        let embedder = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::<()>::from)?
            .commit_from_file(embedder_path)?;
        tracing::info!(path = embedder_path, "face embedder model loaded");

        Ok(Self {
            detector,
            embedder,
            confidence_threshold,
            nms_iou_threshold,
        })
    }

    /// Preprocess an RGB frame into the detector's NCHW input tensor.
    /// Returns the tensor plus per-axis scales for mapping boxes back.
    fn detect_preprocess(rgb: &[u8], width: usize, height: usize) -> (Array4<f32>, f32, f32) {
        let resized = bilinear_resize_rgb(
            rgb,
            width,
            height,
            DETECT_INPUT_WIDTH,
            DETECT_INPUT_HEIGHT,
        );
        let scale_x = width as f32 / DETECT_INPUT_WIDTH as f32;
        let scale_y = height as f32 / DETECT_INPUT_HEIGHT as f32;

        let mut tensor =
            Array4::<f32>::zeros((1, 3, DETECT_INPUT_HEIGHT, DETECT_INPUT_WIDTH));
        for y in 0..DETECT_INPUT_HEIGHT {
            for x in 0..DETECT_INPUT_WIDTH {
                let base = (y * DETECT_INPUT_WIDTH + x) * 3;
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (resized[base + c] as f32 - DETECT_MEAN) / DETECT_STD;
                }
            }
        }
        (tensor, scale_x, scale_y)
    }
}

impl FaceEngine for OnnxFaceEngine {
    /// Detect faces, returning boxes in source-frame coordinates sorted by
    /// confidence (highest first).
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, EngineError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return Err(EngineError::BadInput("empty frame".to_string()));
        }
        if rgb.len() < w * h * 3 {
            return Err(EngineError::BadInput(format!(
                "RGB buffer too short: expected {}, got {}",
                w * h * 3,
                rgb.len()
            )));
        }

        let (input, scale_x, scale_y) = Self::detect_preprocess(rgb, w, h);

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Output 0: [N, 5] rows of (x1, y1, x2, y2, score) in detector-input
        // pixels, NMS not yet applied.
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("detector output: {e}")))?;

        let mut scored = Vec::new();
        for row in raw.chunks_exact(DETECT_VALUES_PER_ROW) {
            let score = row[4];
            if score <= self.confidence_threshold {
                continue;
            }

            let x1 = (row[0] * scale_x).clamp(0.0, (w - 1) as f32);
            let y1 = (row[1] * scale_y).clamp(0.0, (h - 1) as f32);
            let x2 = (row[2] * scale_x).clamp(0.0, (w - 1) as f32);
            let y2 = (row[3] * scale_y).clamp(0.0, (h - 1) as f32);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            scored.push(ScoredBox {
                face_box: FaceBox {
                    top: y1.round() as u32,
                    right: x2.round() as u32,
                    bottom: y2.round() as u32,
                    left: x1.round() as u32,
                },
                score,
            });
        }

        let kept = nms(scored, self.nms_iou_threshold);
        Ok(kept.into_iter().map(|s| s.face_box).collect())
    }

    /// Crop the face region, resize to the embedder input, run inference,
    /// and L2-normalize the result.
    fn embed(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Embedding, EngineError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return Err(EngineError::BadInput("empty frame".to_string()));
        }
        if rgb.len() < w * h * 3 {
            return Err(EngineError::BadInput(format!(
                "RGB buffer too short: expected {}, got {}",
                w * h * 3,
                rgb.len()
            )));
        }

        let left = (face.left as usize).min(w - 1);
        let top = (face.top as usize).min(h.saturating_sub(1));
        let right = (face.right as usize).clamp(left + 1, w);
        let bottom = (face.bottom as usize).clamp(top + 1, h);
        let crop_w = right - left;
        let crop_h = bottom - top;

        let mut crop = vec![0u8; crop_w * crop_h * 3];
        for y in 0..crop_h {
            let src = ((top + y) * w + left) * 3;
            let dst = y * crop_w * 3;
            crop[dst..dst + crop_w * 3].copy_from_slice(&rgb[src..src + crop_w * 3]);
        }

        let resized = bilinear_resize_rgb(&crop, crop_w, crop_h, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE);

        let mut tensor = Array4::<f32>::zeros((1, 3, EMBED_INPUT_SIZE, EMBED_INPUT_SIZE));
        for y in 0..EMBED_INPUT_SIZE {
            for x in 0..EMBED_INPUT_SIZE {
                let base = (y * EMBED_INPUT_SIZE + x) * 3;
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (resized[base + c] as f32 - EMBED_MEAN) / EMBED_STD;
                }
            }
        }

        let outputs = self
            .embedder
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EngineError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values: Vec<f32> = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Embedding::new(values))
    }

    fn embedding_len(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// A detection candidate before NMS.
#[derive(Debug, Clone)]
struct ScoredBox {
    face_box: FaceBox,
    score: f32,
}

/// Non-Maximum Suppression: drop boxes overlapping a higher-scored box.
fn nms(mut candidates: Vec<ScoredBox>, iou_threshold: f32) -> Vec<ScoredBox> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<ScoredBox> = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i].clone());

        for j in (i + 1)..candidates.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&candidates[i].face_box, &candidates[j].face_box) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union of two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let left = a.left.max(b.left) as f32;
    let top = a.top.max(b.top) as f32;
    let right = a.right.min(b.right) as f32;
    let bottom = a.bottom.min(b.bottom) as f32;

    let inter_w = (right - left).max(0.0);
    let inter_h = (bottom - top).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (a.width() * a.height()) as f32;
    let area_b = (b.width() * b.height()) as f32;
    let union_area = area_a + area_b - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Bilinear resize of packed RGB24 data.
fn bilinear_resize_rgb(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    let mut dst = vec![0u8; dst_w * dst_h * 3];
    if src_w == 0 || src_h == 0 {
        return dst;
    }
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for y in 0..dst_h {
        let src_y = (y as f32 + 0.5) * y_ratio - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, src_h as i32 - 1) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..dst_w {
            let src_x = (x as f32 + 0.5) * x_ratio - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, src_w as i32 - 1) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * src_w + x0) * 3 + c] as f32;
                let tr = src[(y0 * src_w + x1) * 3 + c] as f32;
                let bl = src[(y1 * src_w + x0) * 3 + c] as f32;
                let br = src[(y1 * src_w + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                dst[(y * dst_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(top: u32, right: u32, bottom: u32, left: u32, score: f32) -> ScoredBox {
        ScoredBox {
            face_box: FaceBox { top, right, bottom, left },
            score,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = FaceBox { top: 0, right: 100, bottom: 100, left: 0 };
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = FaceBox { top: 0, right: 10, bottom: 10, left: 0 };
        let b = FaceBox { top: 20, right: 30, bottom: 30, left: 20 };
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = FaceBox { top: 0, right: 10, bottom: 10, left: 0 };
        let b = FaceBox { top: 0, right: 15, bottom: 10, left: 5 };
        // Overlap: 5x10 = 50, union: 100 + 100 - 50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let candidates = vec![
            boxed(0, 100, 100, 0, 0.9),
            boxed(5, 105, 105, 5, 0.8),
            boxed(200, 250, 250, 200, 0.7),
        ];
        let result = nms(candidates, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint() {
        let candidates = vec![boxed(0, 10, 10, 0, 0.9), boxed(50, 60, 60, 50, 0.8)];
        assert_eq!(nms(candidates, 0.4).len(), 2);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_bilinear_resize_uniform_stays_uniform() {
        let src = vec![128u8; 16 * 16 * 3];
        let dst = bilinear_resize_rgb(&src, 16, 16, 32, 32);
        assert_eq!(dst.len(), 32 * 32 * 3);
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_bilinear_resize_downscale_dims() {
        let src = vec![0u8; 64 * 48 * 3];
        let dst = bilinear_resize_rgb(&src, 64, 48, 16, 12);
        assert_eq!(dst.len(), 16 * 12 * 3);
    }
}
