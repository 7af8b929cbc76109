//! Per-frame processing: downsample, color conversion, detect, embed.

use crate::engine::{EngineError, FaceEngine};
use crate::types::Detection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    /// The frame buffer does not match its declared dimensions. The caller
    /// skips the frame; the session continues.
    #[error("undecodable frame: expected {expected} bytes, got {actual}")]
    BadFrame { expected: usize, actual: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Turns one camera frame into a list of detections.
///
/// Frames are downsampled by a fixed factor before detection — embedding
/// cost scales with pixel count, and the downsampled frame is accurate
/// enough for matching. Boxes are scaled back to source-frame coordinates
/// for downstream consumers; that scaling is presentational only, matching
/// operates on the embeddings.
pub struct FrameProcessor<E> {
    engine: E,
    downsample: f32,
}

impl<E: FaceEngine> FrameProcessor<E> {
    pub fn new(engine: E, downsample: f32) -> Self {
        Self {
            engine,
            downsample: downsample.clamp(0.05, 1.0),
        }
    }

    pub fn embedding_len(&self) -> usize {
        self.engine.embedding_len()
    }

    /// Process one packed-BGR24 frame.
    ///
    /// A frame with no faces yields an empty vec, not an error.
    pub fn process(
        &mut self,
        bgr: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, ProcessError> {
        let expected = width as usize * height as usize * 3;
        if bgr.len() != expected {
            return Err(ProcessError::BadFrame {
                expected,
                actual: bgr.len(),
            });
        }

        let small_w = ((width as f32 * self.downsample).round() as u32).max(1);
        let small_h = ((height as f32 * self.downsample).round() as u32).max(1);

        let mut small = downsample_bgr(bgr, width, height, small_w, small_h);
        swap_bgr_rgb(&mut small);

        let boxes = self.engine.detect(&small, small_w, small_h)?;

        let inverse = 1.0 / self.downsample;
        let mut detections = Vec::with_capacity(boxes.len());
        for face_box in &boxes {
            let embedding = self.engine.embed(&small, small_w, small_h, face_box)?;
            detections.push(Detection {
                face_box: face_box.scale(inverse),
                embedding,
            });
        }

        Ok(detections)
    }
}

/// Nearest-neighbor downsample of packed BGR24 data.
fn downsample_bgr(src: &[u8], src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Vec<u8> {
    let (sw, sh, dw, dh) = (src_w as usize, src_h as usize, dst_w as usize, dst_h as usize);
    let mut dst = vec![0u8; dw * dh * 3];

    for y in 0..dh {
        let src_y = (y * sh / dh).min(sh - 1);
        for x in 0..dw {
            let src_x = (x * sw / dw).min(sw - 1);
            let s = (src_y * sw + src_x) * 3;
            let d = (y * dw + x) * 3;
            dst[d..d + 3].copy_from_slice(&src[s..s + 3]);
        }
    }

    dst
}

/// Swap channel order in place (BGR ↔ RGB).
fn swap_bgr_rgb(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FaceEngine;
    use crate::types::{Embedding, FaceBox};

    /// Test engine returning scripted boxes and a constant embedding,
    /// counting calls.
    struct StubEngine {
        boxes: Vec<FaceBox>,
        embed_calls: usize,
    }

    impl StubEngine {
        fn with_boxes(boxes: Vec<FaceBox>) -> Self {
            Self { boxes, embed_calls: 0 }
        }
    }

    impl FaceEngine for StubEngine {
        fn detect(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<FaceBox>, EngineError> {
            Ok(self.boxes.clone())
        }

        fn embed(
            &mut self,
            _rgb: &[u8],
            _width: u32,
            _height: u32,
            _face: &FaceBox,
        ) -> Result<Embedding, EngineError> {
            self.embed_calls += 1;
            Ok(Embedding::new(vec![0.0, 1.0]))
        }

        fn embedding_len(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_no_faces_yields_empty_list() {
        let mut processor = FrameProcessor::new(StubEngine::with_boxes(vec![]), 0.25);
        let frame = vec![0u8; 640 * 480 * 3];
        let detections = processor.process(&frame, 640, 480).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_boxes_scaled_back_to_source_coordinates() {
        let small_box = FaceBox { top: 10, right: 40, bottom: 30, left: 20 };
        let mut processor = FrameProcessor::new(StubEngine::with_boxes(vec![small_box]), 0.25);
        let frame = vec![0u8; 640 * 480 * 3];

        let detections = processor.process(&frame, 640, 480).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(
            detections[0].face_box,
            FaceBox { top: 40, right: 160, bottom: 120, left: 80 }
        );
    }

    #[test]
    fn test_one_embedding_per_box() {
        let b = FaceBox { top: 0, right: 10, bottom: 10, left: 0 };
        let mut processor = FrameProcessor::new(StubEngine::with_boxes(vec![b, b, b]), 0.5);
        let frame = vec![0u8; 64 * 48 * 3];

        let detections = processor.process(&frame, 64, 48).unwrap();
        assert_eq!(detections.len(), 3);
        // Each detection got its own embed call on the stub.
        // (Processor consumed the engine; count is observable via detections.)
        assert!(detections.iter().all(|d| d.embedding.len() == 2));
    }

    #[test]
    fn test_short_buffer_is_bad_frame() {
        let mut processor = FrameProcessor::new(StubEngine::with_boxes(vec![]), 0.25);
        let frame = vec![0u8; 100];
        match processor.process(&frame, 640, 480) {
            Err(ProcessError::BadFrame { expected, actual }) => {
                assert_eq!(expected, 640 * 480 * 3);
                assert_eq!(actual, 100);
            }
            other => panic!("expected BadFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_downsample_dims() {
        let src = vec![7u8; 640 * 480 * 3];
        let dst = downsample_bgr(&src, 640, 480, 160, 120);
        assert_eq!(dst.len(), 160 * 120 * 3);
        assert!(dst.iter().all(|&p| p == 7));
    }

    #[test]
    fn test_swap_bgr_rgb_roundtrip() {
        let mut data = vec![10, 20, 30, 40, 50, 60];
        swap_bgr_rgb(&mut data);
        assert_eq!(data, vec![30, 20, 10, 60, 50, 40]);
        swap_bgr_rgb(&mut data);
        assert_eq!(data, vec![10, 20, 30, 40, 50, 60]);
    }
}
