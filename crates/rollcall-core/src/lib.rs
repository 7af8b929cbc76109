//! rollcall-core — Face matching engine for the attendance pipeline.
//!
//! Detection and embedding run via ONNX Runtime behind the [`FaceEngine`]
//! trait; matching is nearest-neighbor Euclidean distance over an immutable
//! roster snapshot.

pub mod engine;
pub mod enroll;
pub mod matcher;
pub mod pipeline;
pub mod types;

pub use engine::{EngineError, FaceEngine, OnnxFaceEngine, EMBEDDING_DIM};
pub use matcher::{best_match, duplicate_of, Match, DEFAULT_TOLERANCE};
pub use pipeline::{FrameProcessor, ProcessError};
pub use types::{Detection, Embedding, FaceBox, Identity, RosterSnapshot};
