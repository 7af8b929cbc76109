use serde::{Deserialize, Serialize};

/// Face embedding vector (dimension fixed by the engine, typically 128).
///
/// Immutable once computed. Distance comparisons are Euclidean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A registered person known to the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub display_name: String,
    pub embedding: Embedding,
}

/// Immutable roster of known identities for one recognition session.
///
/// Loaded once at session start and shared read-only across all frames.
/// Registrations and deletions made while a session is running are NOT
/// observed until the operator restarts the session — a refresh means
/// constructing a new snapshot and swapping it in, never mutating this one.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    identities: Vec<Identity>,
}

impl RosterSnapshot {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identities in roster order. Iteration order is the tie-break order
    /// for equidistant matches, so it must stay stable within a session.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }
}

/// Face bounding box as (top, right, bottom, left) in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// Scale all edges by `factor`, e.g. to map a box detected on a
    /// downsampled frame back to source-frame coordinates.
    pub fn scale(&self, factor: f32) -> FaceBox {
        let s = |v: u32| (v as f32 * factor).round().max(0.0) as u32;
        FaceBox {
            top: s(self.top),
            right: s(self.right),
            bottom: s(self.bottom),
            left: s(self.left),
        }
    }
}

/// One detected face in a frame: where it is, and what it looks like.
/// Produced per frame, never persisted.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Box in source-frame coordinates (already scaled back from the
    /// downsampled detection frame).
    pub face_box: FaceBox,
    pub embedding: Embedding,
}
