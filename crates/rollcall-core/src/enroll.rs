//! Registration-time embedding extraction.

use crate::engine::{EngineError, FaceEngine};
use crate::types::Embedding;
use thiserror::Error;

/// Registration input problems. User-facing, never a crash.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no face was found in the image — use a clear, front-facing photo")]
    NoFace,
    #[error("more than one face was found in the image — use a photo of just this person")]
    MultipleFaces,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Extract the embedding for a registration photo.
///
/// Runs at full resolution (registration is not throughput-bound) and
/// requires exactly one face in the image.
pub fn embedding_from_image<E: FaceEngine>(
    engine: &mut E,
    rgb: &[u8],
    width: u32,
    height: u32,
) -> Result<Embedding, EnrollError> {
    let boxes = engine.detect(rgb, width, height)?;

    let face = match boxes.as_slice() {
        [] => return Err(EnrollError::NoFace),
        [one] => one,
        _ => return Err(EnrollError::MultipleFaces),
    };

    Ok(engine.embed(rgb, width, height, face)?)
}
