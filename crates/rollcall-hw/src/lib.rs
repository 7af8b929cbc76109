//! rollcall-hw — Camera acquisition for the attendance pipeline.
//!
//! Provides V4L2-based capture behind the [`FrameSource`] trait and an
//! ordered backend fallback chain: a backend is committed only after it
//! opens *and* delivers one real, decodable frame.

pub mod camera;
pub mod frame;

pub use camera::{
    default_backends, open_camera, ActiveCamera, CameraBackend, CameraConfig, CameraError,
    FrameSource,
};
pub use frame::Frame;
