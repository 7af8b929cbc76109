//! Camera acquisition: V4L2 sources and the ordered backend fallback chain.
//!
//! Backend priority is fixed configuration, not runtime discovery. A backend
//! is accepted only if it opens *and* yields one real, decodable frame —
//! some stacks report a successful open without ever producing data. Once a
//! backend is accepted the session commits to it; there is no mid-session
//! fallback.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera available: every backend failed the open-and-read probe")]
    NoCameraAvailable,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("end of stream")]
    EndOfStream,
    #[error(transparent)]
    Decode(#[from] frame::FrameError),
}

/// Capture configuration shared by all backends.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Preferred V4L2 device path for the path-addressed backends.
    pub device_path: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// An open, committed frame source.
pub trait FrameSource: Send {
    /// Blocking read of the next frame, bounded by the driver.
    fn read(&mut self) -> Result<Frame, CameraError>;
    /// Release the underlying device. Idempotent.
    fn release(&mut self);
}

/// A named acquisition strategy. `open` either produces a source or reports
/// why it cannot — no exceptions-as-control-flow, the chain just moves on.
pub trait CameraBackend {
    fn name(&self) -> &'static str;
    fn open(&self, cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// The fixed backend priority order: most capable first, most generic last.
pub fn default_backends() -> Vec<Box<dyn CameraBackend>> {
    vec![
        Box::new(NativeBackend),
        Box::new(MjpegBackend),
        Box::new(ScanBackend),
        Box::new(AnyBackend),
    ]
}

/// Probe backends in order; commit to the first that opens and delivers a
/// decodable frame. Rejected sources are released before the next backend
/// is tried. The probe frame itself is discarded.
pub fn open_camera(
    backends: &[Box<dyn CameraBackend>],
    cfg: &CameraConfig,
) -> Result<ActiveCamera, CameraError> {
    for backend in backends {
        let mut source = match backend.open(cfg) {
            Ok(source) => source,
            Err(e) => {
                tracing::debug!(backend = backend.name(), error = %e, "backend did not open");
                continue;
            }
        };

        match source.read() {
            Ok(first) if first.is_decodable() => {
                tracing::info!(
                    backend = backend.name(),
                    width = first.width,
                    height = first.height,
                    "camera committed"
                );
                return Ok(ActiveCamera {
                    source,
                    backend: backend.name(),
                    released: false,
                });
            }
            Ok(_) => {
                tracing::warn!(backend = backend.name(), "opened but first frame undecodable");
                source.release();
            }
            Err(e) => {
                tracing::warn!(backend = backend.name(), error = %e, "opened but first read failed");
                source.release();
            }
        }
    }

    Err(CameraError::NoCameraAvailable)
}

/// The committed camera for one recognition session.
pub struct ActiveCamera {
    source: Box<dyn FrameSource>,
    backend: &'static str,
    released: bool,
}

impl ActiveCamera {
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn read(&mut self) -> Result<Frame, CameraError> {
        self.source.read()
    }

    pub fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.released = true;
            tracing::info!(backend = self.backend, "camera released");
        }
    }
}

impl Drop for ActiveCamera {
    fn drop(&mut self) {
        self.release();
    }
}

// --- V4L2 realization ---

/// Negotiated delivery format of a V4L2 source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    /// Packed BGR24, passed through.
    Bgr24,
    /// YUYV 4:2:2, converted per frame.
    Yuyv,
    /// Motion-JPEG, decoded per frame.
    Mjpeg,
}

struct V4lSource {
    device: Device,
    width: u32,
    height: u32,
    format: SourceFormat,
    device_path: String,
}

impl V4lSource {
    /// Open `path` and negotiate one of the supported formats, trying the
    /// given FourCC preferences in order.
    fn open(
        path: &str,
        cfg: &CameraConfig,
        preferences: &[&[u8; 4]],
    ) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::FormatNegotiationFailed(
                "device does not support video capture".to_string(),
            ));
        }

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.width = cfg.width;
        fmt.height = cfg.height;

        let mut negotiated = None;
        for &fourcc in preferences {
            fmt.fourcc = FourCC::new(fourcc);
            let got = device.set_format(&fmt).map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;
            if let Some(format) = supported_format(got.fourcc) {
                negotiated = Some((got, format));
                break;
            }
        }

        let (got, format) = negotiated.ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "device at {path} offers none of the supported formats"
            ))
        })?;

        tracing::info!(
            device = path,
            driver = %caps.driver,
            card = %caps.card,
            width = got.width,
            height = got.height,
            fourcc = ?got.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: got.width,
            height: got.height,
            format,
            device_path: path.to_string(),
        })
    }
}

fn supported_format(fourcc: FourCC) -> Option<SourceFormat> {
    if fourcc == FourCC::new(b"BGR3") {
        Some(SourceFormat::Bgr24)
    } else if fourcc == FourCC::new(b"YUYV") {
        Some(SourceFormat::Yuyv)
    } else if fourcc == FourCC::new(b"MJPG") {
        Some(SourceFormat::Mjpeg)
    } else {
        None
    }
}

impl FrameSource for V4lSource {
    fn read(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let (data, width, height) = match self.format {
            SourceFormat::Bgr24 => {
                let expected = (self.width * self.height * 3) as usize;
                if buf.len() < expected {
                    return Err(CameraError::CaptureFailed(format!(
                        "BGR3 buffer too short: expected {expected}, got {}",
                        buf.len()
                    )));
                }
                (buf[..expected].to_vec(), self.width, self.height)
            }
            SourceFormat::Yuyv => (
                frame::yuyv_to_bgr(buf, self.width, self.height)?,
                self.width,
                self.height,
            ),
            SourceFormat::Mjpeg => {
                let (bgr, w, h) = frame::mjpeg_to_bgr(buf)?;
                (bgr, w, h)
            }
        };

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    fn release(&mut self) {
        // Dropping the Device closes the fd; streams are per-read.
        tracing::debug!(device = %self.device_path, "v4l source released");
    }
}

/// V4L2 device at the configured path, raw formats preferred (BGR24, YUYV).
struct NativeBackend;

impl CameraBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open(&self, cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        let source = V4lSource::open(&cfg.device_path, cfg, &[b"BGR3", b"YUYV"])?;
        Ok(Box::new(source))
    }
}

/// V4L2 device at the configured path negotiated to MJPG. Some stacks only
/// stream compressed; frames are decoded per read.
struct MjpegBackend;

impl CameraBackend for MjpegBackend {
    fn name(&self) -> &'static str {
        "mjpeg"
    }

    fn open(&self, cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        let source = V4lSource::open(&cfg.device_path, cfg, &[b"MJPG"])?;
        if source.format != SourceFormat::Mjpeg {
            return Err(CameraError::FormatNegotiationFailed(
                "driver would not negotiate MJPG".to_string(),
            ));
        }
        Ok(Box::new(source))
    }
}

const SCAN_MAX_INDEX: u32 = 9;

/// Indexed scan over /dev/video0..9: first device that negotiates wins.
struct ScanBackend;

impl CameraBackend for ScanBackend {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn open(&self, cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        for index in 0..=SCAN_MAX_INDEX {
            let path = format!("/dev/video{index}");
            if !Path::new(&path).exists() {
                continue;
            }
            match V4lSource::open(&path, cfg, &[b"BGR3", b"YUYV", b"MJPG"]) {
                Ok(source) => {
                    tracing::debug!(index, "scan backend accepted device");
                    return Ok(Box::new(source));
                }
                Err(e) => {
                    tracing::debug!(index, error = %e, "scan backend skipped device");
                }
            }
        }
        Err(CameraError::DeviceNotFound(format!(
            "no usable device in /dev/video0..{SCAN_MAX_INDEX}"
        )))
    }
}

/// Last resort: /dev/video0 with whatever format the driver already has,
/// accepted if it is one we can convert.
struct AnyBackend;

impl CameraBackend for AnyBackend {
    fn name(&self) -> &'static str {
        "any"
    }

    // Resolution is left at the driver default on this path.
    fn open(&self, _cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        let path = "/dev/video0";
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path)
            .map_err(|e| CameraError::DeviceNotFound(format!("{path}: {e}")))?;
        let current = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;

        let format = supported_format(current.fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "driver format {:?} is not convertible",
                current.fourcc
            ))
        })?;

        Ok(Box::new(V4lSource {
            device,
            width: current.width,
            height: current.height,
            format,
            device_path: path.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn good_frame() -> Frame {
        Frame {
            data: vec![0u8; 4 * 4 * 3],
            width: 4,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    struct ScriptedSource {
        reads: VecDeque<Result<Frame, CameraError>>,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for ScriptedSource {
        fn read(&mut self) -> Result<Frame, CameraError> {
            self.reads
                .pop_front()
                .unwrap_or(Err(CameraError::EndOfStream))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    enum Script {
        FailOpen,
        FirstReadFails,
        BadFirstFrame,
        Good,
    }

    struct ScriptedBackend {
        name: &'static str,
        script: Script,
        opened: Arc<AtomicBool>,
        released: Arc<AtomicBool>,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                script,
                opened: Arc::new(AtomicBool::new(false)),
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl CameraBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn open(&self, _cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
            match self.script {
                Script::FailOpen => Err(CameraError::DeviceNotFound("scripted".into())),
                Script::FirstReadFails => {
                    self.opened.store(true, Ordering::SeqCst);
                    Ok(Box::new(ScriptedSource {
                        reads: VecDeque::from([Err(CameraError::CaptureFailed("scripted".into()))]),
                        released: self.released.clone(),
                    }))
                }
                Script::BadFirstFrame => {
                    self.opened.store(true, Ordering::SeqCst);
                    let garbage = Frame { data: vec![0u8; 5], ..good_frame() };
                    Ok(Box::new(ScriptedSource {
                        reads: VecDeque::from([Ok(garbage)]),
                        released: self.released.clone(),
                    }))
                }
                Script::Good => {
                    self.opened.store(true, Ordering::SeqCst);
                    Ok(Box::new(ScriptedSource {
                        reads: VecDeque::from([Ok(good_frame()), Ok(good_frame())]),
                        released: self.released.clone(),
                    }))
                }
            }
        }
    }

    fn chain(backends: Vec<ScriptedBackend>) -> Vec<Box<dyn CameraBackend>> {
        backends
            .into_iter()
            .map(|b| Box::new(b) as Box<dyn CameraBackend>)
            .collect()
    }

    #[test]
    fn test_fallback_commits_first_good_backend() {
        let a = ScriptedBackend::new("a", Script::FirstReadFails);
        let b = ScriptedBackend::new("b", Script::FailOpen);
        let c = ScriptedBackend::new("c", Script::Good);
        let (a_released, b_opened) = (a.released.clone(), b.opened.clone());

        let camera = open_camera(&chain(vec![a, b, c]), &CameraConfig::default()).unwrap();

        assert_eq!(camera.backend(), "c");
        // A was rejected and released before C was selected; B never opened.
        assert!(a_released.load(Ordering::SeqCst));
        assert!(!b_opened.load(Ordering::SeqCst));
    }

    #[test]
    fn test_undecodable_first_frame_rejects_backend() {
        let a = ScriptedBackend::new("a", Script::BadFirstFrame);
        let b = ScriptedBackend::new("b", Script::Good);
        let a_released = a.released.clone();

        let camera = open_camera(&chain(vec![a, b]), &CameraConfig::default()).unwrap();

        assert_eq!(camera.backend(), "b");
        assert!(a_released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_all_backends_fail_is_no_camera() {
        let a = ScriptedBackend::new("a", Script::FailOpen);
        let b = ScriptedBackend::new("b", Script::FirstReadFails);

        let result = open_camera(&chain(vec![a, b]), &CameraConfig::default());
        assert!(matches!(result, Err(CameraError::NoCameraAvailable)));
    }

    #[test]
    fn test_probe_frame_is_discarded() {
        // The committed source already consumed its probe frame; the next
        // read returns the second scripted frame, then ends.
        let backend = ScriptedBackend::new("only", Script::Good);
        let mut camera = open_camera(&chain(vec![backend]), &CameraConfig::default()).unwrap();

        assert!(camera.read().is_ok());
        assert!(matches!(camera.read(), Err(CameraError::EndOfStream)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = ScriptedBackend::new("only", Script::Good);
        let released = backend.released.clone();
        let mut camera = open_camera(&chain(vec![backend]), &CameraConfig::default()).unwrap();

        camera.release();
        camera.release();
        drop(camera);
        assert!(released.load(Ordering::SeqCst));
    }

    // Sources are created per-test; a shared counter guards against a
    // double-release slipping through the idempotence flag.
    #[test]
    fn test_drop_releases_exactly_once() {
        struct CountingSource {
            releases: Arc<Mutex<u32>>,
        }
        impl FrameSource for CountingSource {
            fn read(&mut self) -> Result<Frame, CameraError> {
                Ok(good_frame())
            }
            fn release(&mut self) {
                *self.releases.lock().unwrap() += 1;
            }
        }
        struct CountingBackend {
            releases: Arc<Mutex<u32>>,
        }
        impl CameraBackend for CountingBackend {
            fn name(&self) -> &'static str {
                "counting"
            }
            fn open(&self, _cfg: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
                Ok(Box::new(CountingSource { releases: self.releases.clone() }))
            }
        }

        let releases = Arc::new(Mutex::new(0));
        let backends: Vec<Box<dyn CameraBackend>> =
            vec![Box::new(CountingBackend { releases: releases.clone() })];

        let camera = open_camera(&backends, &CameraConfig::default()).unwrap();
        drop(camera);
        assert_eq!(*releases.lock().unwrap(), 1);
    }
}
