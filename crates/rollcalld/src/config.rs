use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration: defaults, overridden by an optional TOML file at
/// `ROLLCALL_CONFIG`, overridden by `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred V4L2 device path for the path-addressed camera backends.
    pub camera_device: String,
    /// Target capture resolution.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Spatial downsample factor applied before detection.
    pub downsample: f32,
    /// Maximum embedding distance accepted as "same person" during
    /// recognition. (The registration-time duplicate guard reads its own
    /// `ROLLCALL_REGISTER_TOLERANCE`, handled by the CLI.)
    pub match_tolerance: f32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub embedder_model: String,
    /// Detector post-processing thresholds.
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding encryption key file.
    pub key_path: PathBuf,
    /// Webhook URL for presence alerts. Unset means log-only delivery.
    pub webhook_url: Option<String>,
    /// Bounded notification queue depth; overflow drops the alert.
    pub notify_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            downsample: 0.25,
            match_tolerance: rollcall_core::DEFAULT_TOLERANCE,
            model_dir: data_dir.join("models"),
            detector_model: "face_det.onnx".to_string(),
            embedder_model: "face_embed.onnx".to_string(),
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.4,
            db_path: data_dir.join("attendance.db"),
            key_path: data_dir.join("embeddings.key"),
            webhook_url: None,
            notify_queue_depth: 16,
        }
    }
}

impl Config {
    /// Load configuration: defaults ← TOML file ← environment.
    pub fn load() -> Self {
        let mut cfg = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => match std::fs::read_to_string(&path) {
                Ok(text) => match toml::from_str(&text) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "bad config file; using defaults");
                        Config::default()
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "unreadable config file; using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        env_string("ROLLCALL_CAMERA_DEVICE", &mut self.camera_device);
        env_parse("ROLLCALL_FRAME_WIDTH", &mut self.frame_width);
        env_parse("ROLLCALL_FRAME_HEIGHT", &mut self.frame_height);
        env_parse("ROLLCALL_DOWNSAMPLE", &mut self.downsample);
        env_parse("ROLLCALL_MATCH_TOLERANCE", &mut self.match_tolerance);
        env_path("ROLLCALL_MODEL_DIR", &mut self.model_dir);
        env_string("ROLLCALL_DETECTOR_MODEL", &mut self.detector_model);
        env_string("ROLLCALL_EMBEDDER_MODEL", &mut self.embedder_model);
        env_parse("ROLLCALL_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        env_parse("ROLLCALL_NMS_IOU_THRESHOLD", &mut self.nms_iou_threshold);
        env_path("ROLLCALL_DB_PATH", &mut self.db_path);
        env_path("ROLLCALL_KEY_PATH", &mut self.key_path);
        if let Ok(v) = std::env::var("ROLLCALL_WEBHOOK_URL") {
            self.webhook_url = if v.is_empty() { None } else { Some(v) };
        }
        env_parse("ROLLCALL_NOTIFY_QUEUE_DEPTH", &mut self.notify_queue_depth);
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join(&self.embedder_model)
            .to_string_lossy()
            .into_owned()
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key) {
        *slot = v;
    }
}

fn env_path(key: &str, slot: &mut PathBuf) {
    if let Ok(v) = std::env::var(key) {
        *slot = PathBuf::from(v);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}
