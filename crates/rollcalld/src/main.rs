use anyhow::{Context, Result};
use rollcall_core::pipeline::FrameProcessor;
use rollcall_core::{FaceEngine, OnnxFaceEngine};
use rollcall_hw::camera::{default_backends, open_camera, CameraConfig};
use rollcall_store::{AttendanceLedger, EmbeddingCipher, RosterStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod notify;
mod session;

use notify::{spawn_notifier, LogOnlyTransport, Transport, WebhookTransport};
use session::{RecognitionLoop, SessionCounters, SessionOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let cfg = config::Config::load();

    let engine = OnnxFaceEngine::load(
        &cfg.detector_model_path(),
        &cfg.embedder_model_path(),
        cfg.confidence_threshold,
        cfg.nms_iou_threshold,
    )
    .context("failed to load face models")?;

    let cipher =
        EmbeddingCipher::load_or_create(&cfg.key_path).context("failed to load embedding key")?;
    let conn = rollcall_store::db::open(&cfg.db_path).context("failed to open database")?;
    let store = RosterStore::new(conn, cipher);

    let roster = Arc::new(
        store
            .snapshot(Some(engine.embedding_len()))
            .context("failed to load roster")?,
    );
    tracing::info!(
        count = roster.len(),
        "roster snapshot loaded; registrations made from now on apply after a restart"
    );
    let ledger = AttendanceLedger::new(store.into_connection());

    let camera_cfg = CameraConfig {
        device_path: cfg.camera_device.clone(),
        width: cfg.frame_width,
        height: cfg.frame_height,
    };
    let camera = open_camera(&default_backends(), &camera_cfg)
        .context("no camera available — every backend failed the open-and-read probe")?;
    let backend = camera.backend();

    let transport: Arc<dyn Transport> = match &cfg.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "webhook notification transport configured");
            Arc::new(WebhookTransport::new(url.clone()))
        }
        None => Arc::new(LogOnlyTransport),
    };
    let (notifier, notify_worker) = spawn_notifier(transport, cfg.notify_queue_depth);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);
    let counters = Arc::new(SessionCounters::default());
    let session_id = uuid::Uuid::new_v4();

    let session = RecognitionLoop {
        camera,
        processor: FrameProcessor::new(engine, cfg.downsample),
        roster: roster.clone(),
        ledger,
        notifier,
        tolerance: cfg.match_tolerance,
        stop: stop_rx,
        counters: counters.clone(),
        session_id,
    };

    let loop_thread = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || session.run())
        .context("failed to spawn session thread")?;

    // The control surface is best-effort: a kiosk without a session bus
    // still runs, it just loses Status/Stop.
    let _dbus = match dbus_interface::serve(dbus_interface::AttendanceService {
        counters: counters.clone(),
        stop_tx: stop_tx.clone(),
        backend,
        roster_len: roster.len(),
        session_id: session_id.to_string(),
    })
    .await
    {
        Ok(connection) => Some(connection),
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; running without Status/Stop");
            None
        }
    };

    // Ctrl-c maps to the same stop signal as D-Bus Stop; the loop observes
    // it at its next iteration boundary.
    {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stop signal received");
                let _ = stop_tx.send(true);
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || loop_thread.join())
        .await
        .context("session join task failed")?
        .map_err(|_| anyhow::anyhow!("session thread panicked"))?;

    // Loop is done, so the notifier handle is dropped; let the queue drain.
    let _ = notify_worker.await;

    match outcome {
        SessionOutcome::StopRequested => tracing::info!("rollcalld stopped"),
        SessionOutcome::EndOfStream => tracing::warn!("camera stream ended; restart to resume"),
        SessionOutcome::ReadFailure => {
            anyhow::bail!("camera read failed mid-session; restart to resume")
        }
    }

    Ok(())
}
