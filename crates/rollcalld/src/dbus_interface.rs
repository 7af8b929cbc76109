use crate::session::SessionCounters;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use zbus::interface;

/// D-Bus control surface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pub counters: Arc<SessionCounters>,
    pub stop_tx: Arc<watch::Sender<bool>>,
    pub backend: &'static str,
    pub roster_len: usize,
    pub session_id: String,
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Return session status as a JSON document.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "session": self.session_id,
            "camera_backend": self.backend,
            "roster_size": self.roster_len,
            "frames": self.counters.frames.load(Ordering::Relaxed),
            "frames_skipped": self.counters.frames_skipped.load(Ordering::Relaxed),
            "faces": self.counters.faces.load(Ordering::Relaxed),
            "recorded": self.counters.recorded.load(Ordering::Relaxed),
            "already_recorded": self.counters.deduped.load(Ordering::Relaxed),
            "unknown": self.counters.unknown.load(Ordering::Relaxed),
        })
        .to_string())
    }

    /// Request a clean session stop. The loop observes the signal at its
    /// next iteration boundary.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested over D-Bus");
        let _ = self.stop_tx.send(true);
        Ok(())
    }
}

/// Register the service on the session bus.
pub async fn serve(service: AttendanceService) -> zbus::Result<zbus::Connection> {
    zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await
}
