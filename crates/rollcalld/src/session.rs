//! The recognition session: one camera, one roster snapshot, one loop.

use crate::notify::{NotifierHandle, PresenceAlert};
use rollcall_core::matcher::{best_match, Match};
use rollcall_core::pipeline::{FrameProcessor, ProcessError};
use rollcall_core::types::RosterSnapshot;
use rollcall_core::FaceEngine;
use rollcall_hw::{ActiveCamera, CameraError};
use rollcall_store::{AttendanceLedger, MarkOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// External stop signal (ctrl-c or D-Bus Stop).
    StopRequested,
    /// The source reported end of stream.
    EndOfStream,
    /// A mid-session read failed; the caller may restart the whole session.
    ReadFailure,
}

/// Live counters shared with the D-Bus status surface.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub faces: AtomicU64,
    pub recorded: AtomicU64,
    pub deduped: AtomicU64,
    pub unknown: AtomicU64,
}

/// The per-session state machine. Runs on a dedicated OS thread so camera
/// reads never block the async runtime; iterations are strictly sequential —
/// frame N+1 is never started before frame N completes.
pub struct RecognitionLoop<E: FaceEngine> {
    pub camera: ActiveCamera,
    pub processor: FrameProcessor<E>,
    /// Shared read-only for the whole session; registrations made while the
    /// loop runs are not observed until the session is restarted.
    pub roster: Arc<RosterSnapshot>,
    pub ledger: AttendanceLedger,
    pub notifier: NotifierHandle,
    pub tolerance: f32,
    pub stop: watch::Receiver<bool>,
    pub counters: Arc<SessionCounters>,
    pub session_id: uuid::Uuid,
}

impl<E: FaceEngine> RecognitionLoop<E> {
    /// Run until stop, end-of-stream, or read failure. The camera is
    /// released on every exit path.
    pub fn run(mut self) -> SessionOutcome {
        tracing::info!(
            session = %self.session_id,
            backend = self.camera.backend(),
            roster = self.roster.len(),
            "session streaming"
        );

        let outcome = loop {
            if *self.stop.borrow() {
                break SessionOutcome::StopRequested;
            }

            let frame = match self.camera.read() {
                Ok(frame) => frame,
                Err(CameraError::EndOfStream) => break SessionOutcome::EndOfStream,
                // One corrupt buffer is not a broken camera.
                Err(CameraError::Decode(e)) => {
                    tracing::debug!(error = %e, "skipping undecodable frame");
                    self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(e) => {
                    tracing::error!(session = %self.session_id, error = %e, "frame read failed");
                    break SessionOutcome::ReadFailure;
                }
            };
            self.counters.frames.fetch_add(1, Ordering::Relaxed);

            let detections = match self.processor.process(&frame.data, frame.width, frame.height)
            {
                Ok(detections) => detections,
                Err(ProcessError::BadFrame { expected, actual }) => {
                    tracing::debug!(expected, actual, "skipping undecodable frame");
                    self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(ProcessError::Engine(e)) => {
                    tracing::warn!(error = %e, "engine failed on frame; skipping");
                    self.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            for detection in &detections {
                self.counters.faces.fetch_add(1, Ordering::Relaxed);
                self.handle_detection(&detection.embedding);
            }
        };

        self.camera.release();
        tracing::info!(session = %self.session_id, outcome = ?outcome, "session ended");
        outcome
    }

    /// Match one embedding, then ledger and notify. The match → ledger →
    /// notify order is fixed; a ledgering failure is logged and the loop
    /// moves on — no same-frame retry, the next natural sighting retries.
    fn handle_detection(&self, embedding: &rollcall_core::Embedding) {
        let identity = match best_match(embedding, &self.roster, self.tolerance) {
            Match::Known { identity, distance } => {
                tracing::debug!(id = identity.id, name = %identity.display_name, distance, "face matched");
                identity
            }
            Match::Unknown => {
                self.counters.unknown.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let now = chrono::Local::now().naive_local();
        match self.ledger.mark_present(identity.id, now) {
            Ok(MarkOutcome::Recorded) => {
                self.counters.recorded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(id = identity.id, name = %identity.display_name, "present");

                match self.ledger.lookup_contact(identity.id) {
                    Ok(contact) => self.notifier.enqueue(PresenceAlert {
                        employee_id: identity.id,
                        name: contact.name,
                        email: contact.email,
                        time: now.time().format("%H:%M:%S").to_string(),
                        date: now.date().format("%Y-%m-%d").to_string(),
                    }),
                    Err(e) => {
                        tracing::warn!(id = identity.id, error = %e, "contact lookup failed; alert skipped");
                    }
                }
            }
            Ok(MarkOutcome::AlreadyRecorded) => {
                self.counters.deduped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(id = identity.id, error = %e, "ledgering failed; continuing");
            }
        }
    }
}
