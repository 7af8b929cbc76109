//! Fire-and-forget presence notifications.
//!
//! The recognition loop enqueues alerts onto a bounded channel and moves on;
//! one worker task drains the queue and drives the transport. A slow or
//! failing transport can therefore never stall frame throughput, and a
//! delivery failure is logged, never retried — the next day's sighting
//! produces the next alert.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// One "first sighting today" alert.
#[derive(Debug, Clone)]
pub struct PresenceAlert {
    pub employee_id: i64,
    pub name: String,
    pub email: Option<String>,
    /// Time of day of the sighting, "%H:%M:%S".
    pub time: String,
    /// Calendar date of the sighting, "%Y-%m-%d".
    pub date: String,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Outbound delivery channel for presence alerts.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, alert: &PresenceAlert) -> Result<(), TransportError>;
}

/// POSTs each alert as JSON to a configured webhook URL.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send(&self, alert: &PresenceAlert) -> Result<(), TransportError> {
        let payload = serde_json::json!({
            "employee_id": alert.employee_id,
            "employee": alert.name,
            "email": alert.email,
            "time": alert.time,
            "date": alert.date,
            "status": "Present",
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Used when no webhook is configured: the alert is only logged.
pub struct LogOnlyTransport;

#[async_trait]
impl Transport for LogOnlyTransport {
    async fn send(&self, alert: &PresenceAlert) -> Result<(), TransportError> {
        tracing::info!(
            employee = %alert.name,
            time = %alert.time,
            date = %alert.date,
            "presence alert (no webhook configured)"
        );
        Ok(())
    }
}

/// Loop-side handle: enqueue and forget.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<PresenceAlert>,
}

impl NotifierHandle {
    /// Never blocks. On a full queue the alert is dropped with a warning —
    /// the attendance record is already durable, only the alert is lost.
    pub fn enqueue(&self, alert: PresenceAlert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(alert)) => {
                tracing::warn!(employee = %alert.name, "notification queue full; alert dropped");
            }
            Err(mpsc::error::TrySendError::Closed(alert)) => {
                tracing::warn!(employee = %alert.name, "notification worker gone; alert dropped");
            }
        }
    }
}

/// Spawn the dispatcher worker. The worker exits once every handle is
/// dropped and the queue has drained.
pub fn spawn_notifier(
    transport: std::sync::Arc<dyn Transport>,
    queue_depth: usize,
) -> (NotifierHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PresenceAlert>(queue_depth.max(1));

    let worker = tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            match transport.send(&alert).await {
                Ok(()) => {
                    tracing::info!(employee = %alert.name, date = %alert.date, "presence alert delivered");
                }
                Err(e) => {
                    tracing::warn!(employee = %alert.name, error = %e, "presence alert delivery failed");
                }
            }
        }
        tracing::debug!("notification worker drained and exiting");
    });

    (NotifierHandle { tx }, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct MemoryTransport {
        sent: Arc<Mutex<Vec<PresenceAlert>>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, alert: &PresenceAlert) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct GatedTransport {
        gate: Arc<tokio::sync::Semaphore>,
        sent: Arc<Mutex<Vec<PresenceAlert>>>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn send(&self, alert: &PresenceAlert) -> Result<(), TransportError> {
            let _permit = self.gate.acquire().await.unwrap();
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn alert(name: &str) -> PresenceAlert {
        PresenceAlert {
            employee_id: 1,
            name: name.to_string(),
            email: None,
            time: "09:00:00".to_string(),
            date: "2024-01-01".to_string(),
        }
    }

    #[tokio::test]
    async fn test_every_enqueued_alert_is_delivered() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(MemoryTransport { sent: sent.clone() });
        let (handle, worker) = spawn_notifier(transport, 8);

        handle.enqueue(alert("Alice"));
        handle.enqueue(alert("Bob"));
        drop(handle);
        worker.await.unwrap();

        let delivered = sent.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].name, "Alice");
        assert_eq!(delivered[1].name, "Bob");
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let transport = Arc::new(GatedTransport { gate: gate.clone(), sent: sent.clone() });
        let (handle, worker) = spawn_notifier(transport, 1);

        // First alert is picked up by the worker and parks on the gate.
        handle.enqueue(alert("first"));
        tokio::task::yield_now().await;
        // Second fills the depth-1 queue; third must be dropped, not block.
        handle.enqueue(alert("second"));
        handle.enqueue(alert("third"));

        gate.add_permits(2);
        drop(handle);
        worker.await.unwrap();

        let delivered = sent.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].name, "first");
        assert_eq!(delivered[1].name, "second");
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        struct FailingTransport;

        #[async_trait]
        impl Transport for FailingTransport {
            async fn send(&self, _alert: &PresenceAlert) -> Result<(), TransportError> {
                Err(TransportError::Status(503))
            }
        }

        let (handle, worker) = spawn_notifier(Arc::new(FailingTransport), 4);
        handle.enqueue(alert("Alice"));
        drop(handle);
        // The worker finishes cleanly despite every delivery failing.
        worker.await.unwrap();
    }
}
