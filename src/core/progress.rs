//! Progress telemetry for active wipe jobs.
//!
//! Events flow through a bounded per-job sink. Periodic samples are
//! dropped when subscribers fall behind; pass-complete and terminal
//! events are always delivered. Events on a single sink are strictly
//! ordered, and nothing is emitted after the terminal event.

use serde::Serialize;
use tokio::sync::mpsc;

/// One progress frame for a wipe job, shipped to WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    pub method_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    pub status: String,
    /// Overall completion across all passes, 0..=100
    pub percent: f64,
    pub current_pass: u32,
    pub total_passes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn new(device_id: &str, method_id: &str, method_name: Option<&str>) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_model: None,
            method_id: method_id.to_string(),
            method_name: method_name.map(str::to_string),
            status: String::new(),
            percent: 0.0,
            current_pass: 0,
            total_passes: 0,
            speed_mbps: None,
            eta_seconds: None,
            bytes_written: 0,
            error: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn done(device_id: &str, method_id: &str) -> Self {
        let mut event = Self::new(device_id, method_id, None);
        event.status = "done".to_string();
        event.percent = 100.0;
        event
    }

    pub fn aborted(device_id: &str, method_id: &str) -> Self {
        let mut event = Self::new(device_id, method_id, None);
        event.status = "aborted".to_string();
        event
    }

    pub fn failed(device_id: &str, method_id: &str, error: &str) -> Self {
        let mut event = Self::new(device_id, method_id, None);
        event.status = "error".to_string();
        event.error = Some(error.to_string());
        event
    }

    /// True for the job-final frames: done, aborted, error.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "done" | "aborted" | "error")
    }
}

/// Bounded, lossy-for-samples event sink.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit a periodic sample. Dropped if the sink is full so the I/O
    /// loop never blocks on a slow subscriber.
    pub fn sample(&self, event: ProgressEvent) {
        let _ = self.tx.try_send(event);
    }

    /// Emit a pass-boundary or terminal event. These wait for sink
    /// capacity and are never dropped.
    pub async fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event).await;
    }
}
