//! UI-facing event catalog and the sink abstraction that pushes them out.
use async_trait::async_trait;
use serde_json::{Value, json};

/// Every state-changing core action emits one of these. The payload shapes
/// mirror the named events consumers subscribe to; `name()` is what goes
/// out over the wire alongside the JSON payload.
#[derive(Debug, Clone)]
pub enum Event {
    QueueUpdate { printer_id: i64, queue: Value },
    StatusUpdate { printer_id: i64, status: String },
    ErrorUpdate { printer_id: i64, error: String },
    PortRepair { printer_id: i64, device: String },
    ProgressUpdate { job_id: i64, progress: f64 },
    JobStatusUpdate { job_id: i64, status: String },
    TempUpdate { printer_id: i64, extruder_temp: f64, bed_temp: f64 },
    FilePauseUpdate { job_id: i64, file_pause: u8 },
    ExtrudedUpdate { job_id: i64, extruded: u8 },
    ReleaseJob { job_id: i64 },
    SetTimeStarted { job_id: i64, time_started: u8 },
    SetTime { job_id: i64, new_time: Value, index: usize },
    MaxLayerHeight { job_id: i64, max_layer_height: f64 },
    CurrentLayerHeight { job_id: i64, current_layer_height: f64 },
    CanPause { printer_id: i64, can_pause: bool },
    ColorBuff { printer_id: i64, color_buff: u8 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::QueueUpdate { .. } => "queue_update",
            Event::StatusUpdate { .. } => "status_update",
            Event::ErrorUpdate { .. } => "error_update",
            Event::PortRepair { .. } => "port_repair",
            Event::ProgressUpdate { .. } => "progress_update",
            Event::JobStatusUpdate { .. } => "job_status_update",
            Event::TempUpdate { .. } => "temp_update",
            Event::FilePauseUpdate { .. } => "file_pause_update",
            Event::ExtrudedUpdate { .. } => "extruded_update",
            Event::ReleaseJob { .. } => "release_job",
            Event::SetTimeStarted { .. } => "set_time_started",
            Event::SetTime { .. } => "set_time",
            Event::MaxLayerHeight { .. } => "max_layer_height",
            Event::CurrentLayerHeight { .. } => "current_layer_height",
            Event::CanPause { .. } => "can_pause",
            Event::ColorBuff { .. } => "color_buff",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Event::QueueUpdate { printer_id, queue } => {
                json!({ "printerid": printer_id, "queue": queue })
            }
            Event::StatusUpdate { printer_id, status } => {
                json!({ "printer_id": printer_id, "status": status })
            }
            Event::ErrorUpdate { printer_id, error } => {
                json!({ "printerid": printer_id, "error": error })
            }
            Event::PortRepair { printer_id, device } => {
                json!({ "printer_id": printer_id, "device": device })
            }
            Event::ProgressUpdate { job_id, progress } => {
                json!({ "job_id": job_id, "progress": progress })
            }
            Event::JobStatusUpdate { job_id, status } => {
                json!({ "job_id": job_id, "status": status })
            }
            Event::TempUpdate { printer_id, extruder_temp, bed_temp } => {
                json!({ "printerid": printer_id, "extruder_temp": extruder_temp, "bed_temp": bed_temp })
            }
            Event::FilePauseUpdate { job_id, file_pause } => {
                json!({ "job_id": job_id, "file_pause": file_pause })
            }
            Event::ExtrudedUpdate { job_id, extruded } => {
                json!({ "job_id": job_id, "extruded": extruded })
            }
            Event::ReleaseJob { job_id } => json!({ "job_id": job_id }),
            Event::SetTimeStarted { job_id, time_started } => {
                json!({ "job_id": job_id, "time_started": time_started })
            }
            Event::SetTime { job_id, new_time, index } => {
                json!({ "job_id": job_id, "new_time": new_time, "index": index })
            }
            Event::MaxLayerHeight { job_id, max_layer_height } => {
                json!({ "job_id": job_id, "max_layer_height": max_layer_height })
            }
            Event::CurrentLayerHeight { job_id, current_layer_height } => {
                json!({ "job_id": job_id, "current_layer_height": current_layer_height })
            }
            Event::CanPause { printer_id, can_pause } => {
                json!({ "printer_id": printer_id, "can_pause": can_pause })
            }
            Event::ColorBuff { printer_id, color_buff } => {
                json!({ "printer_id": printer_id, "color_buff": color_buff })
            }
        }
    }
}

/// Pushes events to whatever UI transport is listening. The core only
/// depends on this trait; a real deployment might back it with websockets.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Broadcast-backed sink: any number of subscribers can listen via
/// `subscribe()`, matching the one-writer/many-reader shape of a live
/// UI feed. Lagging subscribers miss events rather than blocking emitters.
pub struct BroadcastEventSink {
    tx: tokio::sync::broadcast::Sender<Event>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: Event) {
        // No subscribers is a normal state (e.g. in tests); ignore the error.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_are_observable_by_subscribers() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();
        sink.emit(Event::StatusUpdate { printer_id: 1, status: "ready".into() }).await;
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "status_update");
        assert_eq!(got.payload()["status"], "ready");
    }
}
