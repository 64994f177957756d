//! The print job: its payload, lifecycle, and time/progress telemetry.
use crate::event::{Event, EventSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InQueue,
    Printing,
    Paused,
    ColorChange,
    Complete,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InQueue => "inqueue",
            JobStatus::Printing => "printing",
            JobStatus::Paused => "paused",
            JobStatus::ColorChange => "colorchange",
            JobStatus::Complete => "complete",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }
}

/// `(total_seconds, eta, started_at, paused_at)`. `None` stands in for the
/// "unset" sentinel the original system represented with a minimum
/// timestamp; here it just means "not currently applicable".
#[derive(Debug, Clone, Default)]
pub struct JobTime {
    pub total_seconds: i64,
    pub eta: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub file: Vec<u8>,
    pub file_name_original: String,
    pub file_name_pk: String,
    pub filament: String,
    pub td_id: Option<String>,
    pub comments: String,
    pub favorite: bool,
    pub error_id: Option<i64>,
    pub printer_id: Option<i64>,
    pub created_at: DateTime<Utc>,

    pub status: JobStatus,
    pub progress: f64,
    pub released: u8,
    pub file_pause: u8,
    pub extruded: u8,
    pub time_started: u8,
    pub max_layer_height: f64,
    pub current_layer_height: f64,
    pub job_time: JobTime,
    pub sent_lines: u64,

    sink: Arc<dyn EventSink>,
}

impl Job {
    pub fn new(
        id: i64,
        file: Vec<u8>,
        file_name_original: String,
        filament: String,
        td_id: Option<String>,
        favorite: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let file_name_pk = make_file_name_pk(&file_name_original, id);
        Self {
            id,
            file,
            file_name_original,
            file_name_pk,
            filament,
            td_id,
            comments: String::new(),
            favorite,
            error_id: None,
            printer_id: None,
            created_at: Utc::now(),
            status: JobStatus::InQueue,
            progress: 0.0,
            released: 0,
            file_pause: 0,
            extruded: 0,
            time_started: 0,
            max_layer_height: 0.0,
            current_layer_height: 0.0,
            job_time: JobTime::default(),
            sent_lines: 0,
            sink,
        }
    }

    /// Parse total print-time seconds out of the G-code comment block that
    /// precedes the body of the file. Two formats are recognized: a slicer
    /// that stamps `;FLAVOR:...` followed by `;TIME:<seconds>`, or one that
    /// buries a human-readable duration in a comment containing "time",
    /// expressed as digit groups read right-to-left (seconds, minutes,
    /// hours, days).
    pub fn time_from_file(comments: &[String]) -> i64 {
        if comments.first().is_some_and(|c| c.contains("FLAVOR")) {
            if let Some(time_comment) = comments.get(1) {
                if let Some((_, secs)) = time_comment.split_once(':') {
                    return secs.trim().parse().unwrap_or(0);
                }
            }
            return 0;
        }

        let Some(time_comment) = comments.iter().find(|c| c.to_lowercase().contains("time")) else {
            return 0;
        };
        let numbers: Vec<i64> = time_comment
            .split(|c: char| !c.is_ascii_digit())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        let multipliers = [1i64, 60, 3600, 86400];
        numbers
            .iter()
            .rev()
            .zip(multipliers.iter())
            .map(|(n, m)| n * m)
            .sum()
    }

    pub fn calculate_eta(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.job_time.total_seconds)
    }

    /// ETA pushed back by however long the job has been paused.
    pub fn color_eta(&self) -> DateTime<Utc> {
        let paused_for = self
            .job_time
            .paused_at
            .map(|paused_at| Utc::now() - paused_at)
            .unwrap_or_default();
        self.job_time.eta.unwrap_or_else(|| self.calculate_eta()) + paused_for
    }

    pub fn calculate_color_change_total(&self) -> i64 {
        let paused_for = self
            .job_time
            .paused_at
            .map(|paused_at| (Utc::now() - paused_at).num_seconds())
            .unwrap_or(0);
        self.job_time.total_seconds + paused_for
    }

    pub async fn set_progress(&mut self, progress: f64) {
        if self.status != JobStatus::Printing {
            return;
        }
        self.progress = progress;
        self.sink
            .emit(Event::ProgressUpdate { job_id: self.id, progress })
            .await;
    }

    pub async fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.sink
            .emit(Event::JobStatusUpdate { job_id: self.id, status: status.as_str().to_string() })
            .await;
    }

    pub async fn set_file_pause(&mut self, file_pause: u8) {
        self.file_pause = file_pause;
        self.sink
            .emit(Event::FilePauseUpdate { job_id: self.id, file_pause })
            .await;
    }

    pub async fn set_extruded(&mut self, extruded: u8) {
        self.extruded = extruded;
        self.sink
            .emit(Event::ExtrudedUpdate { job_id: self.id, extruded })
            .await;
    }

    /// One-way latch: once released, a job stays released.
    pub async fn set_released(&mut self, released: u8) {
        self.released = released;
        self.sink.emit(Event::ReleaseJob { job_id: self.id }).await;
    }

    pub async fn set_time_started(&mut self, time_started: u8) {
        self.time_started = time_started;
        self.sink
            .emit(Event::SetTimeStarted { job_id: self.id, time_started })
            .await;
    }

    pub async fn set_max_layer_height(&mut self, height: f64) {
        self.max_layer_height = height;
        self.sink
            .emit(Event::MaxLayerHeight { job_id: self.id, max_layer_height: height })
            .await;
    }

    pub async fn set_current_layer_height(&mut self, height: f64) {
        self.current_layer_height = height;
        self.sink
            .emit(Event::CurrentLayerHeight { job_id: self.id, current_layer_height: height })
            .await;
    }

    /// Index 0 is the raw integer seconds total; indices 1-3 are ISO-8601
    /// timestamps for eta / started_at / paused_at respectively.
    pub async fn set_job_time(&mut self, index: usize, value: Option<DateTime<Utc>>, seconds: Option<i64>) {
        let payload = match index {
            0 => {
                let secs = seconds.unwrap_or(0);
                self.job_time.total_seconds = secs;
                serde_json::json!(secs)
            }
            1 => {
                self.job_time.eta = value;
                serde_json::json!(value.map(|v| v.to_rfc3339()))
            }
            2 => {
                self.job_time.started_at = value;
                serde_json::json!(value.map(|v| v.to_rfc3339()))
            }
            3 => {
                self.job_time.paused_at = value;
                serde_json::json!(value.map(|v| v.to_rfc3339()))
            }
            _ => return,
        };
        self.sink
            .emit(Event::SetTime { job_id: self.id, new_time: payload, index })
            .await;
    }

    /// Telemetry-only counter; no event, mirrored downstream by progress.
    pub fn set_sent_lines(&mut self, sent_lines: u64) {
        self.sent_lines = sent_lines;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "status": self.status.as_str(),
            "progress": self.progress,
            "printerid": self.printer_id,
            "errorid": self.error_id,
            "file_name_original": self.file_name_original,
            "favorite": self.favorite,
            "released": self.released,
            "file_pause": self.file_pause,
            "comments": self.comments,
            "extruded": self.extruded,
            "td_id": self.td_id,
            "time_started": self.time_started,
            "max_layer_height": self.max_layer_height,
            "current_layer_height": self.current_layer_height,
            "filament": self.filament,
            "date": self.created_at.format("%a, %d %b %Y %H:%M:%S").to_string(),
        })
    }
}

fn make_file_name_pk(original: &str, id: i64) -> String {
    match original.rsplit_once('.') {
        Some((base, ext)) => format!("{base}_{id}.{ext}"),
        None => format!("{original}_{id}"),
    }
}
