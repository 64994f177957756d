//! Printer identity and runtime state, as seen by its worker and the UI.
use crate::event::{Event, EventSink};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterStatus {
    Configuring,
    Ready,
    Offline,
    Printing,
    Paused,
    ColorChange,
    Complete,
    Error,
}

impl PrinterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterStatus::Configuring => "configuring",
            PrinterStatus::Ready => "ready",
            PrinterStatus::Offline => "offline",
            PrinterStatus::Printing => "printing",
            PrinterStatus::Paused => "paused",
            PrinterStatus::ColorChange => "colorchange",
            PrinterStatus::Complete => "complete",
            PrinterStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Printer {
    pub id: i64,
    pub hwid: String,
    pub device: String,
    pub name: String,
    pub description: String,

    pub status: PrinterStatus,
    pub error: String,
    pub extruder_temp: f64,
    pub bed_temp: f64,
    pub can_pause: bool,
    pub color_buff: u8,
    /// Last command sent down the wire; the streamer checks this for the
    /// single-shot "M602" no-response exemption.
    pub prev_mes: String,
    pub response_count: u32,
    /// Set by a hard reset; in-flight loops observe this and return
    /// without emitting a verdict.
    pub terminated: bool,
    /// Whether a serial connection is currently open.
    pub connected: bool,

    sink: Arc<dyn EventSink>,
}

impl Printer {
    pub fn new(
        id: i64,
        hwid: String,
        device: String,
        name: String,
        description: String,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            hwid,
            device,
            name,
            description,
            status: PrinterStatus::Configuring,
            error: String::new(),
            extruder_temp: 0.0,
            bed_temp: 0.0,
            can_pause: false,
            color_buff: 0,
            prev_mes: String::new(),
            response_count: 0,
            terminated: false,
            connected: false,
            sink,
        }
    }

    /// Sets status, coercing `Ready` down to `Offline` when no serial link
    /// is open. Returns true when the transition leaves `Error`, which the
    /// registry treats as a request to hard-reset this printer's worker.
    pub async fn set_status(&mut self, status: PrinterStatus) -> bool {
        let leaving_error = self.status == PrinterStatus::Error && status != PrinterStatus::Error;
        let status = if status == PrinterStatus::Ready && !self.connected {
            PrinterStatus::Offline
        } else {
            status
        };
        self.status = status;
        self.sink
            .emit(Event::StatusUpdate { printer_id: self.id, status: status.as_str().to_string() })
            .await;
        leaving_error
    }

    pub async fn set_error(&mut self, error: impl Into<String>) {
        self.error = error.into();
        self.sink
            .emit(Event::ErrorUpdate { printer_id: self.id, error: self.error.clone() })
            .await;
        self.status = PrinterStatus::Error;
        self.sink
            .emit(Event::StatusUpdate { printer_id: self.id, status: PrinterStatus::Error.as_str().to_string() })
            .await;
    }

    pub async fn set_temps(&mut self, extruder_temp: f64, bed_temp: f64) {
        self.extruder_temp = extruder_temp;
        self.bed_temp = bed_temp;
        self.sink
            .emit(Event::TempUpdate { printer_id: self.id, extruder_temp, bed_temp })
            .await;
    }

    pub async fn set_can_pause(&mut self, can_pause: bool) {
        self.can_pause = can_pause;
        self.sink
            .emit(Event::CanPause { printer_id: self.id, can_pause })
            .await;
    }

    pub async fn set_color_buff(&mut self, color_buff: u8) {
        self.color_buff = color_buff;
        self.sink
            .emit(Event::ColorBuff { printer_id: self.id, color_buff })
            .await;
    }

    pub async fn set_device(&mut self, device: impl Into<String>) {
        self.device = device.into();
        self.sink
            .emit(Event::PortRepair { printer_id: self.id, device: self.device.clone() })
            .await;
    }

    pub fn edit_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "device": self.device,
            "description": self.description,
            "hwid": self.hwid,
            "name": self.name,
            "status": self.status.as_str(),
            "error": self.error,
            "canPause": self.can_pause,
            "colorChangeBuffer": self.color_buff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BroadcastEventSink;

    fn printer() -> Printer {
        Printer::new(
            1,
            "USB VID:PID=2C99:0002".into(),
            "/dev/ttyUSB0".into(),
            "mk3".into(),
            "Original Prusa i3 MK3".into(),
            Arc::new(BroadcastEventSink::new(16)),
        )
    }

    #[tokio::test]
    async fn ready_coerces_to_offline_without_connection() {
        let mut p = printer();
        p.set_status(PrinterStatus::Ready).await;
        assert_eq!(p.status, PrinterStatus::Offline);
        p.connected = true;
        p.set_status(PrinterStatus::Ready).await;
        assert_eq!(p.status, PrinterStatus::Ready);
    }

    #[tokio::test]
    async fn leaving_error_is_flagged_for_hard_reset() {
        let mut p = printer();
        p.connected = true;
        p.set_error("no response").await;
        let leaving = p.set_status(PrinterStatus::Ready).await;
        assert!(leaving);
    }
}
