//! Serial port discovery and device-path repair when a printer reappears
//! on a different path after a disconnect/replug.
use crate::gcode_streamer::PrinterHandle;
use crate::serial_link::SerialLink;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
    pub hwid: String,
}

/// Abstracts over the OS port listing so `PortResolver` can be tested
/// without real hardware attached.
pub trait PortEnumerator: Send + Sync {
    fn enumerate(&self) -> Vec<PortInfo>;
}

pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn enumerate(&self) -> Vec<PortInfo> {
        serial2_tokio::SerialPort::available_ports()
            .map(|ports| {
                ports
                    .into_iter()
                    .map(|p| {
                        let device = p.to_string_lossy().to_string();
                        PortInfo { hwid: device.clone(), description: String::new(), device }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Strips the ` LOCATION=...` suffix some platforms append to a hwid.
fn strip_location_suffix(hwid: &str) -> String {
    hwid.split(" LOCATION=").next().unwrap_or(hwid).trim().to_string()
}

pub struct PortResolver {
    enumerator: Arc<dyn PortEnumerator>,
}

impl PortResolver {
    pub fn new(enumerator: Arc<dyn PortEnumerator>) -> Self {
        Self { enumerator }
    }

    pub fn enumerate_ports(&self) -> Vec<PortInfo> {
        self.enumerator
            .enumerate()
            .into_iter()
            .map(|mut p| {
                p.hwid = strip_location_suffix(&p.hwid);
                p
            })
            .collect()
    }

    /// Candidate new printers: description mentions "original" or "prusa",
    /// and the hwid isn't already claimed by a registered printer.
    pub fn filter_candidates(&self, registered_hwids: &[String]) -> Vec<PortInfo> {
        self.enumerate_ports()
            .into_iter()
            .filter(|p| {
                let desc = p.description.to_lowercase();
                (desc.contains("original") || desc.contains("prusa"))
                    && !registered_hwids.iter().any(|h| h == &p.hwid)
            })
            .collect()
    }

    pub fn diagnose(&self, device: &str, registered_hwids: &[String]) -> String {
        let ports = self.enumerate_ports();
        let Some(found) = ports.iter().find(|p| p.device == device) else {
            return format!("{device} is not currently present on the system");
        };
        if registered_hwids.iter().any(|h| h == &found.hwid) {
            format!("{device} is present and matches a registered printer")
        } else {
            format!("{device} is present but not registered to any printer")
        }
    }

    /// If this printer's hwid now shows up at a different device path,
    /// update the printer in place and emit `port_repair`.
    pub async fn repair_one(&self, printer: &PrinterHandle) {
        let (hwid, current_device) = {
            let p = printer.read().await;
            (p.hwid.clone(), p.device.clone())
        };
        for port in self.enumerate_ports() {
            if port.hwid == hwid && port.device != current_device {
                printer.write().await.set_device(port.device).await;
                return;
            }
        }
    }

    pub async fn repair_all(&self, printers: &[PrinterHandle]) -> usize {
        let mut repaired = 0;
        let ports = self.enumerate_ports();
        for printer in printers {
            let (hwid, current_device) = {
                let p = printer.read().await;
                (p.hwid.clone(), p.device.clone())
            };
            if let Some(port) = ports.iter().find(|p| p.hwid == hwid && p.device != current_device) {
                printer.write().await.set_device(port.device.clone()).await;
                repaired += 1;
            }
        }
        repaired
    }

    /// Briefly opens the port and homes the head; used by a manual "jog"
    /// action distinct from the main print flow.
    pub async fn move_head(&self, link: &mut dyn SerialLink, device: &str, baud: u32) -> Result<(), String> {
        link.open(device, baud).await.map_err(|e| e.to_string())?;
        link.write_line("G28").await.map_err(|e| e.to_string())?;
        let reply = link
            .read_line(Duration::from_secs(10))
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_default();
        let _ = link.close().await;
        if reply.to_lowercase().contains("error") {
            Err(reply)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BroadcastEventSink;
    use crate::model::Printer;
    use tokio::sync::RwLock;

    struct FakeEnumerator(Vec<PortInfo>);
    impl PortEnumerator for FakeEnumerator {
        fn enumerate(&self) -> Vec<PortInfo> {
            self.0.clone()
        }
    }

    #[test]
    fn strips_location_suffix() {
        assert_eq!(
            strip_location_suffix("USB VID:PID=2C99:0002 LOCATION=1-1.3"),
            "USB VID:PID=2C99:0002"
        );
    }

    #[tokio::test]
    async fn repair_one_updates_device_when_hwid_moves() {
        let enumerator = Arc::new(FakeEnumerator(vec![PortInfo {
            device: "/dev/ttyUSB1".into(),
            description: "Original Prusa i3 MK3".into(),
            hwid: "USB VID:PID=2C99:0002".into(),
        }]));
        let resolver = PortResolver::new(enumerator);
        let printer = Arc::new(RwLock::new(Printer::new(
            1,
            "USB VID:PID=2C99:0002".into(),
            "/dev/ttyUSB0".into(),
            "mk3".into(),
            "Original Prusa i3 MK3".into(),
            Arc::new(BroadcastEventSink::new(16)),
        )));

        resolver.repair_one(&printer).await;
        assert_eq!(printer.read().await.device, "/dev/ttyUSB1");
    }

    #[test]
    fn filter_candidates_excludes_already_registered_hwids() {
        let enumerator = Arc::new(FakeEnumerator(vec![
            PortInfo { device: "/dev/ttyUSB0".into(), description: "Original Prusa i3 MK3".into(), hwid: "A".into() },
            PortInfo { device: "/dev/ttyUSB1".into(), description: "Arduino Uno".into(), hwid: "B".into() },
        ]));
        let resolver = PortResolver::new(enumerator);
        let candidates = resolver.filter_candidates(&["A".to_string()]);
        assert!(candidates.is_empty());
    }
}
