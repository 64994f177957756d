//! Serial transport: a thin newline-delimited line protocol over a real
//! port, plus a scripted in-memory stand-in for tests.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("port not open")]
    NotOpen,
    #[error("failed to open {device}: {source}")]
    Open { device: String, #[source] source: std::io::Error },
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// Contract the G-code streamer and port resolver depend on. `read_line`
/// returns `Ok(None)` on a bare timeout with no data -- the caller treats
/// that the same way the original treated an empty reply string.
#[async_trait]
pub trait SerialLink: Send + Sync {
    async fn open(&mut self, device: &str, baud: u32) -> Result<(), SerialError>;
    async fn write_line(&mut self, line: &str) -> Result<(), SerialError>;
    async fn read_line(&mut self, read_timeout: Duration) -> Result<Option<String>, SerialError>;
    async fn close(&mut self) -> Result<(), SerialError>;
    fn is_open(&self) -> bool;
}

pub struct Serial2TokioLink {
    port: Option<serial2_tokio::SerialPort>,
    buffer: Vec<u8>,
}

impl Serial2TokioLink {
    pub fn new() -> Self {
        Self { port: None, buffer: Vec::new() }
    }
}

impl Default for Serial2TokioLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SerialLink for Serial2TokioLink {
    async fn open(&mut self, device: &str, baud: u32) -> Result<(), SerialError> {
        let port = serial2_tokio::SerialPort::open(device, baud)
            .map_err(|source| SerialError::Open { device: device.to_string(), source })?;
        self.port = Some(port);
        self.buffer.clear();
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        let port = self.port.as_ref().ok_or(SerialError::NotOpen)?;
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        port.write(&bytes).await.map_err(SerialError::Write)?;
        Ok(())
    }

    async fn read_line(&mut self, read_timeout: Duration) -> Result<Option<String>, SerialError> {
        let port = self.port.as_ref().ok_or(SerialError::NotOpen)?;

        if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            return Ok(Some(String::from_utf8_lossy(&line[..line.len() - 1]).trim().to_string()));
        }

        let mut chunk = [0u8; 256];
        match timeout(read_timeout, port.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => {
                self.buffer.extend_from_slice(&chunk[..n]);
                if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                    let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
                    Ok(Some(String::from_utf8_lossy(&line[..line.len() - 1]).trim().to_string()))
                } else {
                    Ok(Some(String::new()))
                }
            }
            Ok(Ok(_)) => Ok(None),
            Ok(Err(e)) => Err(SerialError::Read(e)),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), SerialError> {
        self.port = None;
        self.buffer.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

/// A scripted link for exercising the streamer without real hardware.
/// Replies are consumed in order; once exhausted, reads return empty
/// strings (mimicking a silent/unresponsive printer) until primed again.
pub struct MockSerialLink {
    pub sent: Vec<String>,
    replies: VecDeque<String>,
    open: bool,
}

impl MockSerialLink {
    pub fn new(scripted_replies: Vec<&str>) -> Self {
        Self {
            sent: Vec::new(),
            replies: scripted_replies.into_iter().map(String::from).collect(),
            open: false,
        }
    }

    pub fn push_reply(&mut self, reply: impl Into<String>) {
        self.replies.push_back(reply.into());
    }
}

#[async_trait]
impl SerialLink for MockSerialLink {
    async fn open(&mut self, _device: &str, _baud: u32) -> Result<(), SerialError> {
        self.open = true;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SerialError> {
        if !self.open {
            return Err(SerialError::NotOpen);
        }
        self.sent.push(line.to_string());
        Ok(())
    }

    async fn read_line(&mut self, _read_timeout: Duration) -> Result<Option<String>, SerialError> {
        if !self.open {
            return Err(SerialError::NotOpen);
        }
        Ok(Some(self.replies.pop_front().unwrap_or_default()))
    }

    async fn close(&mut self) -> Result<(), SerialError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_link_replays_scripted_responses_in_order() {
        let mut link = MockSerialLink::new(vec!["ok", "ok T:200.0 B:60.0"]);
        link.open("/dev/null", 115200).await.unwrap();
        link.write_line("G28").await.unwrap();
        assert_eq!(link.read_line(Duration::from_millis(10)).await.unwrap().as_deref(), Some("ok"));
        assert_eq!(
            link.read_line(Duration::from_millis(10)).await.unwrap().as_deref(),
            Some("ok T:200.0 B:60.0")
        );
        assert_eq!(link.sent, vec!["G28".to_string()]);
    }

    #[tokio::test]
    async fn mock_link_errors_when_not_open() {
        let mut link = MockSerialLink::new(vec![]);
        assert!(link.write_line("G28").await.is_err());
    }
}
