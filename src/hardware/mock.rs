//! Mock Hardware Implementations
//!
//! Provides a simulated motion link for testing without physical hardware.
//!
//! # Available Mocks
//!
//! - `MockLink` - Records every command and answers with scripted responses

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{HelioError, HelioResult};
use crate::hardware::capabilities::MotionLink;
use crate::hardware::grbl::OK_LINE;

/// Scripted reply for the next command.
#[derive(Debug)]
pub enum MockReply {
    /// Device answers `ok`.
    Ok,
    /// Device answers with an error line.
    DeviceError(String),
    /// Device stops answering.
    Timeout,
    /// Port fails.
    LinkFailure,
}

#[derive(Default)]
struct MockState {
    commands: Vec<Vec<u8>>,
    replies: VecDeque<MockReply>,
    status_queries: usize,
    closed: bool,
}

/// Mock motion link
///
/// Commands are recorded in order. Replies are taken from a script; once the
/// script is empty every command is acknowledged with `ok`.
///
/// # Example
///
/// ```rust,ignore
/// let link = MockLink::new();
/// link.push_reply(MockReply::DeviceError("error:2".into())).await;
/// assert!(link.send_command_get_response(b"G0 X0 Y0\n").await.is_err());
/// assert_eq!(link.commands().await.len(), 1);
/// ```
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
    status_line: Vec<u8>,
}

impl MockLink {
    /// Create a mock that acknowledges everything.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            status_line: b"<Idle|MPos:0.000,0.000,0.000|FS:0,0>\r\n".to_vec(),
        }
    }

    /// Queue a reply for a future command.
    pub async fn push_reply(&self, reply: MockReply) {
        self.state.lock().await.replies.push_back(reply);
    }

    /// Commands received so far.
    pub async fn commands(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.commands.clone()
    }

    /// Commands received so far, as text.
    pub async fn command_strings(&self) -> Vec<String> {
        self.commands()
            .await
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    /// Number of status queries answered.
    pub async fn status_queries(&self) -> usize {
        self.state.lock().await.status_queries
    }

    /// Whether `close` has been called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

fn closed_error() -> HelioError {
    HelioError::Link(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "mock link is closed",
    ))
}

#[async_trait]
impl MotionLink for MockLink {
    fn port_name(&self) -> &str {
        "mock"
    }

    async fn send_command_get_response(&self, command: &[u8]) -> HelioResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(closed_error());
        }
        state.commands.push(command.to_vec());

        match state.replies.pop_front().unwrap_or(MockReply::Ok) {
            MockReply::Ok => Ok(OK_LINE.to_vec()),
            MockReply::DeviceError(line) => Err(HelioError::DeviceError(line)),
            MockReply::Timeout => Err(HelioError::ReadTimeout),
            MockReply::LinkFailure => Err(HelioError::Link(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock port unplugged",
            ))),
        }
    }

    async fn get_status(&self) -> HelioResult<Vec<u8>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(closed_error());
        }
        state.status_queries += 1;
        Ok(self.status_line.clone())
    }

    async fn close(&self) -> HelioResult<()> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_and_replies() {
        let link = MockLink::new();
        link.push_reply(MockReply::DeviceError("error:22".into()))
            .await;

        assert!(matches!(
            link.send_command_get_response(b"G0 X1 Y1\n").await,
            Err(HelioError::DeviceError(_))
        ));
        assert_eq!(
            link.send_command_get_response(b"G0 X2 Y2\n").await.unwrap(),
            OK_LINE
        );
        assert_eq!(link.command_strings().await, vec!["G0 X1 Y1\n", "G0 X2 Y2\n"]);
    }

    #[tokio::test]
    async fn test_mock_close() {
        let link = MockLink::new();
        link.close().await.unwrap();
        assert!(link.is_closed().await);
        assert!(link.get_status().await.is_err());
    }
}
