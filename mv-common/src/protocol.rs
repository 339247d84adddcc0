//! Persistent channel wire format
//!
//! Every server frame is a JSON envelope `{"type": ..., "data": ..., "timestamp": ...}`.
//! Clients may send `{"type": "pong"}` in answer to a heartbeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::events::{Alert, CompletionSummary, FailureNotice, JobEvent, ProgressUpdate};
use crate::Result;

/// WebSocket close code for an intentional, orderly close
pub const NORMAL_CLOSURE: u16 = 1000;

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Connected,
    Progress,
    Alert,
    Completed,
    Error,
    Heartbeat,
}

/// Server-to-client envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ServerMessage {
    /// Acknowledgement sent once when a channel opens
    pub fn connected(job_id: Uuid) -> Self {
        Self {
            message_type: MessageType::Connected,
            data: json!({ "job_id": job_id }),
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            message_type: MessageType::Heartbeat,
            data: Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a job event in an envelope stamped with the current time
    pub fn from_event(event: &JobEvent) -> Result<Self> {
        let (message_type, data) = match event {
            JobEvent::Progress(update) => (MessageType::Progress, serde_json::to_value(update)?),
            JobEvent::Alert(alert) => (MessageType::Alert, serde_json::to_value(alert)?),
            JobEvent::Completed(summary) => {
                (MessageType::Completed, serde_json::to_value(summary)?)
            }
            JobEvent::Failed(notice) => (MessageType::Error, serde_json::to_value(notice)?),
            JobEvent::Heartbeat => (MessageType::Heartbeat, Value::Null),
        };

        Ok(Self {
            message_type,
            data,
            timestamp: Utc::now(),
        })
    }

    /// Decode the payload back into a job event
    ///
    /// Returns `None` for `connected`, which carries no job event.
    pub fn into_event(self) -> Result<Option<JobEvent>> {
        let event = match self.message_type {
            MessageType::Connected => return Ok(None),
            MessageType::Heartbeat => JobEvent::Heartbeat,
            MessageType::Progress => {
                JobEvent::Progress(serde_json::from_value::<ProgressUpdate>(self.data)?)
            }
            MessageType::Alert => JobEvent::Alert(serde_json::from_value::<Alert>(self.data)?),
            MessageType::Completed => {
                JobEvent::Completed(serde_json::from_value::<CompletionSummary>(self.data)?)
            }
            MessageType::Error => {
                JobEvent::Failed(serde_json::from_value::<FailureNotice>(self.data)?)
            }
        };
        Ok(Some(event))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client-to-server message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Pong,
    Ping,
}

/// How a channel ended, from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Server closed after the terminal event
    Normal,
    /// Anything else: network loss, server restart, protocol error
    Abnormal,
}

impl CloseKind {
    /// Classify a close frame code; a missing close frame is abnormal
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSURE) => CloseKind::Normal,
            _ => CloseKind::Abnormal,
        }
    }
}
