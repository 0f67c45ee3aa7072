// src/model/message.rs
//! Stream messages
//!
//! Agents produce `message` and `interrupt` messages; the engine adds
//! `control` messages (`done`, `timeout`) to delimit a run's stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    Interrupt,
    Control,
}

/// Engine-generated control payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Last message of a finished run
    Done,
    /// Synthesised by `join` when no message arrived within the per-item timeout
    Timeout,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSignal::Done => "done",
            ControlSignal::Timeout => "timeout",
        }
    }
}

/// The unit an agent produces and the stream manager fans out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,

    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Resolved interrupt type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_name: Option<String>,
}

impl Message {
    pub fn message(data: Value) -> Self {
        Self {
            kind: MessageType::Message,
            data,
            event: None,
            interrupt_name: None,
        }
    }

    pub fn interrupt(data: Value) -> Self {
        Self {
            kind: MessageType::Interrupt,
            data,
            event: None,
            interrupt_name: None,
        }
    }

    pub fn control(signal: ControlSignal) -> Self {
        Self {
            kind: MessageType::Control,
            data: Value::String(signal.as_str().to_string()),
            event: None,
            interrupt_name: None,
        }
    }

    /// Error text published when an attempt fails
    pub fn error_text(text: impl Into<String>) -> Self {
        Self::message(Value::String(text.into()))
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_interrupt_name(mut self, name: impl Into<String>) -> Self {
        self.interrupt_name = Some(name.into());
        self
    }

    pub fn is_interrupt(&self) -> bool {
        self.kind == MessageType::Interrupt
    }

    pub fn is_control(&self) -> bool {
        self.kind == MessageType::Control
    }

    /// Control payload, if this is a control message
    pub fn control_data(&self) -> Option<&str> {
        if self.is_control() {
            self.data.as_str()
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.control_data() == Some(ControlSignal::Done.as_str())
    }

    pub fn is_timeout(&self) -> bool {
        self.control_data() == Some(ControlSignal::Timeout.as_str())
    }
}
