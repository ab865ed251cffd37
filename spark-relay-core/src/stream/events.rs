//! Event types pushed to downstream sinks

use serde::{Deserialize, Serialize};

/// JSON body of `message` and `complete` events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub content: String,
    pub finished: bool,
}

/// An event delivered to a downstream subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A streamed fragment of the assistant reply
    Message { content: String },
    /// The reply finished normally
    Complete,
    /// The session ended with an error
    Error { message: String },
}

impl RelayEvent {
    pub fn message(content: impl Into<String>) -> Self {
        RelayEvent::Message {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayEvent::Error {
            message: message.into(),
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Message { .. } => "message",
            RelayEvent::Complete => "complete",
            RelayEvent::Error { .. } => "error",
        }
    }

    /// SSE data field. Content events carry JSON, errors carry the bare message.
    pub fn data(&self) -> String {
        match self {
            RelayEvent::Message { content } => content_json(content, false),
            RelayEvent::Complete => content_json("", true),
            RelayEvent::Error { message } => message.clone(),
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Message { .. })
    }
}

fn content_json(content: &str, finished: bool) -> String {
    serde_json::json!({ "content": content, "finished": finished }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_event_payload() {
        let event = RelayEvent::message("Hi");
        assert_eq!(event.name(), "message");
        assert!(!event.is_terminal());

        let payload: ContentPayload = serde_json::from_str(&event.data()).unwrap();
        assert_eq!(
            payload,
            ContentPayload {
                content: "Hi".to_string(),
                finished: false
            }
        );
    }

    #[test]
    fn test_complete_event_payload() {
        let payload: ContentPayload = serde_json::from_str(&RelayEvent::Complete.data()).unwrap();
        assert_eq!(payload.content, "");
        assert!(payload.finished);
        assert!(RelayEvent::Complete.is_terminal());
    }

    #[test]
    fn test_error_event_is_plain_text() {
        let event = RelayEvent::error("quota exceeded");
        assert_eq!(event.name(), "error");
        assert_eq!(event.data(), "quota exceeded");
        assert!(event.is_terminal());
    }
}
