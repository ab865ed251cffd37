//! Upstream wire format (JSON over WebSocket)

use serde::{Deserialize, Serialize};
use spark_relay_core::config::SparkConfig;
use spark_relay_core::Role;

use crate::error::{RelayError, RelayResult};

/// `header.status` value of the last frame of a reply
pub const STATUS_LAST: i32 = 2;

/// Chat parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub app_id: String,
    pub domain: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub auditing: String,
}

impl ChatSettings {
    pub fn from_config(config: &SparkConfig) -> Self {
        Self {
            app_id: config.app_id.clone(),
            domain: config.domain.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            auditing: config.auditing.clone(),
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from_config(&SparkConfig::default())
    }
}

/// Initial frame sent once the upstream socket opens
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame {
    pub header: RequestHeader,
    pub parameter: Parameter,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestHeader {
    pub app_id: String,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub chat: ChatParameter,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatParameter {
    pub domain: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub auditing: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPayload {
    pub message: RequestMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMessage {
    pub text: Vec<TextMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub role: Role,
    pub content: String,
}

impl RequestFrame {
    /// Build the request: earlier user questions as context, then the current one.
    pub fn new(settings: &ChatSettings, uid: &str, prior_questions: &[String], question: &str) -> Self {
        let text = prior_questions
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(question))
            .map(|content| TextMessage {
                role: Role::User,
                content: content.to_string(),
            })
            .collect();

        Self {
            header: RequestHeader {
                app_id: settings.app_id.clone(),
                uid: uid.to_string(),
            },
            parameter: Parameter {
                chat: ChatParameter {
                    domain: settings.domain.clone(),
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                    auditing: settings.auditing.clone(),
                },
            },
            payload: RequestPayload {
                message: RequestMessage { text },
            },
        }
    }
}

/// One inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub header: ResponseHeader,
    #[serde(default)]
    pub payload: Option<ResponsePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseHeader {
    pub code: i32,
    pub message: String,
    pub sid: String,
    pub status: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponsePayload {
    pub choices: Option<Choices>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Choices {
    pub status: i32,
    pub seq: i32,
    pub text: Vec<TextChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextChunk {
    pub role: Option<String>,
    pub content: Option<String>,
    pub index: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub text: Option<TokenUsage>,
}

/// Token accounting reported with the last frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub question_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ResponseFrame {
    pub fn decode(text: &str) -> RelayResult<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::Decode(e.to_string()))
    }

    pub fn is_error(&self) -> bool {
        self.header.code != 0
    }

    pub fn is_last(&self) -> bool {
        self.header.status == STATUS_LAST
    }

    /// Text fragments carried by this frame, in order
    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.payload
            .iter()
            .filter_map(|payload| payload.choices.as_ref())
            .flat_map(|choices| choices.text.iter())
            .filter_map(|chunk| chunk.content.as_deref())
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.usage.as_ref())
            .and_then(|usage| usage.text)
    }

    /// Protocol error carried in the header, if any
    pub fn error(&self) -> Option<RelayError> {
        self.is_error().then(|| RelayError::UpstreamProtocol {
            code: self.header.code,
            message: self.header.message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_shape() {
        let settings = ChatSettings {
            app_id: "app".to_string(),
            ..ChatSettings::default()
        };
        let prior = vec!["first".to_string()];
        let frame = RequestFrame::new(&settings, "abcdef1234", &prior, "second");

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "header": {"app_id": "app", "uid": "abcdef1234"},
                "parameter": {"chat": {
                    "domain": "generalv3.5",
                    "temperature": 0.5,
                    "max_tokens": 8192,
                    "auditing": "default"
                }},
                "payload": {"message": {"text": [
                    {"role": "user", "content": "first"},
                    {"role": "user", "content": "second"}
                ]}}
            })
        );
    }

    #[test]
    fn test_decode_streaming_frame() {
        let frame = ResponseFrame::decode(
            &json!({
                "header": {"code": 0, "message": "Success", "sid": "cht0001", "status": 1},
                "payload": {"choices": {"status": 1, "seq": 3, "text": [
                    {"role": "assistant", "content": "Hi", "index": 0}
                ]}}
            })
            .to_string(),
        )
        .unwrap();

        assert!(!frame.is_error());
        assert!(!frame.is_last());
        assert_eq!(frame.chunks().collect::<Vec<_>>(), vec!["Hi"]);
        assert!(frame.usage().is_none());
    }

    #[test]
    fn test_decode_last_frame_with_usage() {
        let frame = ResponseFrame::decode(
            &json!({
                "header": {"code": 0, "message": "Success", "sid": "cht0001", "status": 2},
                "payload": {
                    "choices": {"status": 2, "seq": 4, "text": [{"role": "assistant", "content": "", "index": 0}]},
                    "usage": {"text": {"question_tokens": 4, "prompt_tokens": 5, "completion_tokens": 9, "total_tokens": 14}}
                }
            })
            .to_string(),
        )
        .unwrap();

        assert!(frame.is_last());
        assert_eq!(frame.usage().unwrap().total_tokens, 14);
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = ResponseFrame::decode(
            r#"{"header":{"code":11200,"message":"quota exceeded","sid":"x","status":2}}"#,
        )
        .unwrap();

        let err = frame.error().unwrap();
        assert_eq!(err.to_string(), "API error: code=11200, message=quota exceeded");
        assert_eq!(frame.chunks().count(), 0);
    }

    #[test]
    fn test_decode_rejects_malformed_or_headerless_frames() {
        assert!(matches!(
            ResponseFrame::decode("not json"),
            Err(RelayError::Decode(_))
        ));
        assert!(matches!(
            ResponseFrame::decode(r#"{"payload":{}}"#),
            Err(RelayError::Decode(_))
        ));
    }
}
