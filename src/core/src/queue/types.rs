use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::PipelineError;

/// Body of a queued prediction request.
///
/// `chat_id` is opaque to this service and echoed back in the callback, so it
/// keeps whatever JSON type the producer used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub s3_key: String,
    pub chat_id: serde_json::Value,
    pub file_path: String,
}

impl QueueMessage {
    pub fn parse(body: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(body).map_err(|e| PipelineError::MalformedMessage(e.to_string()))
    }
}

/// A message as handed out by the queue, before it is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub receipt_handle: String,
    pub body: String,
}

/// Sent to the callback service once a prediction is stored and published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub uid: String,
    pub chat_id: serde_json::Value,
    pub file_path: String,
    pub image_url: String,
}

/// At-least-once message source. A message that is not deleted comes back
/// after its visibility timeout.
pub trait MessageQueue: Send + Sync {
    /// Long-polls for up to `max_messages`, waiting at most `wait`.
    fn receive(&self, max_messages: usize, wait: Duration)
        -> Result<Vec<ReceivedMessage>, PipelineError>;

    fn delete(&self, receipt_handle: &str) -> Result<(), PipelineError>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, payload: &CallbackPayload) -> Result<(), PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let msg = QueueMessage::parse(
            r#"{"s3_key":"in/cat.jpg","chat_id":12345,"file_path":"photos/file_7.jpg"}"#,
        )
        .unwrap();
        assert_eq!(msg.s3_key, "in/cat.jpg");
        assert_eq!(msg.chat_id, serde_json::json!(12345));
    }

    #[test]
    fn test_parse_message_missing_field() {
        assert!(matches!(
            QueueMessage::parse(r#"{"s3_key":"in/cat.jpg"}"#),
            Err(PipelineError::MalformedMessage(_))
        ));
        assert!(QueueMessage::parse("not json").is_err());
    }

    #[test]
    fn test_callback_shape() {
        let payload = CallbackPayload {
            uid: "u1".into(),
            chat_id: serde_json::json!("chat"),
            file_path: "f.jpg".into(),
            image_url: "yolo_to_poly_images/cat.jpg".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "uid": "u1",
                "chat_id": "chat",
                "file_path": "f.jpg",
                "image_url": "yolo_to_poly_images/cat.jpg"
            })
        );
    }
}
