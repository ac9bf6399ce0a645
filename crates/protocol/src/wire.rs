//! Telegram Bot API wire types.
//!
//! Only the fields Stashbot reads are modelled. Unknown fields are ignored
//! by serde, so newer API revisions keep deserializing.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Envelope returned by every Bot API method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub ok: bool,
    /// The method result when `ok` is true.
    pub result: Option<T>,
    /// Error description when `ok` is false.
    pub description: Option<String>,
    /// Error code when `ok` is false.
    pub error_code: Option<i32>,
}

impl<T> ApiResponse<T> {
    /// Convert the envelope into the method result or a protocol error.
    pub fn into_result(self) -> Result<T> {
        if !self.ok {
            return Err(ProtocolError::Api {
                code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        self.result.ok_or(ProtocolError::MissingResult)
    }
}

/// An incoming update from `getUpdates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic update identifier, used as the polling offset.
    pub update_id: i64,
    /// New incoming message, if this update carries one.
    pub message: Option<Message>,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier inside the chat.
    pub message_id: i64,
    /// Chat the message belongs to.
    pub chat: Chat,
    /// Text for plain text messages.
    pub text: Option<String>,
    /// General file attachment.
    pub document: Option<Document>,
    /// Available sizes of an attached photo.
    pub photo: Option<Vec<PhotoSize>>,
    /// Attached video.
    pub video: Option<Video>,
}

/// Chat reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Unique chat identifier.
    pub id: i64,
}

/// A general file attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier used to download the file.
    pub file_id: String,
    /// Identifier that is stable over time and across bots.
    pub file_unique_id: String,
    /// Original filename as defined by the sender.
    pub file_name: Option<String>,
    /// MIME type as defined by the sender.
    pub mime_type: Option<String>,
    /// File size in bytes.
    pub file_size: Option<u64>,
}

/// One size variant of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// A video attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub file_unique_id: String,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

/// Result of `getFile`: where the bytes can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub file_id: String,
    pub file_unique_id: String,
    pub file_size: Option<u64>,
    /// Relative path for `https://api.telegram.org/file/bot<token>/<file_path>`.
    pub file_path: Option<String>,
}

/// Parameters of `sendMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_parameters: Option<ReplyParameters>,
}

/// Reply target of `sendMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyParameters {
    pub message_id: i64,
    /// Send the message even if the replied-to message is gone.
    pub allow_sending_without_reply: bool,
}

/// Parameters of `getUpdates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUpdates {
    pub offset: i64,
    /// Long polling timeout in seconds.
    pub timeout: u64,
    pub allowed_updates: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_ok() {
        let json = r#"{"ok":true,"result":{"file_id":"a","file_unique_id":"b","file_path":"documents/file_1.pdf"}}"#;
        let resp: ApiResponse<File> = serde_json::from_str(json).unwrap();
        let file = resp.into_result().unwrap();
        assert_eq!(file.file_path.as_deref(), Some("documents/file_1.pdf"));
        assert_eq!(file.file_size, None);
    }

    #[test]
    fn test_api_response_error() {
        let json = r#"{"ok":false,"error_code":409,"description":"Conflict: terminated by other getUpdates request"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        match resp.into_result() {
            Err(ProtocolError::Api { code, description }) => {
                assert_eq!(code, Some(409));
                assert!(description.starts_with("Conflict"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_api_response_missing_result() {
        let json = r#"{"ok":true}"#;
        let resp: ApiResponse<File> = serde_json::from_str(json).unwrap();
        assert!(matches!(resp.into_result(), Err(ProtocolError::MissingResult)));
    }

    #[test]
    fn test_update_with_unknown_fields() {
        let json = r#"{
            "update_id": 10,
            "message": {
                "message_id": 7,
                "date": 1700000000,
                "from": {"id": 42, "is_bot": false, "first_name": "x"},
                "chat": {"id": -100123, "type": "supergroup"},
                "text": "/pwd"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, -100123);
        assert_eq!(message.text.as_deref(), Some("/pwd"));
        assert!(message.document.is_none());
    }

    #[test]
    fn test_send_message_skips_empty_reply() {
        let params = SendMessage {
            chat_id: 1,
            text: "done!".to_string(),
            reply_parameters: None,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(!json.contains("reply_parameters"));
    }
}
