//! Normalized chat events for Stashbot.
//!
//! Bot API messages are converted into [`InboundEvent`]s so the daemon only
//! deals with commands and attachments, never with raw wire structures.

use serde::{Deserialize, Serialize};

use crate::wire;

/// Chat identifier.
pub type ChatId = i64;

/// Message identifier inside a chat.
pub type MessageId = i64;

/// MIME type videos are expected to carry.
pub const EXPECTED_VIDEO_MIME: &str = "video/mp4";

/// Reference to remote file bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Identifier used to fetch the bytes.
    pub file_id: String,
    /// Stable identifier of the source object.
    pub unique_id: String,
    /// Size in bytes, if the sender reported it.
    pub size: Option<u64>,
}

/// An attachment pushed by the chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Attachment {
    /// Generic file with an optional sender-provided name.
    Document {
        file: FileRef,
        file_name: Option<String>,
        mime_type: Option<String>,
    },
    /// Photo; only the largest size variant is kept.
    Photo { file: FileRef },
    /// Video with the sender-reported MIME type.
    Video {
        file: FileRef,
        mime_type: Option<String>,
    },
}

impl Attachment {
    /// The remote file reference.
    pub fn file(&self) -> &FileRef {
        match self {
            Attachment::Document { file, .. }
            | Attachment::Photo { file }
            | Attachment::Video { file, .. } => file,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Attachment::Document { .. } => "document",
            Attachment::Photo { .. } => "photo",
            Attachment::Video { .. } => "video",
        }
    }

    /// Filename the sender suggests for this attachment.
    ///
    /// Documents return their original name, which may be empty. Photos and
    /// videos carry no name and are named after their unique id.
    pub fn suggested_name(&self) -> String {
        match self {
            Attachment::Document { file_name, .. } => file_name.clone().unwrap_or_default(),
            Attachment::Photo { file } => format!("{}.jpg", file.unique_id),
            Attachment::Video { file, .. } => format!("{}.mp4", file.unique_id),
        }
    }

    /// Returns the reported MIME type of a video that is not `video/mp4`.
    pub fn unexpected_video_mime(&self) -> Option<&str> {
        match self {
            Attachment::Video { mime_type, .. } => {
                let mime = mime_type.as_deref().unwrap_or("");
                (mime != EXPECTED_VIDEO_MIME).then_some(mime)
            }
            _ => None,
        }
    }
}

/// A bot command parsed from message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// `/help`
    Help,
    /// `/cd [-r] <path>` with its raw arguments.
    Cd(Vec<String>),
    /// `/pwd`
    Pwd,
    /// `/ls`
    Ls,
    /// `/stats`
    Stats,
    /// Any other `/name`.
    Unknown(String),
}

impl Command {
    /// Parse command text such as `/cd photos` or `/ls@stash_bot`.
    ///
    /// Returns `None` when the text is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        let args: Vec<String> = tokens.map(str::to_string).collect();

        Some(match name {
            "help" | "start" => Command::Help,
            "cd" => Command::Cd(args),
            "pwd" => Command::Pwd,
            "ls" => Command::Ls,
            "stats" => Command::Stats,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// What an inbound message asks the bot to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Command(Command),
    Attachment(Attachment),
    /// Anything the bot does not handle.
    Ignored,
}

/// An inbound chat message, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub kind: EventKind,
}

impl InboundEvent {
    /// Create an event from its parts.
    pub fn new(chat_id: ChatId, message_id: MessageId, kind: EventKind) -> Self {
        Self {
            chat_id,
            message_id,
            kind,
        }
    }

    /// Normalize a Bot API message.
    ///
    /// Attachments take precedence over text; a message with both a document
    /// and a caption is treated as a document.
    pub fn from_message(message: wire::Message) -> Self {
        let chat_id = message.chat.id;
        let message_id = message.message_id;

        let kind = if let Some(doc) = message.document {
            EventKind::Attachment(Attachment::Document {
                file: FileRef {
                    file_id: doc.file_id,
                    unique_id: doc.file_unique_id,
                    size: doc.file_size,
                },
                file_name: doc.file_name,
                mime_type: doc.mime_type,
            })
        } else if let Some(photo) = message.photo.and_then(largest_photo) {
            EventKind::Attachment(Attachment::Photo {
                file: FileRef {
                    file_id: photo.file_id,
                    unique_id: photo.file_unique_id,
                    size: photo.file_size,
                },
            })
        } else if let Some(video) = message.video {
            EventKind::Attachment(Attachment::Video {
                file: FileRef {
                    file_id: video.file_id,
                    unique_id: video.file_unique_id,
                    size: video.file_size,
                },
                mime_type: video.mime_type,
            })
        } else if let Some(command) = message.text.as_deref().and_then(Command::parse) {
            EventKind::Command(command)
        } else {
            EventKind::Ignored
        };

        Self::new(chat_id, message_id, kind)
    }
}

/// Pick the variant with the most pixels.
fn largest_photo(sizes: Vec<wire::PhotoSize>) -> Option<wire::PhotoSize> {
    sizes
        .into_iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

/// A message the bot sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    /// Message this one replies to.
    pub reply_to: Option<MessageId>,
    pub text: String,
}

impl OutboundMessage {
    /// A reply to the given inbound event.
    pub fn reply(event: &InboundEvent, text: impl Into<String>) -> Self {
        Self {
            chat_id: event.chat_id,
            reply_to: Some(event.message_id),
            text: text.into(),
        }
    }

    /// A plain message into a chat.
    pub fn to_chat(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            reply_to: None,
            text: text.into(),
        }
    }
}

impl From<OutboundMessage> for wire::SendMessage {
    fn from(msg: OutboundMessage) -> Self {
        wire::SendMessage {
            chat_id: msg.chat_id,
            text: msg.text,
            reply_parameters: msg.reply_to.map(|message_id| wire::ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
        }
    }
}
