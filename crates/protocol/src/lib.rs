//! # Stashbot Protocol Library
//!
//! This crate provides the chat-facing message model for Stashbot.
//!
//! ## Overview
//!
//! - **Wire Types**: Telegram Bot API structures (`Update`, `Message`,
//!   `Document`, `File`, ...) as serde types
//! - **Events**: [`InboundEvent`] normalizes a message into a [`Command`] or
//!   an [`Attachment`]
//! - **Replies**: [`OutboundMessage`] is what the daemon sends back
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Command, EventKind, InboundEvent};
//! use protocol::wire::{Chat, Message};
//!
//! let message = Message {
//!     message_id: 1,
//!     chat: Chat { id: 42 },
//!     text: Some("/cd photos".to_string()),
//!     document: None,
//!     photo: None,
//!     video: None,
//! };
//!
//! let event = InboundEvent::from_message(message);
//! assert_eq!(
//!     event.kind,
//!     EventKind::Command(Command::Cd(vec!["photos".to_string()]))
//! );
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Normalized events and replies
//! - [`wire`]: Bot API wire types
//! - [`error`]: Error types

pub mod error;
pub mod messages;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use messages::{
    Attachment, ChatId, Command, EventKind, FileRef, InboundEvent, MessageId, OutboundMessage,
    EXPECTED_VIDEO_MIME,
};
