//! Message Model
//!
//! One entry of a ticket timeline. Messages accepted by the server are
//! immutable; clients only ever append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    #[default]
    Agent,
    Bot,
    System,
}

/// Whether the customer can see a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageVisibility {
    #[default]
    Public,
    /// 内部备注，客户不可见
    Internal,
}

/// Attachment carried by a message
///
/// Serialized with a `kind` tag. Untagged payloads (`{url, file_type, ...}`)
/// are accepted as well and become [`Attachment::File`], or
/// [`Attachment::Link`] when no file type is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", from = "AttachmentRepr")]
pub enum Attachment {
    Link {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    File {
        url: String,
        file_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
}

impl Attachment {
    pub fn url(&self) -> &str {
        match self {
            Attachment::Link { url, .. } | Attachment::File { url, .. } => url,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            Attachment::Link { file_name, .. } | Attachment::File { file_name, .. } => {
                file_name.as_deref()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TaggedAttachment {
    Link {
        url: String,
        #[serde(default)]
        file_name: Option<String>,
    },
    File {
        url: String,
        file_type: String,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        size_bytes: Option<u64>,
    },
}

#[derive(Deserialize)]
struct UntaggedAttachment {
    url: String,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    size_bytes: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttachmentRepr {
    Tagged(TaggedAttachment),
    Untagged(UntaggedAttachment),
}

impl From<AttachmentRepr> for Attachment {
    fn from(repr: AttachmentRepr) -> Self {
        match repr {
            AttachmentRepr::Tagged(TaggedAttachment::Link { url, file_name }) => {
                Attachment::Link { url, file_name }
            }
            AttachmentRepr::Tagged(TaggedAttachment::File {
                url,
                file_type,
                file_name,
                size_bytes,
            }) => Attachment::File {
                url,
                file_type,
                file_name,
                size_bytes,
            },
            AttachmentRepr::Untagged(raw) => match raw.file_type {
                Some(file_type) => Attachment::File {
                    url: raw.url,
                    file_type,
                    file_name: raw.file_name,
                    size_bytes: raw.size_bytes,
                },
                None => Attachment::Link {
                    url: raw.url,
                    file_name: raw.file_name,
                },
            },
        }
    }
}

fn default_content_type() -> String {
    "text".to_string()
}

/// Timeline message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub sender_type: SenderType,
    pub content: String,
    /// "text" for conversation, "event_log" for system events
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub visibility: MessageVisibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Plain public text message.
    pub fn new(
        message_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        sender_type: SenderType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp,
            sender_type,
            content: content.into(),
            content_type: default_content_type(),
            visibility: MessageVisibility::Public,
            agent_id: None,
            attachments: Vec::new(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.visibility == MessageVisibility::Internal
    }
}
