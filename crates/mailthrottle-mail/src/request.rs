//! Typed remote API requests.

use mailthrottle_core::QuotaUnit;
use mailthrottle_core::cache::MessageView;
use serde::{Deserialize, Serialize};

/// Label the remote API uses to mark unread messages.
pub const LABEL_UNREAD: &str = "UNREAD";

/// Label the remote API uses for the inbox.
pub const LABEL_INBOX: &str = "INBOX";

/// Response format for message and thread reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Ids and labels only.
    Minimal,
    /// Complete parsed message.
    Full,
    /// Raw RFC 822 source.
    Raw,
    /// Headers and labels.
    #[default]
    Metadata,
}

impl MessageFormat {
    /// Returns the wire name of the format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Full => "full",
            Self::Raw => "raw",
            Self::Metadata => "metadata",
        }
    }

    /// Returns the cache view a read in this format may be served from.
    ///
    /// `None` for formats the cache never holds.
    #[must_use]
    pub const fn cache_view(self) -> Option<MessageView> {
        match self {
            Self::Full => Some(MessageView::Full),
            Self::Metadata => Some(MessageView::Metadata),
            Self::Minimal | Self::Raw => None,
        }
    }
}

/// A single call against the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum ApiRequest {
    /// `messages.get`
    GetMessage {
        /// Message id.
        id: String,
        /// Response format.
        format: MessageFormat,
    },
    /// `threads.get`
    GetThread {
        /// Thread id.
        id: String,
        /// Response format.
        format: MessageFormat,
    },
    /// `messages.trash`
    TrashMessage {
        /// Message id.
        id: String,
    },
    /// `messages.delete`
    DeleteMessage {
        /// Message id.
        id: String,
    },
    /// `messages.batchModify`
    #[serde(rename_all = "camelCase")]
    BatchModify {
        /// Messages to modify.
        ids: Vec<String>,
        /// Labels to add.
        add_label_ids: Vec<String>,
        /// Labels to remove.
        remove_label_ids: Vec<String>,
    },
}

impl ApiRequest {
    /// Returns the API method this request invokes.
    #[must_use]
    pub const fn quota_unit(&self) -> QuotaUnit {
        match self {
            Self::GetMessage { .. } => QuotaUnit::MessagesGet,
            Self::GetThread { .. } => QuotaUnit::ThreadsGet,
            Self::TrashMessage { .. } => QuotaUnit::MessagesTrash,
            Self::DeleteMessage { .. } => QuotaUnit::MessagesDelete,
            Self::BatchModify { .. } => QuotaUnit::MessagesBatchModify,
        }
    }

    /// Returns the quota cost of this request.
    #[must_use]
    pub const fn units(&self) -> u32 {
        self.quota_unit().units()
    }
}
