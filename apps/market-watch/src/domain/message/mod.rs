//! Protocol Messages
//!
//! The message set exchanged between the server and its sessions.
//! Each variant carries a stable one-byte header used on the wire and a
//! short name used when a session reports the decoded message.
//!
//! | Variant | Header | Payload |
//! |---------|--------|---------|
//! | `Sync`  | `0x01` | list of symbol strings |
//! | `Error` | `0x02` | failure reason |

use serde::{Deserialize, Serialize};

/// Identifies a message variant independently of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full watch list push or update request.
    Sync,
    /// Point-to-point failure report.
    Error,
}

impl MessageKind {
    /// Wire header tag for this variant.
    #[must_use]
    pub const fn header(self) -> u8 {
        match self {
            Self::Sync => SyncMessage::HEADER,
            Self::Error => ErrorMessage::HEADER,
        }
    }

    /// Resolve a wire header tag.
    #[must_use]
    pub const fn from_header(header: u8) -> Option<Self> {
        match header {
            SyncMessage::HEADER => Some(Self::Sync),
            ErrorMessage::HEADER => Some(Self::Error),
            _ => None,
        }
    }

    /// Event name for this variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => SyncMessage::NAME,
            Self::Error => ErrorMessage::NAME,
        }
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Carries the full watch list (server to client) or a requested list
    /// (client to server).
    Sync(SyncMessage),
    /// Carries a failure reason.
    Error(ErrorMessage),
}

impl Message {
    /// The variant of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Sync(_) => MessageKind::Sync,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Wire header tag of this message.
    #[must_use]
    pub const fn header(&self) -> u8 {
        self.kind().header()
    }
}

/// Watch list payload.
///
/// Symbols travel as raw strings; normalization happens when the store
/// applies them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncMessage {
    /// Symbols in watch list order.
    pub symbols: Vec<String>,
}

impl SyncMessage {
    /// Wire header tag.
    pub const HEADER: u8 = 0x01;
    /// Event name.
    pub const NAME: &'static str = "sync";

    /// Create a sync message from anything that yields ticker strings.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Dispatch predicate: any sync message.
    ///
    /// Entries are not inspected here. Blank or unknown symbols are rejected
    /// by the watch list rules so the sender gets an error back.
    #[must_use]
    pub fn validate(message: &Message) -> bool {
        matches!(message, Message::Sync(_))
    }
}

/// Failure payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorMessage {
    /// Human-readable failure reason.
    pub reason: String,
}

impl ErrorMessage {
    /// Wire header tag.
    pub const HEADER: u8 = 0x02;
    /// Event name.
    pub const NAME: &'static str = "error";

    /// Create an error message.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Dispatch predicate: an error message with a non-empty reason.
    #[must_use]
    pub fn validate(message: &Message) -> bool {
        matches!(message, Message::Error(error) if !error.reason.is_empty())
    }
}

impl From<SyncMessage> for Message {
    fn from(message: SyncMessage) -> Self {
        Self::Sync(message)
    }
}

impl From<ErrorMessage> for Message {
    fn from(message: ErrorMessage) -> Self {
        Self::Error(message)
    }
}
