//! Conversation history persistence.
//!
//! The history file is a single JSON object mapping a conversation
//! identifier to its messages, oldest first:
//!
//! ```json
//! {
//!     "web_user_1": [
//!         { "role": "user", "parts": [{ "text": "hello" }] },
//!         { "role": "model", "parts": [{ "text": "hi there" }] }
//!     ]
//! }
//! ```
//!
//! Older files stored a bare `text` field instead of `parts`; those records
//! are migrated on load. Non-text parts (tool calls, inline data) are
//! dropped on load since the relay only carries text.

use crate::session::SessionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================================
// Canonical types
// ============================================================================

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// A text fragment of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    /// Create a single-part message.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// All text parts joined together.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}

/// Conversation identifier → messages. Sorted so the file layout is stable.
pub type Conversations = BTreeMap<String, Vec<Message>>;

// ============================================================================
// Stored shapes
// ============================================================================

/// A message as found on disk, before normalization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredMessage {
    /// `{role, parts: [...]}`; wins when both `parts` and `text` are present.
    Current {
        role: Role,
        parts: Vec<StoredPart>,
    },
    /// `{role, text}` written by earlier versions.
    Legacy { role: Role, text: String },
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredPart {
    Text { text: String },
    Other(serde_json::Value),
}

impl StoredMessage {
    fn normalize(self) -> Option<Message> {
        match self {
            Self::Current { role, parts } => Some(Message {
                role,
                parts: parts
                    .into_iter()
                    .filter_map(|part| match part {
                        StoredPart::Text { text } => Some(Part { text }),
                        StoredPart::Other(_) => None,
                    })
                    .collect(),
            }),
            Self::Legacy { role, text } => Some(Message::new(role, text)),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Parse and normalize history file content.
///
/// Unrecognized message records are skipped; a document that is not a
/// mapping of identifier to message list is an error.
pub fn parse_conversations(content: &str) -> Result<Conversations, serde_json::Error> {
    let raw: BTreeMap<String, Vec<StoredMessage>> = serde_json::from_str(content)?;

    Ok(raw
        .into_iter()
        .map(|(id, records)| {
            let total = records.len();
            let messages: Vec<Message> = records
                .into_iter()
                .filter_map(StoredMessage::normalize)
                .collect();
            if messages.len() < total {
                tracing::warn!(
                    conversation = %id,
                    skipped = total - messages.len(),
                    "Skipped unrecognized history records"
                );
            }
            (id, messages)
        })
        .collect())
}

/// Render conversations the way they are stored: 4-space indent, raw UTF-8.
pub fn render_conversations(conversations: &Conversations) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    conversations.serialize(&mut serializer)?;
    Ok(buf)
}

// ============================================================================
// Store
// ============================================================================

/// History persistence errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History file location does not exist: {}", path.display())]
    FileMissing { path: PathBuf },

    #[error("Failed to write history file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HistoryError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            Self::FileMissing {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Flat-file store for all conversations.
///
/// Every save rewrites the whole file. Writes go to a sibling `.tmp` file
/// first and are renamed into place; the internal lock keeps two saves from
/// sharing that temporary file. Concurrent saves still race on content:
/// the last one to rename wins.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    preserve_untouched: bool,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    /// Create a store for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            preserve_untouched: false,
            write_lock: Mutex::new(()),
        }
    }

    /// Keep load-time conversations without a live session on save.
    pub fn with_preserve_untouched(mut self, preserve: bool) -> Self {
        self.preserve_untouched = preserve;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Load and normalize the history file.
    ///
    /// A missing file yields an empty mapping. An unreadable or malformed
    /// file also yields an empty mapping, with a warning: startup never
    /// fails because of history content.
    pub fn load(&self) -> Conversations {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No history file, starting empty");
                return Conversations::new();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read history file, starting with empty history"
                );
                return Conversations::new();
            }
        };

        match parse_conversations(&content) {
            Ok(conversations) => {
                tracing::info!(
                    path = %self.path.display(),
                    conversations = conversations.len(),
                    "Loaded conversation history"
                );
                conversations
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Error decoding history file, starting with empty history"
                );
                Conversations::new()
            }
        }
    }

    /// Persist every live session in the registry, replacing the file.
    ///
    /// Returns the number of conversations written.
    pub async fn save(&self, registry: &SessionRegistry) -> Result<usize, HistoryError> {
        let mut conversations = registry.export().await;

        if self.preserve_untouched {
            for (id, messages) in registry.snapshot() {
                conversations
                    .entry(id.clone())
                    .or_insert_with(|| messages.clone());
            }
        }

        self.write(&conversations).await?;
        Ok(conversations.len())
    }

    /// Atomically replace the history file with `conversations`.
    pub async fn write(&self, conversations: &Conversations) -> Result<(), HistoryError> {
        let bytes = render_conversations(conversations)?;
        let tmp = self.tmp_path();

        let _guard = self.write_lock.lock().await;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| HistoryError::from_io(&self.path, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(HistoryError::from_io(&self.path, e));
        }

        tracing::debug!(
            path = %self.path.display(),
            conversations = conversations.len(),
            bytes = bytes.len(),
            "History saved"
        );
        Ok(())
    }
}
