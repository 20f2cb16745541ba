use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::message::{Author, ConversationTurn, Message, MessageId};

/// Errors from the durable half of the transcript.
#[derive(Debug)]
pub enum TranscriptError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::Io { path, source } => {
                write!(f, "Failed to write session at {}: {}", path.display(), source)
            }
            TranscriptError::Serialize { source } => {
                write!(f, "Failed to serialize session: {source}")
            }
        }
    }
}

impl StdError for TranscriptError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TranscriptError::Io { source, .. } => Some(source),
            TranscriptError::Serialize { source } => Some(source),
        }
    }
}

/// Ordered, append-only view of the conversation. Local mutations are
/// synchronous and optimistic; `commit` is the durable write, idempotent by
/// message id. The aggregator depends only on this interface, never on the
/// concrete persistence behind it.
#[async_trait]
pub trait TranscriptStore {
    fn messages(&self) -> &[Message];

    fn append_user(&mut self, content: &str) -> MessageId;

    /// Creates the single pending placeholder an in-flight round streams
    /// into.
    fn append_pending(&mut self) -> MessageId;

    fn append_error(&mut self, content: &str, source_model: Option<&str>) -> MessageId;

    /// Local mutate path for the placeholder: content replaces wholesale,
    /// the source model tag follows whichever call produced the text.
    fn update(&mut self, id: MessageId, content: &str, source_model: Option<&str>);

    /// Flips the placeholder out of its pending state. Called exactly once
    /// per successful round, at finalization.
    fn finalize(&mut self, id: MessageId);

    /// Local rollback; the entry is dropped as if it never existed.
    fn remove(&mut self, id: MessageId);

    async fn commit(&mut self, id: MessageId) -> Result<(), TranscriptError>;

    /// The linear user/assistant history sent to a model, with bookkeeping
    /// entries (pending placeholder, error bubbles) stripped.
    fn conversation_turns(&self) -> Vec<ConversationTurn> {
        self.messages()
            .iter()
            .filter_map(Message::as_turn)
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.messages().iter().filter(|m| m.is_pending).count()
    }
}

/// Durable representation of one transcript entry. Field names match the
/// external session schema.
#[derive(Serialize, Deserialize)]
struct StoredMessage {
    id: u64,
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "isUser")]
    is_user: bool,
    #[serde(rename = "modelId")]
    model_id: Option<String>,
    #[serde(rename = "isStreaming")]
    is_streaming: bool,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

impl StoredMessage {
    fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.0,
            content: message.content.clone(),
            timestamp: message.created_at,
            is_user: message.author == Author::User,
            model_id: message.source_model.clone(),
            is_streaming: message.is_pending,
            is_error: message.is_error,
        }
    }

    fn into_message(self) -> Message {
        Message {
            id: MessageId(self.id),
            content: self.content,
            author: if self.is_user {
                Author::User
            } else {
                Author::Assistant
            },
            created_at: self.timestamp,
            source_model: self.model_id,
            // A stale in-flight flag from a crashed session never survives
            // a reload.
            is_pending: false,
            is_error: self.is_error,
        }
    }
}

/// In-memory transcript with an optional JSON session file. The durable
/// write rewrites the whole snapshot atomically, so committing the same id
/// twice is a no-op beyond the extra write.
pub struct SessionTranscript {
    messages: Vec<Message>,
    last_id: u64,
    session_file: Option<PathBuf>,
}

impl SessionTranscript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_id: 0,
            session_file: None,
        }
    }

    pub fn with_session_file(path: PathBuf) -> Self {
        let mut transcript = Self::new();
        transcript.session_file = Some(path);
        transcript
    }

    /// Reloads a previous session so the conversation continues where it
    /// left off. A missing file is an empty session, not an error.
    pub fn load(path: PathBuf) -> Result<Self, Box<dyn StdError>> {
        let mut transcript = Self::with_session_file(path.clone());
        if !path.exists() {
            return Ok(transcript);
        }
        let contents = fs::read_to_string(&path).map_err(|source| TranscriptError::Io {
            path: path.clone(),
            source,
        })?;
        let stored: Vec<StoredMessage> =
            serde_json::from_str(&contents).map_err(|source| TranscriptError::Serialize { source })?;
        transcript.messages = stored.into_iter().map(StoredMessage::into_message).collect();
        transcript.last_id = transcript.messages.iter().map(|m| m.id.0).max().unwrap_or(0);
        Ok(transcript)
    }

    fn next_id(&mut self) -> MessageId {
        let candidate = Utc::now().timestamp_millis().max(0) as u64;
        self.last_id = if candidate > self.last_id {
            candidate
        } else {
            self.last_id + 1
        };
        MessageId(self.last_id)
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn write_snapshot(&self, path: &Path) -> Result<(), TranscriptError> {
        let durable: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|m| !m.is_pending)
            .map(StoredMessage::from_message)
            .collect();
        let contents = serde_json::to_string_pretty(&durable)
            .map_err(|source| TranscriptError::Serialize { source })?;

        let io_err = |source| TranscriptError::Io {
            path: path.to_path_buf(),
            source,
        };

        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir).map_err(io_err)?,
            None => NamedTempFile::new().map_err(io_err)?,
        };
        temp_file.write_all(contents.as_bytes()).map_err(io_err)?;
        temp_file.persist(path).map_err(|err| TranscriptError::Io {
            path: path.to_path_buf(),
            source: err.error,
        })?;
        Ok(())
    }
}

impl Default for SessionTranscript {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptStore for SessionTranscript {
    fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn append_user(&mut self, content: &str) -> MessageId {
        let id = self.next_id();
        self.messages.push(Message::user(id, content));
        id
    }

    fn append_pending(&mut self) -> MessageId {
        debug_assert_eq!(self.pending_count(), 0, "rounds are not pipelined");
        let id = self.next_id();
        self.messages.push(Message::pending(id));
        id
    }

    fn append_error(&mut self, content: &str, source_model: Option<&str>) -> MessageId {
        let id = self.next_id();
        self.messages.push(Message::error(id, content, source_model));
        id
    }

    fn update(&mut self, id: MessageId, content: &str, source_model: Option<&str>) {
        if let Some(index) = self.position(id) {
            let message = &mut self.messages[index];
            message.content = content.to_string();
            if let Some(model) = source_model {
                message.source_model = Some(model.to_string());
            }
        }
    }

    fn finalize(&mut self, id: MessageId) {
        if let Some(index) = self.position(id) {
            self.messages[index].is_pending = false;
        }
    }

    fn remove(&mut self, id: MessageId) {
        self.messages.retain(|m| m.id != id);
    }

    async fn commit(&mut self, id: MessageId) -> Result<(), TranscriptError> {
        // Committing an unknown or already-persisted id is a no-op: the
        // snapshot always reflects the current local state.
        let _ = id;
        match &self.session_file {
            Some(path) => self.write_snapshot(path),
            None => Ok(()),
        }
    }
}
