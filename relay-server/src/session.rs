//! Live conversation sessions keyed by user identifier.

use crate::history::{Conversations, Message};
use crate::provider::{ChatRequest, ChatResponse, Provider, ProviderError};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A stateful conversation with the model.
///
/// History is only extended after a successful model call, so a failed
/// turn leaves no trace.
#[derive(Debug)]
pub struct Session {
    id: String,
    messages: Mutex<Vec<Message>>,
}

impl Session {
    /// Create a session seeded with prior messages.
    pub fn new(id: impl Into<String>, seed: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            messages: Mutex::new(seed),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the accumulated messages, oldest first.
    pub async fn history(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    /// Send one user turn with the full accumulated context.
    ///
    /// The lock is released while the model call is in flight; two turns for
    /// the same session may therefore interleave their appends.
    pub async fn send(
        &self,
        provider: &dyn Provider,
        text: &str,
    ) -> Result<ChatResponse, ProviderError> {
        let user = Message::user(text);

        let mut contents = self.history().await;
        contents.push(user.clone());

        let response = provider.chat(ChatRequest { contents }).await?;

        let mut messages = self.messages.lock().await;
        messages.push(user);
        messages.push(Message::model(response.content.clone()));

        Ok(response)
    }
}

/// Registry of live sessions plus the history loaded at startup.
///
/// Cloning is cheap; all clones share the same sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    snapshot: Arc<Conversations>,
}

impl SessionRegistry {
    /// Create a registry that seeds new sessions from `snapshot`.
    pub fn new(snapshot: Conversations) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            snapshot: Arc::new(snapshot),
        }
    }

    /// History loaded at startup. Never modified afterwards.
    pub fn snapshot(&self) -> &Conversations {
        &self.snapshot
    }

    /// Return the live session for `id`, creating it if needed.
    ///
    /// A new session is seeded from the startup snapshot, or starts empty.
    /// Repeated calls return the same session until it is evicted.
    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(id.to_string()).or_insert_with(|| {
            let seed = self.snapshot.get(id).cloned().unwrap_or_default();
            tracing::info!(
                user_id = %id,
                seeded_messages = seed.len(),
                "Created new chat session"
            );
            Arc::new(Session::new(id, seed))
        });
        Arc::clone(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drop `session` from the registry so the next turn for its id starts
    /// over from the startup snapshot.
    ///
    /// Nothing happens if the id already maps to a different session.
    pub async fn evict(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.id().to_string()) {
            Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), session) => {
                entry.remove();
                tracing::info!(user_id = %session.id(), "Chat session cleared");
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Identifiers of all live sessions, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current history of every live session.
    pub async fn export(&self) -> Conversations {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();

        let mut conversations = Conversations::new();
        for session in sessions {
            conversations.insert(session.id().to_string(), session.history().await);
        }
        conversations
    }
}
