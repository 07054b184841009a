use std::collections::HashMap;
use std::sync::Arc;

use baerumkart_schema::{ConversationState, Message};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

pub const DEFAULT_SESSION_TTL_SECS: i64 = 1800;

struct Transcript {
    messages: Vec<Message>,
    /// Bumped on reset so replies to requests from before the reset are not
    /// written into the fresh transcript.
    epoch: u64,
    last_active: DateTime<Utc>,
}

/// Handle for one user turn, created when the message is accepted and
/// consumed when its reply is recorded.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    epoch: u64,
    /// Transcript texts before this turn's user message.
    pub history: Vec<String>,
    placeholder: Option<usize>,
}

/// One conversation: its topic/intent state and its transcript.
///
/// Neither lock is held across an await on the network. The broker works on
/// a snapshot of the state and commits it back through [`ChatSession::commit_state`].
/// Lock order is transcript, then state.
pub struct ChatSession {
    id: String,
    state: Mutex<ConversationState>,
    transcript: Mutex<Transcript>,
    ttl_seconds: i64,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, ttl_seconds: i64) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ConversationState::default()),
            transcript: Mutex::new(Transcript {
                messages: Vec::new(),
                epoch: 0,
                last_active: Utc::now(),
            }),
            ttl_seconds,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn snapshot_state(&self) -> ConversationState {
        self.state.lock().await.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.transcript.lock().await.messages.clone()
    }

    pub async fn last_active(&self) -> DateTime<Utc> {
        self.transcript.lock().await.last_active
    }

    pub async fn is_expired(&self) -> bool {
        let elapsed = Utc::now() - self.last_active().await;
        elapsed.num_seconds() >= self.ttl_seconds
    }

    /// False once the session has been reset after `ticket` was issued.
    pub async fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.transcript.lock().await.epoch == ticket.epoch
    }

    /// Store the state a turn produced, unless the session was reset while
    /// the turn was being answered. Returns whether the state was written.
    pub async fn commit_state(&self, ticket: &TurnTicket, state: ConversationState) -> bool {
        let t = self.transcript.lock().await;
        if t.epoch != ticket.epoch {
            return false;
        }
        *self.state.lock().await = state;
        true
    }

    /// Record the user's message and capture the history it will be answered
    /// against. Pending placeholders are not part of the history.
    pub async fn begin_turn(&self, text: &str) -> TurnTicket {
        let mut t = self.transcript.lock().await;
        let history = t
            .messages
            .iter()
            .filter(|m| !m.pending)
            .map(|m| m.text.clone())
            .collect();
        t.messages.push(Message::user(text));
        t.last_active = Utc::now();
        TurnTicket {
            epoch: t.epoch,
            history,
            placeholder: None,
        }
    }

    /// Show a pending assistant message for a turn that is waiting on a
    /// throttle. Repeated calls update the same placeholder.
    pub async fn show_pending(&self, ticket: &mut TurnTicket, text: &str) {
        let mut t = self.transcript.lock().await;
        if t.epoch != ticket.epoch {
            return;
        }
        match ticket.placeholder {
            Some(idx) if t.messages.get(idx).is_some_and(|m| m.pending) => {
                t.messages[idx] = Message::pending_assistant(text);
            }
            _ => {
                t.messages.push(Message::pending_assistant(text));
                ticket.placeholder = Some(t.messages.len() - 1);
            }
        }
    }

    /// Record the reply, replacing the turn's placeholder in place if it has one.
    pub async fn finish_turn(&self, ticket: &TurnTicket, reply: &str) {
        let mut t = self.transcript.lock().await;
        if t.epoch != ticket.epoch {
            tracing::debug!(session = %self.id, "dropping reply for a reset transcript");
            return;
        }
        match ticket.placeholder {
            Some(idx) if t.messages.get(idx).is_some_and(|m| m.pending) => {
                t.messages[idx] = Message::assistant(reply);
            }
            _ => t.messages.push(Message::assistant(reply)),
        }
        t.last_active = Utc::now();
    }

    /// Clear transcript and conversation state.
    pub async fn reset(&self) {
        {
            let mut t = self.transcript.lock().await;
            t.messages.clear();
            t.epoch += 1;
            t.last_active = Utc::now();
        }
        *self.state.lock().await = ConversationState::default();
    }
}

/// Live sessions keyed by caller-supplied id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    ttl_seconds: i64,
}

impl SessionRegistry {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// Existing live session, or a fresh one if missing or idle past its TTL.
    pub async fn get_or_create(&self, id: &str) -> Arc<ChatSession> {
        if let Some(session) = self.sessions.read().await.get(id) {
            if !session.is_expired().await {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            if !session.is_expired().await {
                return session.clone();
            }
            tracing::info!(session = id, "session expired, starting a new one");
        }
        let session = Arc::new(ChatSession::new(id, self.ttl_seconds));
        sessions.insert(id.to_string(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ChatSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Returns false when the session does not exist.
    pub async fn reset(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(session) => {
                session.reset().await;
                true
            }
            None => false,
        }
    }

    /// Drop sessions idle past their TTL. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            if session.is_expired().await {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!("pruned {} idle sessions", expired.len());
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
