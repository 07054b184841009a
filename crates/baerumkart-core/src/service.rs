use std::sync::Arc;

use anyhow::Result;
use baerumkart_knowledge::KnowledgeStore;
use baerumkart_provider::{create_provider, LlmProvider};
use baerumkart_schema::{ConversationState, Message};

use crate::assistant::{Assistant, Responder};
use crate::broker::{Broker, BrokerStats};
use crate::config::{build_store, BaerumkartConfig};
use crate::fetcher::KnowledgeFetcher;
use crate::generator::ResponseGenerator;
use crate::session::SessionRegistry;
use crate::vocabulary::Vocabulary;

/// Caller-facing entry point: sessions plus the shared broker.
#[derive(Clone)]
pub struct ChatService {
    broker: Broker,
    sessions: Arc<SessionRegistry>,
}

impl ChatService {
    pub fn new(broker: Broker, sessions: Arc<SessionRegistry>) -> Self {
        Self { broker, sessions }
    }

    /// Wire the assistant pipeline from explicit parts.
    pub fn with_parts(
        config: &BaerumkartConfig,
        vocab: Arc<Vocabulary>,
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let fetcher = KnowledgeFetcher::new(store).with_max_entities(config.main.knowledge.max_entities);
        let generator = ResponseGenerator::new(provider, config.main.generation.clone());
        let responder: Arc<dyn Responder> = Arc::new(Assistant::new(vocab, fetcher, generator));
        Self::new(
            Broker::new(responder, config.main.broker.clone()),
            Arc::new(SessionRegistry::new(config.main.sessions.ttl_seconds)),
        )
    }

    /// Build provider and store from configuration.
    pub fn from_config(config: &BaerumkartConfig) -> Result<Self> {
        let provider = create_provider(&config.main.provider)?;
        let store = build_store(&config.main.knowledge)?;
        Ok(Self::with_parts(
            config,
            Arc::new(config.vocabulary.clone()),
            store,
            provider,
        ))
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Submit a message and wait for its reply. Never fails: broker errors
    /// come back as the apology text.
    pub async fn submit_message(&self, session_id: &str, text: &str) -> String {
        let session = self.sessions.get_or_create(session_id).await;
        self.broker.enqueue(session, text).await.await
    }

    /// Countdown for the UI: seconds until this session's queued request
    /// can be serviced.
    pub async fn pending_delay_seconds(&self, session_id: &str) -> u64 {
        self.broker.pending_delay_seconds_for(session_id).await
    }

    pub async fn transcript(&self, session_id: &str) -> Vec<Message> {
        match self.sessions.get(session_id).await {
            Some(session) => session.messages().await,
            None => Vec::new(),
        }
    }

    pub async fn conversation_state(&self, session_id: &str) -> Option<ConversationState> {
        let session = self.sessions.get(session_id).await?;
        Some(session.snapshot_state().await)
    }

    pub async fn reset(&self, session_id: &str) -> bool {
        self.sessions.reset(session_id).await
    }

    pub async fn stats(&self) -> BrokerStats {
        self.broker.stats().await
    }
}
