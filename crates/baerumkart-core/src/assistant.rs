use std::sync::Arc;

use async_trait::async_trait;
use baerumkart_schema::ConversationState;

use crate::classifier::classify;
use crate::conversation::{update_intent, update_topic};
use crate::error::ChatError;
use crate::fetcher::KnowledgeFetcher;
use crate::generator::ResponseGenerator;
use crate::replies::{enhance, fallback_reply, small_talk};
use crate::vocabulary::{Vocabulary, GENERIC_TRIP_TYPE};

/// Marker the fallback path looks for in generated text.
const INSUFFICIENT_DATA_MARKER: &str = "Jeg har ikke nok detaljer";

/// Turns one user message into one reply. The broker calls this for each
/// dequeued request; `Throttled` errors make it requeue.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        state: &mut ConversationState,
        message: &str,
        prior_messages: &[String],
    ) -> Result<String, ChatError>;
}

pub struct Assistant {
    vocab: Arc<Vocabulary>,
    fetcher: KnowledgeFetcher,
    generator: ResponseGenerator,
}

impl Assistant {
    pub fn new(vocab: Arc<Vocabulary>, fetcher: KnowledgeFetcher, generator: ResponseGenerator) -> Self {
        Self {
            vocab,
            fetcher,
            generator,
        }
    }
}

#[async_trait]
impl Responder for Assistant {
    async fn respond(
        &self,
        state: &mut ConversationState,
        message: &str,
        prior_messages: &[String],
    ) -> Result<String, ChatError> {
        update_topic(state, &self.vocab, message);
        let intent = update_intent(state, &self.vocab, message);

        let classification = classify(&self.vocab, message, prior_messages);
        tracing::debug!(
            intent = intent.as_str(),
            in_scope = classification.in_scope,
            topic = state.current_topic.as_deref(),
            "message classified"
        );

        if classification.out_of_region {
            return Ok(classification.normalized_message);
        }
        if !classification.in_scope && state.current_topic.is_none() {
            return Ok(small_talk(message, prior_messages.len()).to_string());
        }

        let topic_hint = classification
            .topic_hint
            .unwrap_or_else(|| GENERIC_TRIP_TYPE.to_string());
        let knowledge = self
            .fetcher
            .fetch(Some(&topic_hint), state.current_topic.as_deref())
            .await?;

        let answer = self
            .generator
            .generate(
                &classification.normalized_message,
                &knowledge.context_text,
                &knowledge.entity_names,
                prior_messages,
            )
            .await?;

        if answer.contains(INSUFFICIENT_DATA_MARKER) {
            return Ok(fallback_reply(state, message));
        }
        Ok(enhance(state, &answer, message))
    }
}
