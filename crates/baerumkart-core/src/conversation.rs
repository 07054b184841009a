use baerumkart_schema::{ConversationState, Intent};

use crate::vocabulary::Vocabulary;

/// Pin the first known spot name the message mentions. Topics are sticky:
/// a message naming no spot leaves the current topic alone.
pub fn update_topic(state: &mut ConversationState, vocab: &Vocabulary, message: &str) {
    let lower = message.to_lowercase();
    if let Some(topic) = vocab.known_topic(&lower) {
        if state.current_topic.as_deref() != Some(topic) {
            tracing::debug!(topic, "conversation topic changed");
        }
        state.current_topic = Some(topic.to_string());
    }
}

/// Recompute the intent from scratch; every message sets one.
pub fn update_intent(state: &mut ConversationState, vocab: &Vocabulary, message: &str) -> Intent {
    state.last_intent = vocab.intent(&message.to_lowercase());
    state.last_intent
}
