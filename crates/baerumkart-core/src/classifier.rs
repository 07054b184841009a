use crate::vocabulary::Vocabulary;

pub const OUT_OF_REGION_REPLY: &str = "Jeg kan kun hjelpe med turplanlegging i Bærum-området.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub in_scope: bool,
    /// The message to send onward; replaced by the out-of-region sentence on veto.
    pub normalized_message: String,
    /// Set only when in scope.
    pub topic_hint: Option<String>,
    pub out_of_region: bool,
}

/// Decide whether `message` is trip-related and inside the service region.
///
/// The region check looks at the whole conversation, but only once there is
/// history: an opening message is never vetoed for lacking a place name.
pub fn classify(vocab: &Vocabulary, message: &str, prior_messages: &[String]) -> Classification {
    let lower = message.to_lowercase();

    if !vocab.is_trip_related(&lower) {
        return Classification {
            in_scope: false,
            normalized_message: message.to_string(),
            topic_hint: None,
            out_of_region: false,
        };
    }

    if !prior_messages.is_empty() {
        let full_context = prior_messages
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(lower.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if !vocab.mentions_region(&full_context) {
            tracing::debug!("message vetoed: no region mention in conversation");
            return Classification {
                in_scope: false,
                normalized_message: OUT_OF_REGION_REPLY.to_string(),
                topic_hint: None,
                out_of_region: true,
            };
        }
    }

    let topic_hint = vocab.trip_type(&lower);
    tracing::debug!(topic_hint = %topic_hint, "message classified in scope");
    Classification {
        in_scope: true,
        normalized_message: message.to_string(),
        topic_hint: Some(topic_hint),
        out_of_region: false,
    }
}
