use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    1000
}

impl LlmRequest {
    pub fn simple(model: String, system: Option<String>, user: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_request_simple_sets_defaults() {
        let req = LlmRequest::simple("model".into(), None, "hei".into());
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, "user");
        assert_eq!(req.max_tokens, 1000);
        assert!(req.temperature.is_none());
    }

    #[test]
    fn llm_request_builders() {
        let req = LlmRequest::simple("model".into(), None, "hei".into())
            .with_temperature(0.7)
            .with_max_tokens(64);
        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.max_tokens, 64);
    }

    #[test]
    fn llm_request_deserialize_uses_default_max_tokens() {
        let req: LlmRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "system": null,
            "messages": [{"role": "user", "content": "hei"}]
        }))
        .unwrap();
        assert_eq!(req.max_tokens, 1000);
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(LlmMessage::system("s").role, "system");
        assert_eq!(LlmMessage::assistant("a").role, "assistant");
    }
}
