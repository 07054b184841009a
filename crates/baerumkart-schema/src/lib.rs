use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One exchange unit in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub text: String,
    pub is_from_user: bool,
    pub at: DateTime<Utc>,
    /// Set on an assistant placeholder while its request waits out a provider throttle.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_from_user: true,
            at: Utc::now(),
            pending: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_from_user: false,
            at: Utc::now(),
            pending: false,
        }
    }

    pub fn pending_assistant(text: impl Into<String>) -> Self {
        Self {
            pending: true,
            ..Self::assistant(text)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Where to leave the car for a spot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parking {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub description: String,
}

/// A point of interest owned by the external knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub difficulty: String,
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub coordinates: Coordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parking: Option<Parking>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facilities: Vec<String>,
}

impl KnowledgeEntity {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        difficulty: impl Into<String>,
        description: impl Into<String>,
        coordinates: Coordinates,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            category: category.into(),
            subcategory: None,
            difficulty: difficulty.into(),
            description: description.into(),
            location: String::new(),
            coordinates,
            duration: None,
            parking: None,
            facilities: vec![],
        }
    }

    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

/// Coarse intent of the latest inbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Recommend,
    Info,
    Equipment,
    Duration,
    Parking,
    General,
    #[default]
    None,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recommend => "recommend",
            Self::Info => "info",
            Self::Equipment => "equipment",
            Self::Duration => "duration",
            Self::Parking => "parking",
            Self::General => "general",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub current_topic: Option<String>,
    pub last_intent: Intent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kolsas() -> KnowledgeEntity {
        KnowledgeEntity::new(
            "Kolsåstoppen",
            "Fottur",
            "lett",
            "Utsikt over Bærum",
            Coordinates {
                lat: 59.918,
                lng: 10.495,
            },
        )
    }

    #[test]
    fn entity_deserializes_camel_case_with_missing_optionals() {
        let raw = serde_json::json!({
            "name": "Brunkollen",
            "category": "Utsiktspunkt",
            "difficulty": "moderat",
            "description": "Fin topp",
            "coordinates": {"lat": 59.95, "lng": 10.52}
        });
        let entity: KnowledgeEntity = serde_json::from_value(raw).unwrap();
        assert_eq!(entity.name, "Brunkollen");
        assert!(entity.subcategory.is_none());
        assert!(entity.location.is_empty());
        assert!(entity.facilities.is_empty());
    }

    #[test]
    fn entity_reads_structured_parking() {
        let raw = serde_json::json!({
            "name": "Fossum teltplass",
            "category": "Camping",
            "difficulty": "lett",
            "description": "Teltplass",
            "coordinates": {"lat": 59.96, "lng": 10.56},
            "parking": {"lat": 59.95, "lng": 10.55, "description": "Fossum gård"}
        });
        let entity: KnowledgeEntity = serde_json::from_value(raw).unwrap();
        assert_eq!(entity.parking.unwrap().description, "Fossum gård");
    }

    #[test]
    fn entity_builder_sets_optional_fields() {
        let entity = kolsas().with_subcategory("Topptur").with_location("Kolsås");
        assert_eq!(entity.subcategory.as_deref(), Some("Topptur"));
        assert_eq!(entity.location, "Kolsås");
    }

    #[test]
    fn message_constructors_set_author() {
        assert!(Message::user("hei").is_from_user);
        let reply = Message::assistant("hallo");
        assert!(!reply.is_from_user);
        assert!(!reply.pending);
        assert!(Message::pending_assistant("venter").pending);
    }

    #[test]
    fn message_serializes_camel_case_and_hides_pending_flag() {
        let json = serde_json::to_value(Message::user("hei")).unwrap();
        assert_eq!(json["isFromUser"], true);
        assert!(json.get("pending").is_none());
    }

    #[test]
    fn intent_defaults_to_none() {
        let state = ConversationState::default();
        assert_eq!(state.last_intent, Intent::None);
        assert!(state.current_topic.is_none());
        assert_eq!(Intent::Duration.as_str(), "duration");
    }

    #[test]
    fn intent_serde_is_snake_case() {
        let json = serde_json::to_value(Intent::Recommend).unwrap();
        assert_eq!(json, "recommend");
    }
}
