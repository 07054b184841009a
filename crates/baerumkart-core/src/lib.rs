pub mod assistant;
pub mod broker;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod error;
pub mod fetcher;
pub mod generator;
pub mod replies;
pub mod service;
pub mod session;
pub mod vocabulary;

pub use assistant::{Assistant, Responder};
pub use broker::{Broker, BrokerConfig, BrokerStats, PendingReply};
pub use classifier::{classify, Classification, OUT_OF_REGION_REPLY};
pub use config::{build_store, load_config, resolve_env_var, validate_config, BaerumkartConfig, MainConfig};
pub use conversation::{update_intent, update_topic};
pub use error::ChatError;
pub use fetcher::{FetchedKnowledge, KnowledgeFetcher};
pub use generator::{GenerationConfig, ResponseGenerator, INSUFFICIENT_DATA_REPLY};
pub use replies::{enhance, fallback_reply, small_talk, APOLOGY_REPLY, BUSY_REPLY};
pub use service::ChatService;
pub use session::{ChatSession, SessionRegistry};
pub use vocabulary::{RulesConfig, Vocabulary};
