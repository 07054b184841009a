use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use baerumkart_knowledge::{FileStore, FirestoreConfig, FirestoreStore, InMemoryStore, KnowledgeStore};
use baerumkart_provider::ProviderConfig;
use baerumkart_schema::KnowledgeEntity;
use serde::{Deserialize, Serialize};

use crate::broker::BrokerConfig;
use crate::error::ChatError;
use crate::fetcher::DEFAULT_MAX_ENTITIES;
use crate::generator::{GenerationConfig, MAX_LOCAL_RETRIES};
use crate::session::DEFAULT_SESSION_TTL_SECS;
use crate::vocabulary::{RulesConfig, Vocabulary};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

fn default_session_ttl() -> i64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_prune_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: i64,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    #[default]
    File,
    Firestore,
    /// Spots listed inline under `knowledge.spots`.
    Memory,
}

fn default_max_entities() -> usize {
    DEFAULT_MAX_ENTITIES
}

fn default_watch_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub kind: KnowledgeKind,
    /// YAML spots file; relative paths resolve against the config root.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub firestore: Option<FirestoreConfig>,
    #[serde(default)]
    pub spots: Vec<KnowledgeEntity>,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    /// Poll interval for `spots --watch`.
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            kind: KnowledgeKind::default(),
            path: None,
            firestore: None,
            spots: Vec::new(),
            max_entities: default_max_entities(),
            watch_interval_secs: default_watch_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    pub app: AppConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct BaerumkartConfig {
    pub main: MainConfig,
    pub rules: RulesConfig,
    pub vocabulary: Vocabulary,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

fn resolve_opt(value: &mut Option<String>) {
    if let Some(v) = value {
        *v = resolve_env_var(v);
    }
}

/// Load `main.yaml` and the optional `rules.yaml` from `root`.
pub fn load_config(root: &Path) -> Result<BaerumkartConfig> {
    let mut main: MainConfig = read_yaml_file(&root.join("main.yaml"))?;

    let rules_path = root.join("rules.yaml");
    let rules: RulesConfig = if rules_path.exists() {
        read_yaml_file(&rules_path)?
    } else {
        RulesConfig::default()
    };
    let vocabulary = Vocabulary::from_rules(&rules)
        .with_context(|| format!("invalid rules in {}", rules_path.display()))?;

    resolve_main_env(&mut main);
    if let Some(path) = &main.knowledge.path {
        main.knowledge.path = Some(resolve_relative(root, path).display().to_string());
    }

    let config = BaerumkartConfig {
        main,
        rules,
        vocabulary,
    };
    validate_config(&config)?;
    Ok(config)
}

/// One day; broker timings beyond this are configuration mistakes.
const MAX_BROKER_SECS: u64 = 86_400;

pub fn validate_config(config: &BaerumkartConfig) -> Result<()> {
    let main = &config.main;

    if main.generation.model.trim().is_empty() {
        return Err(ChatError::Config("generation.model must not be empty".into()).into());
    }
    if !(0.0..=2.0).contains(&main.generation.temperature) {
        return Err(ChatError::Config(format!(
            "generation.temperature out of range: {}",
            main.generation.temperature
        ))
        .into());
    }
    if main.generation.local_retries > MAX_LOCAL_RETRIES {
        return Err(ChatError::Config(format!(
            "generation.local_retries must be at most {MAX_LOCAL_RETRIES}, got {}",
            main.generation.local_retries
        ))
        .into());
    }
    if main.broker.spacing_secs > MAX_BROKER_SECS || main.broker.request_timeout_secs > MAX_BROKER_SECS {
        return Err(ChatError::Config(format!(
            "broker.spacing_secs and broker.request_timeout_secs must be at most {MAX_BROKER_SECS}"
        ))
        .into());
    }
    if main.broker.max_queue_depth == 0 {
        return Err(ChatError::Config("broker.max_queue_depth must be at least 1".into()).into());
    }
    if main.knowledge.max_entities == 0 {
        return Err(ChatError::Config("knowledge.max_entities must be at least 1".into()).into());
    }

    match main.knowledge.kind {
        KnowledgeKind::File => {
            if main.knowledge.path.as_deref().is_none_or(str::is_empty) {
                return Err(ChatError::Config("knowledge.kind=file requires knowledge.path".into()).into());
            }
        }
        KnowledgeKind::Firestore => {
            let project = main.knowledge.firestore.as_ref().map(|f| f.project_id.as_str());
            if project.is_none_or(str::is_empty) {
                return Err(ChatError::Config(
                    "knowledge.kind=firestore requires knowledge.firestore.project_id".into(),
                )
                .into());
            }
        }
        KnowledgeKind::Memory => {}
    }

    Ok(())
}

/// Construct the configured knowledge store.
pub fn build_store(config: &KnowledgeConfig) -> Result<Arc<dyn KnowledgeStore>> {
    let store: Arc<dyn KnowledgeStore> = match config.kind {
        KnowledgeKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| ChatError::Config("knowledge.path missing".into()))?;
            Arc::new(FileStore::new(path))
        }
        KnowledgeKind::Firestore => {
            let firestore = config
                .firestore
                .clone()
                .ok_or_else(|| ChatError::Config("knowledge.firestore missing".into()))?;
            Arc::new(FirestoreStore::new(firestore))
        }
        KnowledgeKind::Memory => Arc::new(InMemoryStore::new(config.spots.clone())),
    };
    Ok(store)
}

fn resolve_relative(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_main_env(main: &mut MainConfig) {
    main.app.name = resolve_env_var(&main.app.name);
    main.app.env = resolve_env_var(&main.app.env);

    resolve_opt(&mut main.provider.api_key);
    resolve_opt(&mut main.provider.base_url);
    resolve_opt(&mut main.provider.site_url);
    resolve_opt(&mut main.provider.site_name);

    main.generation.model = resolve_env_var(&main.generation.model);

    resolve_opt(&mut main.knowledge.path);
    if let Some(firestore) = &mut main.knowledge.firestore {
        firestore.project_id = resolve_env_var(&firestore.project_id);
        firestore.base_url = resolve_env_var(&firestore.base_url);
        resolve_opt(&mut firestore.api_key);
        resolve_opt(&mut firestore.auth_token);
    }
}
