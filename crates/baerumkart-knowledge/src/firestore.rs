//! Read-only Firestore access over the public REST API.
//!
//! Documents come back with typed values (`stringValue`, `mapValue`, ...);
//! they are flattened to plain JSON before deserializing into
//! [`KnowledgeEntity`].

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use baerumkart_schema::KnowledgeEntity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::KnowledgeStore;

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;
const MAX_PAGES: usize = 50;

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_collection() -> String {
    "spots".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Web API key, sent as the `key` query parameter.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Bearer token for rules that require a signed-in user.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            collection: default_collection(),
            api_key: None,
            auth_token: None,
            base_url: default_base_url(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct FirestoreStore {
    client: reqwest::Client,
    config: FirestoreConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl FirestoreStore {
    pub fn new(config: FirestoreConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.project_id,
            self.config.collection
        )
    }

    async fn fetch_page(&self, page_token: Option<&str>) -> Result<ListDocumentsResponse> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", PAGE_SIZE.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        if let Some(key) = &self.config.api_key {
            query.push(("key", key.clone()));
        }

        let mut builder = self.client.get(self.collection_url()).query(&query);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder
            .send()
            .await
            .context("firestore request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("firestore list failed ({status}): {body}"));
        }
        resp.json::<ListDocumentsResponse>()
            .await
            .context("firestore returned an unreadable page")
    }
}

#[async_trait]
impl KnowledgeStore for FirestoreStore {
    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>> {
        let mut entities = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(page_token.as_deref()).await?;
            for doc in page.documents {
                match decode_document(&doc) {
                    Ok(entity) => entities.push(entity),
                    Err(e) => tracing::warn!("skipping firestore document {}: {e}", doc.name),
                }
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(entities),
            }
        }

        tracing::warn!(
            "firestore collection {} exceeded {MAX_PAGES} pages, returning partial list",
            self.config.collection
        );
        Ok(entities)
    }
}

fn decode_document(doc: &Document) -> Result<KnowledgeEntity> {
    let mut plain = Map::new();
    for (key, value) in &doc.fields {
        plain.insert(key.clone(), decode_value(value));
    }
    if !plain.contains_key("id") {
        if let Some(id) = doc.name.rsplit('/').next() {
            plain.insert("id".to_string(), Value::String(id.to_string()));
        }
    }
    Ok(serde_json::from_value(Value::Object(plain))?)
}

/// Flatten one Firestore typed value into plain JSON.
fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    if let Some(v) = obj.get("stringValue") {
        return v.clone();
    }
    if let Some(v) = obj.get("doubleValue") {
        return v.clone();
    }
    if let Some(v) = obj.get("integerValue") {
        // int64 arrives as a decimal string
        return v
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| v.clone());
    }
    if let Some(v) = obj.get("booleanValue") {
        return v.clone();
    }
    if let Some(v) = obj.get("timestampValue") {
        return v.clone();
    }
    if let Some(fields) = obj
        .get("mapValue")
        .and_then(|m| m.get("fields"))
        .and_then(Value::as_object)
    {
        let mut out = Map::new();
        for (key, inner) in fields {
            out.insert(key.clone(), decode_value(inner));
        }
        return Value::Object(out);
    }
    if obj.contains_key("mapValue") {
        return Value::Object(Map::new());
    }
    if let Some(array) = obj.get("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(geo) = obj.get("geoPointValue") {
        let lat = geo.get("latitude").cloned().unwrap_or(Value::Null);
        let lng = geo.get("longitude").cloned().unwrap_or(Value::Null);
        return serde_json::json!({"lat": lat, "lng": lng});
    }
    Value::Null
}
