pub mod file_store;
pub mod firestore;
pub mod subscription;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use baerumkart_schema::KnowledgeEntity;
use tokio::sync::RwLock;

pub use file_store::FileStore;
pub use firestore::{FirestoreConfig, FirestoreStore};
pub use subscription::{subscribe, Subscription};

/// Read access to the spot collection. Every call is a full-collection read;
/// callers filter client-side.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>>;
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    entities: Arc<RwLock<Vec<KnowledgeEntity>>>,
}

impl InMemoryStore {
    pub fn new(entities: Vec<KnowledgeEntity>) -> Self {
        Self {
            entities: Arc::new(RwLock::new(entities)),
        }
    }

    pub async fn push(&self, entity: KnowledgeEntity) {
        self.entities.write().await.push(entity);
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>> {
        Ok(self.entities.read().await.clone())
    }
}
