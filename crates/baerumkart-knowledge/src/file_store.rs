use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use baerumkart_schema::KnowledgeEntity;
use serde::Deserialize;

use crate::KnowledgeStore;

/// Spots kept in a YAML file. The file is re-read on every call so edits show
/// up without a restart.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SpotsFile {
    #[serde(default)]
    spots: Vec<KnowledgeEntity>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KnowledgeStore for FileStore {
    async fn list_entities(&self) -> Result<Vec<KnowledgeEntity>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read spots file: {}", self.path.display()))?;
        let file: SpotsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse spots file: {}", self.path.display()))?;
        tracing::debug!(
            "loaded {} spots from {}",
            file.spots.len(),
            self.path.display()
        );
        Ok(file.spots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPOTS_YAML: &str = r#"
spots:
  - name: Kolsåstoppen
    category: Fottur
    subcategory: Topptur
    difficulty: lett
    description: Utsikt over hele Bærum
    location: Kolsås
    coordinates: { lat: 59.918, lng: 10.495 }
  - name: Fossum teltplass
    category: Camping
    difficulty: lett
    description: Teltplass ved Fossumdammen
    coordinates: { lat: 59.96, lng: 10.56 }
"#;

    #[tokio::test]
    async fn reads_spots_from_yaml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("spots.yaml");
        std::fs::write(&path, SPOTS_YAML).unwrap();

        let store = FileStore::new(&path);
        let spots = store.list_entities().await.unwrap();
        assert_eq!(spots.len(), 2);
        assert_eq!(spots[0].subcategory.as_deref(), Some("Topptur"));
        assert!(spots[1].subcategory.is_none());
    }

    #[tokio::test]
    async fn rereads_file_on_every_call() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("spots.yaml");
        std::fs::write(&path, "spots: []\n").unwrap();

        let store = FileStore::new(&path);
        assert!(store.list_entities().await.unwrap().is_empty());

        std::fs::write(&path, SPOTS_YAML).unwrap();
        assert_eq!(store.list_entities().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let store = FileStore::new("/definitely/not/here/spots.yaml");
        let err = store.list_entities().await.unwrap_err();
        assert!(err.to_string().contains("failed to read spots file"));
    }

    #[tokio::test]
    async fn malformed_yaml_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("spots.yaml");
        std::fs::write(&path, "spots: [ {name: ").unwrap();
        let err = FileStore::new(&path).list_entities().await.unwrap_err();
        assert!(err.to_string().contains("failed to parse spots file"));
    }
}
