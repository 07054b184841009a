use std::collections::HashSet;
use std::sync::Arc;

use baerumkart_knowledge::KnowledgeStore;
use baerumkart_schema::KnowledgeEntity;

use crate::error::ChatError;
use crate::vocabulary::GENERIC_TRIP_TYPE;

pub const DEFAULT_MAX_ENTITIES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedKnowledge {
    pub context_text: String,
    /// Lowercased names of the entities in `context_text`.
    pub entity_names: Vec<String>,
}

pub struct KnowledgeFetcher {
    store: Arc<dyn KnowledgeStore>,
    max_entities: usize,
}

impl KnowledgeFetcher {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            max_entities: DEFAULT_MAX_ENTITIES,
        }
    }

    pub fn with_max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }

    /// Read the whole collection and keep at most `max_entities` matches.
    ///
    /// A pinned topic filters by name; otherwise a specific trip type filters
    /// by description, category and subcategory. The generic `tur` keeps all.
    pub async fn fetch(
        &self,
        topic_hint: Option<&str>,
        pinned_topic: Option<&str>,
    ) -> Result<FetchedKnowledge, ChatError> {
        let entities = self
            .store
            .list_entities()
            .await
            .map_err(|e| ChatError::DataUnavailable(format!("{e:#}")))?;
        let total = entities.len();

        let selected = select(entities, topic_hint, pinned_topic, self.max_entities);
        tracing::debug!(
            total,
            selected = selected.len(),
            topic_hint,
            pinned_topic,
            "knowledge fetched"
        );

        Ok(FetchedKnowledge {
            context_text: selected
                .iter()
                .map(context_block)
                .collect::<Vec<_>>()
                .join("\n\n"),
            entity_names: selected.iter().map(|e| e.name.to_lowercase()).collect(),
        })
    }
}

fn select(
    entities: Vec<KnowledgeEntity>,
    topic_hint: Option<&str>,
    pinned_topic: Option<&str>,
    max: usize,
) -> Vec<KnowledgeEntity> {
    let pinned = pinned_topic.map(str::to_lowercase);
    let hint = topic_hint
        .map(str::to_lowercase)
        .filter(|h| h != GENERIC_TRIP_TYPE);

    let matches = |entity: &KnowledgeEntity| -> bool {
        if let Some(pin) = &pinned {
            return entity.name.to_lowercase().contains(pin.as_str());
        }
        match &hint {
            Some(hint) => {
                entity.description.to_lowercase().contains(hint.as_str())
                    || entity.category.to_lowercase().contains(hint.as_str())
                    || entity
                        .subcategory
                        .as_deref()
                        .is_some_and(|s| s.to_lowercase().contains(hint.as_str()))
            }
            None => true,
        }
    };

    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| matches(e))
        .filter(|e| seen.insert(e.name.to_lowercase()))
        .take(max)
        .collect()
}

/// One entity as it appears in the grounding prompt.
pub fn context_block(entity: &KnowledgeEntity) -> String {
    format!(
        "Navn: {}\nKategori: {}\nUnderkategori: {}\nVanskelighetsgrad: {}\nBeskrivelse: {}\nSted: {}\nKoordinater: ({}, {})",
        entity.name,
        entity.category,
        entity.subcategory.as_deref().filter(|s| !s.is_empty()).unwrap_or("Ingen"),
        entity.difficulty,
        entity.description,
        entity.location,
        entity.coordinates.lat,
        entity.coordinates.lng,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use baerumkart_knowledge::InMemoryStore;
    use baerumkart_schema::Coordinates;

    fn spot(name: &str, category: &str, description: &str) -> KnowledgeEntity {
        KnowledgeEntity::new(
            name,
            category,
            "lett",
            description,
            Coordinates { lat: 59.9, lng: 10.5 },
        )
        .with_location("Bærum")
    }

    fn fetcher(spots: Vec<KnowledgeEntity>) -> KnowledgeFetcher {
        KnowledgeFetcher::new(Arc::new(InMemoryStore::new(spots)))
    }

    struct FailingStore;

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn list_entities(&self) -> anyhow::Result<Vec<KnowledgeEntity>> {
            Err(anyhow!("permission denied"))
        }
    }

    #[tokio::test]
    async fn duplicates_collapse_to_first_and_cap_at_three() {
        let f = fetcher(vec![
            spot("Kolsåstoppen", "Fottur", "første"),
            spot("kolsåstoppen", "Fottur", "andre"),
            spot("Brunkollen", "Fottur", "topp"),
            spot("Vensåsen", "Fottur", "skog"),
            spot("Fossum teltplass", "Camping", "telt"),
        ]);
        let got = f.fetch(Some("tur"), None).await.unwrap();
        assert_eq!(got.entity_names, vec!["kolsåstoppen", "brunkollen", "vensåsen"]);
        assert!(got.context_text.contains("Beskrivelse: første"));
        assert!(!got.context_text.contains("Beskrivelse: andre"));
    }

    #[tokio::test]
    async fn pinned_topic_wins_over_hint() {
        let f = fetcher(vec![
            spot("Fossum teltplass", "Camping", "telt ved vannet"),
            spot("Kolsåstoppen", "Fottur", "utsikt"),
        ]);
        let got = f.fetch(Some("camping"), Some("kolsåstoppen")).await.unwrap();
        assert_eq!(got.entity_names, vec!["kolsåstoppen"]);
    }

    #[tokio::test]
    async fn specific_hint_filters_on_description_category_and_subcategory() {
        let f = fetcher(vec![
            spot("Fossum teltplass", "Camping", "Fin plass"),
            spot("Brunkollen", "Utsikt", "Gode muligheter for camping"),
            spot("Kolsåstoppen", "Fottur", "Bratt").with_subcategory("Camping-topp"),
            spot("Vensåsen", "Fottur", "Skog"),
        ]);
        let got = f.fetch(Some("camping"), None).await.unwrap();
        assert_eq!(
            got.entity_names,
            vec!["fossum teltplass", "brunkollen", "kolsåstoppen"]
        );
    }

    #[tokio::test]
    async fn empty_store_yields_empty_context() {
        let got = fetcher(vec![]).fetch(Some("fottur"), None).await.unwrap();
        assert!(got.entity_names.is_empty());
        assert_eq!(got.context_text, "");
    }

    #[tokio::test]
    async fn store_failure_is_data_unavailable() {
        let f = KnowledgeFetcher::new(Arc::new(FailingStore));
        let err = f.fetch(None, None).await.unwrap_err();
        assert!(matches!(err, ChatError::DataUnavailable(msg) if msg.contains("permission denied")));
    }

    #[test]
    fn context_block_layout() {
        let block = context_block(&KnowledgeEntity::new(
            "Kolsåstoppen",
            "Fottur",
            "lett",
            "Utsikt",
            Coordinates { lat: 59.918, lng: 10.495 },
        ));
        assert_eq!(
            block,
            "Navn: Kolsåstoppen\nKategori: Fottur\nUnderkategori: Ingen\nVanskelighetsgrad: lett\nBeskrivelse: Utsikt\nSted: \nKoordinater: (59.918, 10.495)"
        );
    }
}
