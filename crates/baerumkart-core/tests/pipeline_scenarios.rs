use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use baerumkart_core::{
    BaerumkartConfig, ChatService, MainConfig, RulesConfig, Vocabulary, APOLOGY_REPLY,
    INSUFFICIENT_DATA_REPLY, OUT_OF_REGION_REPLY,
};
use baerumkart_knowledge::{InMemoryStore, KnowledgeStore};
use baerumkart_provider::{
    LlmProvider, LlmRequest, LlmResponse, ProviderError, ProviderErrorKind,
};
use baerumkart_schema::{Coordinates, Intent, KnowledgeEntity};

/// Replays queued answers and records every request it sees.
#[derive(Default)]
struct ScriptedProvider {
    answers: Mutex<VecDeque<anyhow::Result<String>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn answering(answers: Vec<anyhow::Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(INSUFFICIENT_DATA_REPLY.to_string()));
        next.map(|text| LlmResponse {
            text,
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}

struct BrokenStore;

#[async_trait]
impl KnowledgeStore for BrokenStore {
    async fn list_entities(&self) -> anyhow::Result<Vec<KnowledgeEntity>> {
        Err(anyhow!("firestore unavailable"))
    }
}

fn spots() -> Vec<KnowledgeEntity> {
    let at = Coordinates { lat: 59.93, lng: 10.5 };
    vec![
        KnowledgeEntity::new("Kolsåstoppen", "Fottur", "lett", "Fottur med utsikt", at)
            .with_subcategory("Topptur")
            .with_location("Kolsås"),
        KnowledgeEntity::new("Fossum teltplass", "Camping", "lett", "Teltplass ved dammen", at)
            .with_location("Fossum"),
        KnowledgeEntity::new("Brunkollen", "Utsiktspunkt", "moderat", "Topp i marka", at)
            .with_location("Bærumsmarka"),
    ]
}

fn config() -> BaerumkartConfig {
    let main: MainConfig = serde_yaml::from_str(
        r#"
app: {name: baerumkart, env: test}
provider: {type: stub}
knowledge: {kind: memory}
"#,
    )
    .unwrap();
    BaerumkartConfig {
        main,
        rules: RulesConfig::default(),
        vocabulary: Vocabulary::default(),
    }
}

fn service_with(store: Arc<dyn KnowledgeStore>, provider: Arc<ScriptedProvider>) -> ChatService {
    let config = config();
    ChatService::with_parts(&config, Arc::new(config.vocabulary.clone()), store, provider)
}

fn service(provider: Arc<ScriptedProvider>) -> ChatService {
    service_with(Arc::new(InMemoryStore::new(spots())), provider)
}

#[tokio::test(start_paused = true)]
async fn greeting_is_answered_without_provider() {
    let provider = ScriptedProvider::answering(vec![]);
    let chat = service(provider.clone());

    let reply = chat.submit_message("s1", "Hei!").await;
    assert_eq!(
        reply,
        "Hei! Hva har du lyst til å snakke om i dag – kanskje en tur i Bærum?"
    );
    assert!(provider.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recommendation_is_grounded_and_enhanced() {
    let provider = ScriptedProvider::answering(vec![Ok(
        "Jeg anbefaler Kolsåstoppen (lett).".to_string()
    )]);
    let chat = service(provider.clone());

    let reply = chat
        .submit_message("s1", "Kan du anbefale en fottur i Bærum?")
        .await;
    assert_eq!(
        reply,
        "Jeg anbefaler Kolsåstoppen (lett).\n\nHåper det passer planene dine! Vil du vite mer om hvordan du kommer dit?"
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let system = requests[0].system.as_deref().unwrap();
    assert!(system.contains("Navn: Kolsåstoppen"));
    // "fottur" filters on description and category
    assert!(!system.contains("Navn: Brunkollen"));
    assert_eq!(requests[0].model, "deepseek/deepseek-r1:free");
    assert_eq!(requests[0].max_tokens, 1000);
    assert_eq!(requests[0].temperature, Some(0.7));

    let transcript = chat.transcript("s1").await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].text, reply);
}

#[tokio::test(start_paused = true)]
async fn follow_up_without_region_is_refused() {
    let provider = ScriptedProvider::answering(vec![Ok("Prøv Kolsåstoppen.".to_string())]);
    let chat = service(provider.clone());

    chat.submit_message("s1", "Jeg vil på fottur").await;
    let reply = chat.submit_message("s1", "Hva med camping?").await;

    assert_eq!(reply, OUT_OF_REGION_REPLY);
    assert_eq!(provider.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sentinel_answers_fall_back_by_intent_and_topic() {
    let provider = ScriptedProvider::answering(vec![
        // names no grounded spot, so it is rejected
        Ok("Vettakollen er fin.".to_string()),
        Ok(INSUFFICIENT_DATA_REPLY.to_string()),
    ]);
    let chat = service(provider.clone());

    let info = chat
        .submit_message("s1", "Fortell meg mer om Kolsåstoppen i Bærum")
        .await;
    assert!(info.starts_with("Jeg har ikke flere detaljer om kolsåstoppen akkurat nå, men det ligger i Bærumsmarka"));

    let duration = chat
        .submit_message("s1", "Hvor lang tid tar det fra Sandvika?")
        .await;
    assert_eq!(
        duration,
        "Jeg har ikke nøyaktige tider fra Sandvika til kolsåstoppen, men det er en lett tur, så jeg vil anslå 1-2 timer tur-retur. Hvor fort pleier du å gå?"
    );

    // the pinned topic narrows the context to that spot
    let requests = provider.requests();
    let system = requests[1].system.as_deref().unwrap();
    assert!(system.contains("Navn: Kolsåstoppen"));
    assert!(!system.contains("Navn: Fossum teltplass"));

    let state = chat.conversation_state("s1").await.unwrap();
    assert_eq!(state.current_topic.as_deref(), Some("kolsåstoppen"));
    assert_eq!(state.last_intent, Intent::Duration);
}

#[tokio::test(start_paused = true)]
async fn elliptical_follow_up_continues_on_current_topic() {
    let provider = ScriptedProvider::answering(vec![
        Ok("Brunkollen er moderat.".to_string()),
        Ok("Ja, Brunkollen har parkering i nærheten.".to_string()),
    ]);
    let chat = service(provider.clone());

    chat.submit_message("s1", "Hva med Brunkollen i Bærum?").await;
    // no trip keyword, but a topic is pinned
    let reply = chat.submit_message("s1", "Er det parkering der?").await;

    assert_eq!(
        reply,
        "Ja, Brunkollen har parkering i nærheten.\n\nDer har du parkeringstips! Trenger du hjelp med noe annet til turen?"
    );
    assert_eq!(provider.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn provider_throttle_is_retried_after_its_delay() {
    let throttle = ProviderError::new("openrouter", ProviderErrorKind::RateLimit, "free-models-per-min")
        .with_status(429)
        .with_retry_after(30);
    let provider = ScriptedProvider::answering(vec![
        Err(throttle.into()),
        Ok("Fossum teltplass (lett) passer til camping.".to_string()),
    ]);
    let chat = service(provider.clone());

    let started = tokio::time::Instant::now();
    let submit = {
        let chat = chat.clone();
        tokio::spawn(async move { chat.submit_message("s1", "Camping i Bærum?").await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    let countdown = chat.pending_delay_seconds("s1").await;
    assert!((28..=30).contains(&countdown), "countdown was {countdown}");
    assert!(chat.transcript("s1").await[1].pending);

    let reply = submit.await.unwrap();
    assert!(reply.starts_with("Fossum teltplass (lett) passer til camping."));
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(provider.requests().len(), 2);
    assert_eq!(chat.stats().await.requeued, 1);
    assert_eq!(chat.pending_delay_seconds("s1").await, 0);
}

#[tokio::test(start_paused = true)]
async fn store_failure_resolves_with_apology() {
    let provider = ScriptedProvider::answering(vec![]);
    let chat = service_with(Arc::new(BrokenStore), provider.clone());

    let reply = chat.submit_message("s1", "Anbefale en tur i Bærum").await;
    assert_eq!(reply, APOLOGY_REPLY);
    assert!(provider.requests().is_empty());
    assert_eq!(chat.stats().await.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn sessions_do_not_share_conversation_state() {
    let provider = ScriptedProvider::answering(vec![Ok("Kolsåstoppen er lett.".to_string())]);
    let chat = service(provider);

    chat.submit_message("a", "Fortell meg om Kolsåstoppen i Bærum").await;
    chat.submit_message("b", "hei").await;

    let a = chat.conversation_state("a").await.unwrap();
    let b = chat.conversation_state("b").await.unwrap();
    assert_eq!(a.current_topic.as_deref(), Some("kolsåstoppen"));
    assert!(b.current_topic.is_none());

    assert!(chat.reset("a").await);
    assert!(chat.transcript("a").await.is_empty());
    assert!(chat.conversation_state("a").await.unwrap().current_topic.is_none());
}

#[tokio::test(start_paused = true)]
async fn reset_discards_message_still_waiting_in_queue() {
    let provider = ScriptedProvider::answering(vec![Ok("Kolsåstoppen er lett.".to_string())]);
    let chat = service(provider.clone());

    chat.submit_message("s1", "hei").await;
    let pending = {
        let chat = chat.clone();
        tokio::spawn(async move {
            chat.submit_message("s1", "Fortell meg om Kolsåstoppen i Bærum").await
        })
    };
    // still inside the spacing window, so the second message is queued
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(chat.pending_delay_seconds("s1").await, 2);

    assert!(chat.reset("s1").await);
    assert_eq!(pending.await.unwrap(), APOLOGY_REPLY);

    assert!(provider.requests().is_empty());
    assert!(chat.transcript("s1").await.is_empty());
    let state = chat.conversation_state("s1").await.unwrap();
    assert!(state.current_topic.is_none());
}

#[tokio::test(start_paused = true)]
async fn bare_start_place_follow_up_uses_topic_fallback() {
    let provider = ScriptedProvider::answering(vec![
        Ok("Kolsåstoppen er en lett topptur.".to_string()),
        Ok(INSUFFICIENT_DATA_REPLY.to_string()),
    ]);
    let chat = service(provider.clone());

    chat.submit_message("s1", "Fortell meg mer om Kolsåstoppen i Bærum").await;
    // no duration cue in the message itself, so the intent drops to general
    let reply = chat.submit_message("s1", "fra Sandvika?").await;

    assert_eq!(
        reply,
        "Jeg har ikke flere detaljer om kolsåstoppen akkurat nå, men jeg kan fortelle deg mer om området hvis du vil. Hva er du nysgjerrig på?"
    );
    let state = chat.conversation_state("s1").await.unwrap();
    assert_eq!(state.last_intent, Intent::General);
    assert_eq!(provider.requests().len(), 2);
}
