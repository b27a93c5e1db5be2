//! End-to-end tests over the in-memory store, a fixed clock and mocked providers.


use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache::{CacheBackend, MemoryBackend, TenantCache};
use crate::config::{RetryConfig, Settings};
use crate::database::memory::MemoryStore;
use crate::database::{ChannelCredential, LanguagePolicy, TenantConfig};
use crate::models::{Channel, InboundEvent};
use crate::services::clock::testing::FixedClock;
use crate::services::embedding_service::MockEmbeddingProvider;
use crate::services::i18n::Translator;
use crate::services::llm_service::{Completion, MockLlmProvider};
use crate::services::retry::testing::RecordingSleeper;
use crate::services::retry::RetryPolicy;
use crate::services::{Pipeline, RagService};

pub const OWNER: &str = "+33611111111";
pub const CUSTOMER: &str = "+33622222222";
pub const EXTERNAL_ID: &str = "wa-100";

pub fn salon() -> TenantConfig {
    TenantConfig {
        id: "salon".into(),
        system_prompt: "We are a hair salon in Lyon.".into(),
        language_policy: LanguagePolicy::Auto,
        ai_enabled: true,
        owner_phones: vec![OWNER.into()],
        channels: vec![
            ChannelCredential {
                channel: Channel::Whatsapp,
                external_id: EXTERNAL_ID.into(),
                credential: None,
            },
            ChannelCredential {
                channel: Channel::Telegram,
                external_id: "tg-bot".into(),
                credential: None,
            },
        ],
    }
}

pub fn completion(text: &str) -> Completion {
    Completion {
        text: text.into(),
        prompt_tokens: 120,
        completion_tokens: 18,
        model: "gpt-4.1-nano".into(),
    }
}

pub fn answering_llm(text: &'static str) -> MockLlmProvider {
    let mut llm = MockLlmProvider::new();
    llm.expect_complete().returning(move |_| Ok(completion(text)));
    llm
}

pub fn embedder() -> MockEmbeddingProvider {
    let mut embedder = MockEmbeddingProvider::new();
    embedder.expect_embed().returning(|_| Ok(vec![1.0, 0.0]));
    embedder
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub sleeper: Arc<RecordingSleeper>,
    pub cache: TenantCache,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>, llm: MockLlmProvider) -> Self {
        Self::with_backend(now, embedder(), llm, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(
        now: DateTime<Utc>,
        embedder: MockEmbeddingProvider,
        llm: MockLlmProvider,
        backend: Arc<dyn CacheBackend>,
    ) -> Self {
        let settings = Settings::default();
        let store = Arc::new(MemoryStore::new());
        store.add_tenant(salon());
        store.add_knowledge("salon", "What are your opening hours?", "Nine to six, Monday to Saturday.", Some(vec![1.0, 0.0]));

        let cache = TenantCache::new(backend, &settings.cache);
        let clock = Arc::new(FixedClock::at(now));
        let sleeper = Arc::new(RecordingSleeper::default());

        let generator = RagService::new(
            store.clone(),
            cache.clone(),
            Arc::new(embedder),
            Arc::new(llm),
            Translator::new(&settings.i18n.default_language),
            settings.rag.clone(),
        )
        .with_retry(RetryPolicy::from(&RetryConfig::default()), sleeper.clone());

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            cache.clone(),
            generator,
            &settings,
            clock.clone(),
        ));

        Self {
            store,
            clock,
            sleeper,
            cache,
            pipeline,
        }
    }

    pub fn event(&self, sender: &str, message_id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            channel: Channel::Whatsapp,
            external_tenant_id: EXTERNAL_ID.into(),
            sender_id: sender.into(),
            text: text.into(),
            channel_message_id: message_id.into(),
            timestamp: crate::services::clock::Clock::now(self.clock.as_ref()),
            language_hint: None,
        }
    }
}
