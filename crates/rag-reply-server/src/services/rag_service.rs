use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::{Namespace, TenantCache};
use crate::config::RagConfig;
use crate::database::{HistoryMessage, MessageRole, ScoredEntry, Store, TenantConfig, UsageStatus};
use crate::services::embedding_service::EmbeddingProvider;
use crate::services::i18n::{PhraseKey, Translator};
use crate::services::llm_service::{ChatMessage, LlmProvider};
use crate::services::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::utils::token_estimator::{estimate_tokens, truncate_to_tokens};

const RAG_CONTEXT_TTL: Duration = Duration::from_secs(15 * 60);
const NO_CONTEXT: &str = "(no relevant context)";

const GUARDRAILS: &str = "Only answer from the FAQ context and the conversation. \
Never invent prices, opening hours, dates or policies. \
If the context does not cover the question, say you don't know and offer to forward it to a teammate.";

fn base_instruction(lang: &str) -> String {
    format!(
        "You are the assistant of a small business answering customers on a messaging channel. \
Reply in the language with code \"{}\", in at most a few short sentences.",
        lang
    )
}

/// Token accounting for one generated (or skipped) reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageDraft {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
    pub status: UsageStatus,
}

impl UsageDraft {
    /// Reply produced without calling the provider.
    pub fn skipped() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            model: String::new(),
            status: UsageStatus::Skipped,
        }
    }

    /// Provider failed; counters stay zero.
    pub fn failed() -> Self {
        Self {
            status: UsageStatus::Failed,
            ..Self::skipped()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub usage: UsageDraft,
    /// Knowledge entries that went into the prompt.
    pub selected: Vec<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub tenant: &'a TenantConfig,
    pub sender: &'a str,
    pub text: &'a str,
    pub lang: &'a str,
    pub trace_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SelectedChunk {
    id: i64,
    score: f32,
}

/// Knowledge entries rendered for the prompt, best first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedContext {
    lines: Vec<String>,
    included: Vec<SelectedChunk>,
}

impl PackedContext {
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            self.lines.join("\n")
        }
    }

    pub fn ids(&self) -> Vec<i64> {
        self.included.iter().map(|chunk| chunk.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop the least relevant entry.
    fn pop(&mut self) -> bool {
        self.included.pop();
        self.lines.pop().is_some()
    }
}

fn format_entry(index: usize, entry: &ScoredEntry, max_chunk_tokens: usize) -> String {
    let question = truncate_to_tokens(&entry.entry.question, max_chunk_tokens / 2);
    let answer = truncate_to_tokens(&entry.entry.answer, max_chunk_tokens);
    format!("{}. Q: {}\n   A: {}", index, question, answer)
}

/// Pack ranked entries until `top_k` or the token budget is reached.
/// A first entry larger than the whole budget is trimmed rather than dropped.
pub fn pack_context(
    entries: &[ScoredEntry],
    top_k: usize,
    budget: usize,
    max_chunk_tokens: usize,
) -> PackedContext {
    let mut packed = PackedContext::default();
    let mut used = 0;

    for (index, entry) in entries.iter().take(top_k).enumerate() {
        let mut line = format_entry(index + 1, entry, max_chunk_tokens);
        let mut tokens = estimate_tokens(&line);

        if used + tokens > budget {
            if !packed.is_empty() || budget == 0 {
                break;
            }
            line = truncate_to_tokens(&line, budget);
            tokens = estimate_tokens(&line);
            if line.is_empty() || tokens > budget {
                break;
            }
        }

        used += tokens;
        packed.lines.push(line);
        packed.included.push(SelectedChunk {
            id: entry.entry.id,
            score: entry.score,
        });
    }

    packed
}

/// Retrieval-augmented reply generation with retry and token budgets.
pub struct RagService {
    store: Arc<dyn Store>,
    cache: TenantCache,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    translator: Translator,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    config: RagConfig,
    llm_enabled: bool,
}

impl RagService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: TenantCache,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmProvider>,
        translator: Translator,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            cache,
            embedder,
            llm,
            translator,
            retry: RetryPolicy::from(&crate::config::RetryConfig::default()),
            sleeper: Arc::new(TokioSleeper),
            config,
            llm_enabled: true,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    /// Global switch on top of the per-tenant flag.
    pub fn with_llm_enabled(mut self, enabled: bool) -> Self {
        self.llm_enabled = enabled;
        self
    }

    fn canned(&self, key: PhraseKey, lang: &str, usage: UsageDraft) -> Generated {
        Generated {
            text: self.translator.text(key, lang),
            usage,
            selected: Vec::new(),
        }
    }

    /// Always returns a reply: provider and store failures become the fallback text.
    /// Stored FAQ answers are served verbatim even when AI is off.
    pub async fn generate(&self, request: &GenerationRequest<'_>) -> Generated {
        let tenant_id = request.tenant.id.as_str();
        let question = request.text.trim();

        if question.is_empty() {
            return self.canned(PhraseKey::InsufficientContext, request.lang, UsageDraft::skipped());
        }

        if let Some(answer) = self.exact_match(tenant_id, question).await {
            return Generated {
                text: answer,
                usage: UsageDraft::skipped(),
                selected: Vec::new(),
            };
        }

        if !self.llm_enabled || !request.tenant.ai_enabled {
            info!(tenant_id, global = self.llm_enabled, "AI disabled, skipping generation");
            return self.canned(PhraseKey::AiDisabled, request.lang, UsageDraft::skipped());
        }

        let embedding = match self
            .retry
            .run(self.sleeper.as_ref(), "embedding", |_| self.embedder.embed(question))
            .await
        {
            Ok(embedding) => embedding,
            Err(e) => {
                error!(tenant_id, error = %e, "Query embedding failed, sending fallback");
                return self.canned(PhraseKey::Fallback, request.lang, UsageDraft::failed());
            }
        };

        let ranked = match self.rank(tenant_id, &embedding).await {
            Ok(ranked) => ranked,
            Err(e) => {
                error!(tenant_id, error = %e, "Knowledge search failed, sending fallback");
                return self.canned(PhraseKey::Fallback, request.lang, UsageDraft::failed());
            }
        };

        let history = match self
            .store
            .recent_messages(tenant_id, request.sender, self.config.history_window)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(tenant_id, error = %e, "History unavailable, answering without it");
                Vec::new()
            }
        };

        let context = pack_context(
            &ranked,
            self.config.top_k,
            self.config.context_token_budget,
            self.config.max_chunk_tokens,
        );
        let (messages, context) = self.assemble(request, context, history, question);
        let prompt_estimate = messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>();

        debug!(
            tenant_id,
            trace_id = request.trace_id,
            entries = context.included.len(),
            prompt_estimate,
            "Prompt assembled"
        );
        if !context.is_empty() {
            self.cache
                .set(
                    tenant_id,
                    Namespace::RagContext,
                    request.trace_id,
                    &context.included,
                    RAG_CONTEXT_TTL,
                )
                .await;
        }

        let completion = match self
            .retry
            .run(self.sleeper.as_ref(), "chat_completion", |_| self.llm.complete(&messages))
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                error!(tenant_id, error = %e, "Completion failed, sending fallback");
                return Generated {
                    selected: context.ids(),
                    ..self.canned(PhraseKey::Fallback, request.lang, UsageDraft::failed())
                };
            }
        };

        let prompt_tokens = if completion.prompt_tokens == 0 {
            u32::try_from(prompt_estimate).unwrap_or(u32::MAX)
        } else {
            completion.prompt_tokens
        };
        let text = completion.text.trim();
        let text = if text.is_empty() {
            self.translator.text(PhraseKey::InsufficientContext, request.lang)
        } else {
            text.to_string()
        };

        info!(
            tenant_id,
            model = %completion.model,
            prompt_tokens,
            completion_tokens = completion.completion_tokens,
            "Reply generated"
        );

        Generated {
            text,
            usage: UsageDraft {
                prompt_tokens,
                completion_tokens: completion.completion_tokens,
                model: completion.model,
                status: UsageStatus::Ok,
            },
            selected: context.ids(),
        }
    }

    /// Answer of a cached FAQ whose question equals the message.
    async fn exact_match(&self, tenant_id: &str, question: &str) -> Option<String> {
        let entries = match self.cache.knowledge(self.store.as_ref(), tenant_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(tenant_id, error = %e, "Knowledge list unavailable, skipping exact match");
                return None;
            }
        };
        let wanted = question.to_lowercase();
        let hit = entries
            .into_iter()
            .find(|entry| entry.question.trim().to_lowercase() == wanted)?;
        debug!(tenant_id, entry_id = hit.id, "Exact FAQ match");
        Some(hit.answer)
    }

    /// Searchable entries above the threshold, best first, ties by insertion order.
    async fn rank(
        &self,
        tenant_id: &str,
        embedding: &[f32],
    ) -> Result<Vec<ScoredEntry>, crate::error::StoreError> {
        let mut ranked = self
            .store
            .search_knowledge(tenant_id, embedding, self.config.top_k)
            .await?;
        ranked.retain(|scored| scored.score >= self.config.similarity_threshold);
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        Ok(ranked)
    }

    fn build_messages(
        &self,
        request: &GenerationRequest<'_>,
        tenant_prompt: &str,
        context: &PackedContext,
        history: &[HistoryMessage],
        question: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(base_instruction(request.lang)),
            ChatMessage::system(GUARDRAILS),
        ];
        if !tenant_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(tenant_prompt));
        }
        for turn in history {
            messages.push(match turn.role {
                MessageRole::Inbound => ChatMessage::user(turn.text.as_str()),
                MessageRole::Assistant => ChatMessage::assistant(turn.text.as_str()),
            });
        }
        messages.push(ChatMessage::user(format!(
            "FAQ context:\n{}\nUser question: \"{}\"\nAnswer in {}. If the context is insufficient, say you don't know.",
            context.render(),
            question,
            request.lang
        )));
        messages
    }

    /// Fit the prompt under the ceiling: oldest history goes first, then the
    /// least relevant entries, then the tenant prompt. The question is kept whole.
    fn assemble(
        &self,
        request: &GenerationRequest<'_>,
        mut context: PackedContext,
        mut history: Vec<HistoryMessage>,
        question: &str,
    ) -> (Vec<ChatMessage>, PackedContext) {
        let ceiling = self.config.prompt_token_ceiling;
        let mut tenant_prompt = request.tenant.system_prompt.as_str();

        loop {
            let messages = self.build_messages(request, tenant_prompt, &context, &history, question);
            let total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
            if total <= ceiling {
                return (messages, context);
            }

            if !history.is_empty() {
                history.remove(0);
            } else if context.pop() {
                debug!(tenant_id = %request.tenant.id, "Dropped knowledge entry to fit prompt ceiling");
            } else if !tenant_prompt.is_empty() {
                tenant_prompt = "";
            } else {
                warn!(
                    tenant_id = %request.tenant.id,
                    total,
                    ceiling,
                    "Prompt still over ceiling with only the question left"
                );
                return (messages, context);
            }
        }
    }
}
