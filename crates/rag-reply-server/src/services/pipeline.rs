//! `handle_inbound`: one inbound event in, at most one reply out.
//!
//! Order of work per event:
//! validate -> resolve tenant -> lock (tenant, sender) -> dedup -> session ->
//! classify -> wizard | booking | retrieval -> commit exchange -> invalidate.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::TenantCache;
use crate::config::Settings;
use crate::database::{
    ExchangeCommit, ExchangeEffect, ExchangeWrite, LanguagePolicy, MessageRole, NewMessage,
    NewUnavailability, Store, TenantConfig, UsageStatus,
};
use crate::error::{PipelineError, StoreError};
use crate::models::{DropReason, InboundEvent, InboundOutcome, OutboundReply};
use crate::services::booking::{booking_reply, evaluate_booking, BookingDecision};
use crate::services::clock::Clock;
use crate::services::conversation::{wizard, ConversationSession, Intent, IntentClassifier, WizardStep};
use crate::services::i18n::{detect_language, normalize_lang, PhraseKey, Translator};
use crate::services::rag_service::{GenerationRequest, RagService, UsageDraft};
use crate::services::resolver::{ResolvedSession, SessionRegistry, TenantResolver};
use crate::services::usage_ledger::UsageLedger;

/// What one claimed message produces before it is committed.
struct Turn {
    reply: OutboundReply,
    session: Option<ConversationSession>,
    effect: ExchangeEffect,
    usage: UsageDraft,
    /// Evict the tenant's cached entries after commit.
    invalidate: bool,
}

impl Turn {
    fn reply(reply: OutboundReply) -> Self {
        Self {
            reply,
            session: None,
            effect: ExchangeEffect::None,
            usage: UsageDraft::skipped(),
            invalidate: false,
        }
    }
}

/// Inputs to reply-language selection, highest priority first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanguageSignals<'a> {
    pub policy: Option<&'a LanguagePolicy>,
    pub trigger: Option<&'a str>,
    pub hint: Option<&'a str>,
    pub session: Option<&'a str>,
    pub text: &'a str,
}

/// Fixed tenant policy, trigger word, channel hint, session language,
/// detection, then the configured default.
pub fn select_language(signals: &LanguageSignals<'_>, default_language: &str) -> String {
    if let Some(LanguagePolicy::Fixed(code)) = signals.policy {
        if let Some(code) = normalize_lang(code) {
            return code;
        }
    }
    [signals.trigger, signals.hint, signals.session]
        .into_iter()
        .flatten()
        .find_map(normalize_lang)
        .or_else(|| detect_language(signals.text).map(str::to_string))
        .unwrap_or_else(|| default_language.to_string())
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    cache: TenantCache,
    tenants: TenantResolver,
    sessions: SessionRegistry,
    classifier: IntentClassifier,
    generator: RagService,
    ledger: UsageLedger,
    translator: Translator,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        cache: TenantCache,
        generator: RagService,
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants: TenantResolver::new(store.clone(), cache.clone()),
            sessions: SessionRegistry::new(store.clone(), settings.conversation.session_timeout_secs),
            classifier: IntentClassifier::new(&settings.conversation.trigger_words),
            ledger: UsageLedger::new(store.clone()),
            translator: Translator::new(&settings.i18n.default_language),
            store,
            cache,
            generator,
            clock,
        }
    }

    pub fn prune_locks(&self) -> usize {
        self.sessions.prune_locks()
    }

    /// Never fails: errors become a drop, or a degraded reply the transport should redeliver.
    pub async fn handle_inbound(&self, event: InboundEvent) -> InboundOutcome {
        if let Some(field) = event.missing_field() {
            let err = PipelineError::MalformedEvent(format!("missing {}", field));
            warn!(channel = %event.channel, message_id = %event.channel_message_id, kind = ?err.kind(), error = %err, "Dropping inbound event");
            return InboundOutcome::Dropped(DropReason::Malformed);
        }

        let tenant = match self
            .tenants
            .resolve_tenant(event.channel, &event.external_tenant_id)
            .await
        {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                let err = PipelineError::TenantNotFound {
                    channel: event.channel.to_string(),
                    external_id: event.external_tenant_id.clone(),
                };
                warn!(message_id = %event.channel_message_id, kind = ?err.kind(), error = %err, "Dropping inbound event");
                return InboundOutcome::Dropped(DropReason::TenantNotFound);
            }
            Err(e) => {
                let lang = self.fallback_language(&event);
                return self.degraded(PipelineError::from(e), &event, &lang);
            }
        };

        let key = event.key(&tenant.id);
        let sender = key.sender.clone();
        let _guard = self.sessions.lock(&tenant.id, &sender).await;

        match self.store.message_exists(&key).await {
            Ok(true) => {
                info!(tenant_id = %tenant.id, message_id = %event.channel_message_id, "Duplicate delivery dropped");
                return InboundOutcome::Dropped(DropReason::Duplicate);
            }
            Ok(false) => {}
            Err(e) => {
                let lang = self.fallback_language(&event);
                return self.degraded(PipelineError::from(e), &event, &lang);
            }
        }

        let now = self.clock.now();
        let resolved = match self.sessions.resolve_session(&tenant.id, &sender, now).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let lang = self.fallback_language(&event);
                return self.degraded(PipelineError::from(e), &event, &lang);
            }
        };

        let text = event.text.trim();
        let trigger = self.classifier.trigger_language(text);
        let lang = select_language(
            &LanguageSignals {
                policy: Some(&tenant.language_policy),
                trigger,
                hint: event.language_hint.as_deref(),
                session: resolved.session.lang.as_deref(),
                text,
            },
            self.translator.default_language(),
        );
        let intent = self.classifier.classify(text, &resolved.session.state, now);
        debug!(
            tenant_id = %tenant.id,
            sender = %sender,
            state = resolved.session.state.tag(),
            intent = ?intent,
            lang = %lang,
            "Inbound classified"
        );

        let trace_id = uuid::Uuid::new_v4().to_string();
        let turn = match self
            .claim(&tenant, &sender, &resolved, intent, text, &lang, &trace_id)
            .await
        {
            Ok(turn) => turn,
            Err(e) => return self.degraded(e, &event, &lang),
        };

        self.commit(&tenant, &sender, &event, &lang, &trace_id, turn).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn claim(
        &self,
        tenant: &TenantConfig,
        sender: &str,
        resolved: &ResolvedSession,
        intent: Intent,
        text: &str,
        lang: &str,
        trace_id: &str,
    ) -> Result<Turn, PipelineError> {
        let session = &resolved.session;
        let now = self.clock.now();
        // a timed-out wizard is persisted back to idle
        let reset = resolved.expired.then(|| session.clone());

        match intent {
            Intent::StartWizard if !tenant.is_owner(sender) => {
                info!(tenant_id = %tenant.id, sender, "Vacation trigger from non-owner denied");
                let mut turn = Turn::reply(OutboundReply::text(
                    self.translator.text(PhraseKey::VacationDenied, lang),
                    lang,
                ));
                turn.session = reset;
                Ok(turn)
            }
            Intent::StartWizard => {
                info!(tenant_id = %tenant.id, sender, restart = session.state.is_active(), "Vacation wizard started");
                Ok(self.wizard_turn(tenant, sender, session, wizard::start(), lang, now, 0))
            }
            Intent::ContinueWizard => {
                let Some(step) = wizard::advance(session.state, text, now.date_naive()) else {
                    return self.retrieval_turn(tenant, sender, text, lang, trace_id, reset).await;
                };
                if !step.transitioned(session.state) {
                    debug!(tenant_id = %tenant.id, sender, state = session.state.tag(), reply = ?step.reply, "Wizard input rejected, re-prompting");
                }
                let overlaps = match step.commit {
                    Some((start, end)) => {
                        let overlapping = self
                            .store
                            .overlapping_unavailability(&tenant.id, start, end)
                            .await?;
                        if !overlapping.is_empty() {
                            warn!(tenant_id = %tenant.id, %start, %end, overlaps = overlapping.len(), "New unavailability overlaps existing blocks");
                        }
                        overlapping.len()
                    }
                    None => 0,
                };
                Ok(self.wizard_turn(tenant, sender, session, step, lang, now, overlaps))
            }
            Intent::Booking { starts_at } => {
                let decision = evaluate_booking(self.store.as_ref(), &tenant.id, sender, starts_at).await?;
                let mut turn = Turn::reply(booking_reply(&self.translator, &decision, starts_at, lang));
                if let BookingDecision::Accept(appointment) = decision {
                    turn.effect = ExchangeEffect::Appointment(appointment);
                }
                turn.session = reset;
                Ok(turn)
            }
            Intent::Retrieval => self.retrieval_turn(tenant, sender, text, lang, trace_id, reset).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn wizard_turn(
        &self,
        tenant: &TenantConfig,
        sender: &str,
        session: &ConversationSession,
        step: WizardStep,
        lang: &str,
        now: chrono::DateTime<chrono::Utc>,
        overlaps: usize,
    ) -> Turn {
        let args: Vec<(&str, &str)> = step.args.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let mut text = self.translator.render(step.reply, lang, &args);
        if overlaps > 0 {
            let count = overlaps.to_string();
            text.push('\n');
            text.push_str(&self.translator.render(PhraseKey::VacationOverlap, lang, &[("count", &count)]));
        }

        let effect = match step.commit {
            Some((starts_on, ends_on)) => ExchangeEffect::Unavailability(NewUnavailability {
                tenant_id: tenant.id.clone(),
                owner_phone: crate::database::normalize_phone(sender),
                starts_on,
                ends_on,
            }),
            None => ExchangeEffect::None,
        };
        let next_lang = step.next.is_active().then(|| lang.to_string());

        Turn {
            reply: OutboundReply::text(text, lang),
            session: Some(session.with_state(step.next, next_lang, now)),
            invalidate: step.commit.is_some(),
            effect,
            usage: UsageDraft::skipped(),
        }
    }

    async fn retrieval_turn(
        &self,
        tenant: &TenantConfig,
        sender: &str,
        text: &str,
        lang: &str,
        trace_id: &str,
        reset: Option<ConversationSession>,
    ) -> Result<Turn, PipelineError> {
        let generated = self
            .generator
            .generate(&GenerationRequest {
                tenant,
                sender,
                text,
                lang,
                trace_id,
            })
            .await;
        let mut turn = Turn::reply(OutboundReply::text(generated.text, lang));
        turn.usage = generated.usage;
        turn.session = reset;
        Ok(turn)
    }

    fn exchange(
        &self,
        tenant: &TenantConfig,
        sender: &str,
        event: &InboundEvent,
        trace_id: &str,
        turn: &Turn,
    ) -> ExchangeWrite {
        let now = self.clock.now();
        let generated = turn.usage.status == UsageStatus::Ok;
        let as_i32 = |tokens: u32| i32::try_from(tokens).unwrap_or(i32::MAX);

        ExchangeWrite {
            inbound: NewMessage {
                tenant_id: tenant.id.clone(),
                channel: event.channel,
                sender: sender.to_string(),
                role: MessageRole::Inbound,
                text: event.text.clone(),
                channel_message_id: Some(event.channel_message_id.clone()),
                prompt_tokens: None,
                completion_tokens: None,
                ts: event.timestamp,
            },
            outbound: NewMessage {
                tenant_id: tenant.id.clone(),
                channel: event.channel,
                sender: sender.to_string(),
                role: MessageRole::Assistant,
                text: turn.reply.text.clone(),
                channel_message_id: None,
                prompt_tokens: generated.then(|| as_i32(turn.usage.prompt_tokens)),
                completion_tokens: generated.then(|| as_i32(turn.usage.completion_tokens)),
                ts: now,
            },
            usage: UsageLedger::exchange_records(
                &tenant.id,
                &event.key(&tenant.id).reference(),
                trace_id,
                &turn.usage,
            ),
            session: turn.session.clone(),
            effect: turn.effect.clone(),
        }
    }

    async fn commit(
        &self,
        tenant: &TenantConfig,
        sender: &str,
        event: &InboundEvent,
        lang: &str,
        trace_id: &str,
        mut turn: Turn,
    ) -> InboundOutcome {
        let mut write = self.exchange(tenant, sender, event, trace_id, &turn);
        let mut result = self.store.commit_exchange(&write).await;

        let conflict_at = match (&result, &turn.effect) {
            (Err(StoreError::SlotTaken), ExchangeEffect::Appointment(appointment)) => Some(appointment.starts_at),
            _ => None,
        };
        if let Some(starts_at) = conflict_at {
            info!(tenant_id = %tenant.id, %starts_at, "Slot taken concurrently, replying with conflict");
            turn.reply = booking_reply(&self.translator, &BookingDecision::Conflict, starts_at, lang);
            turn.effect = ExchangeEffect::None;
            write = self.exchange(tenant, sender, event, trace_id, &turn);
            result = self.store.commit_exchange(&write).await;
        }

        match result {
            Ok(ExchangeCommit::Committed { effect_id }) => {
                if turn.invalidate {
                    self.cache.invalidate(&tenant.id, None).await;
                }
                info!(
                    tenant_id = %tenant.id,
                    message_id = %event.channel_message_id,
                    effect_id = ?effect_id,
                    usage_status = turn.usage.status.as_str(),
                    "Exchange committed"
                );
                InboundOutcome::Replied(turn.reply)
            }
            Ok(ExchangeCommit::Duplicate) => {
                info!(tenant_id = %tenant.id, message_id = %event.channel_message_id, "Duplicate detected at commit");
                InboundOutcome::Dropped(DropReason::Duplicate)
            }
            Err(e) => {
                self.ledger.record_all(&write.usage).await;
                self.degraded(PipelineError::from(e), event, lang)
            }
        }
    }

    fn fallback_language(&self, event: &InboundEvent) -> String {
        select_language(
            &LanguageSignals {
                hint: event.language_hint.as_deref(),
                text: &event.text,
                ..LanguageSignals::default()
            },
            self.translator.default_language(),
        )
    }

    fn degraded(&self, err: PipelineError, event: &InboundEvent, lang: &str) -> InboundOutcome {
        error!(
            channel = %event.channel,
            message_id = %event.channel_message_id,
            kind = ?err.kind(),
            error = %err,
            "Inbound processing failed, replying with apology"
        );
        InboundOutcome::Degraded(OutboundReply::text(
            self.translator.text(PhraseKey::Apology, lang),
            lang,
        ))
    }
}
