//! Request pipeline
//!
//! A translation request moves through
//! `received → rate-limit-checked → credential-resolved → model-gate-checked
//! → upstream-streaming → aggregated → persisted`. Any step can end the
//! request; nothing is retried.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::aggregator::aggregate;
use crate::core::client::{ChatModel, ChatRequest};
use crate::core::config::GatewayConfig;
use crate::core::credentials::{ApiCredential, CredentialSelector, ResolvedCredential};
use crate::core::crypto::CredentialCipher;
use crate::core::errors::{GatewayError, Result};
use crate::core::identifier::resolve_identifier;
use crate::core::model_gate::{default_model, ensure_allowed};
use crate::core::models::{
    initials, ActivityItem, ActivityKind, Challenge, DashboardStats, InputMethod,
    LeaderboardEntry, LeaderboardPeriod, Practice, PracticeOutcome, PublicTranslation,
    Translation, TranslationRequest, UserSettings, VoteStatus, VoteType,
};
use crate::core::prompts::{evaluation_prompt, parse_feedback, translation_prompt};
use crate::core::ratelimit::{CounterStore, Pool, RateLimiter};
use crate::core::repository::{Repository, RepositoryCredentials};

const FEED_DEFAULT: usize = 10;
const FEED_MAX: usize = 50;
const PAGE_MAX: usize = 100;
const LEADERBOARD_MAX: usize = 100;
const HISTORY_MAX: usize = 50;
const ACTIVITY_DEFAULT: usize = 10;
const ACTIVITY_MAX: usize = 20;
const ACTIVITY_TITLE_CHARS: usize = 100;

/// Who is calling, as established by the fronting auth layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: Option<String>,
    pub forwarded_for: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            forwarded_for: None,
        }
    }

    pub fn with_forwarded_for(mut self, forwarded_for: impl Into<String>) -> Self {
        self.forwarded_for = Some(forwarded_for.into());
        self
    }

    /// Rate limit key for this caller
    pub fn identifier(&self) -> String {
        resolve_identifier(self.user_id.as_deref(), self.forwarded_for.as_deref())
    }

    /// Rate limit key ignoring the session
    pub fn network_identifier(&self) -> String {
        resolve_identifier(None, self.forwarded_for.as_deref())
    }

    pub fn require_user(&self) -> Result<&str> {
        self.user_id.as_deref().ok_or(GatewayError::Unauthenticated)
    }
}

/// Ties the gating components to the model and the repository
#[derive(Clone)]
pub struct TranslationGateway {
    limiter: RateLimiter,
    credentials: CredentialSelector,
    model: Arc<dyn ChatModel>,
    repository: Arc<dyn Repository>,
    upstream_timeout: Duration,
    min_input_chars: usize,
    max_input_chars: usize,
}

impl TranslationGateway {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn CounterStore>,
        model: Arc<dyn ChatModel>,
        repository: Arc<dyn Repository>,
    ) -> Result<Self> {
        let cipher = CredentialCipher::new(config.encryption_secret.clone())?;
        let credentials = CredentialSelector::new(
            Arc::new(RepositoryCredentials(repository.clone())),
            cipher,
            ApiCredential::new(config.shared_api_key.clone()),
        );

        Ok(Self {
            limiter: RateLimiter::from_config(store, config),
            credentials,
            model,
            repository,
            upstream_timeout: config.upstream_timeout(),
            min_input_chars: config.min_input_chars,
            max_input_chars: config.max_input_chars,
        })
    }

    /// Swap the credential selector, e.g. to tune the cipher work factor
    pub fn with_credentials(mut self, credentials: CredentialSelector) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Make sure the caller has a user record. Anonymous callers are a no-op.
    pub async fn register_caller(&self, ctx: &RequestContext, name: Option<&str>) -> Result<()> {
        if let Some(user_id) = ctx.user_id.as_deref() {
            self.repository
                .ensure_user(user_id, name.unwrap_or(user_id))
                .await?;
        }
        Ok(())
    }

    /// Rewrite technical text for an audience and store the result
    pub async fn create_translation(
        &self,
        ctx: &RequestContext,
        request: TranslationRequest,
    ) -> Result<Translation> {
        let user_id = ctx.require_user()?;
        self.validate_length("technicalText", &request.technical_text, self.min_input_chars)?;

        self.limiter.enforce(Pool::Translation, &ctx.identifier()).await?;

        let resolved = self.credentials.resolve(Some(user_id)).await;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| default_model(resolved.is_privileged).to_string());

        if let Err(e) = ensure_allowed(&model, resolved.is_privileged) {
            warn!(user_id = %user_id, model = %model, "Model rejected for shared credential");
            return Err(e);
        }

        let prompt = translation_prompt(&request.technical_text, request.audience_type);
        let simplified_text = self
            .run_model(ChatRequest::new(model.clone(), prompt), &resolved)
            .await?;

        let now = Utc::now();
        let translation = Translation {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            technical_text: request.technical_text,
            simplified_text,
            audience_type: request.audience_type,
            input_method: if request.audio_file_id.is_some() {
                InputMethod::Voice
            } else {
                InputMethod::Text
            },
            audio_file_id: request.audio_file_id,
            is_public: request.is_public.unwrap_or(false),
            ai_model: model,
            view_count: 0,
            upvotes_count: 0,
            created_at: now,
            updated_at: now,
        };

        let stored = self.repository.insert_translation(translation).await?;
        info!(
            translation_id = %stored.id,
            user_id = %user_id,
            model = %stored.ai_model,
            privileged = resolved.is_privileged,
            "Translation created"
        );

        Ok(stored)
    }

    /// Score a practice explanation and award the challenge XP
    pub async fn submit_practice(
        &self,
        ctx: &RequestContext,
        challenge_id: &str,
        user_explanation: &str,
    ) -> Result<PracticeOutcome> {
        let user_id = ctx.require_user()?;
        self.validate_length("userExplanation", user_explanation, 1)?;

        self.limiter.enforce(Pool::Practice, &ctx.identifier()).await?;

        let challenge = self
            .repository
            .get_challenge(challenge_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or(GatewayError::NotFound { entity: "Challenge" })?;

        let resolved = self.credentials.resolve(Some(user_id)).await;
        let model = default_model(false);
        ensure_allowed(model, resolved.is_privileged)?;

        let prompt = evaluation_prompt(user_explanation, Some(&challenge.title));
        let raw = self
            .run_model(ChatRequest::new(model, prompt), &resolved)
            .await?;
        let feedback = parse_feedback(&raw)?;

        let practice = self
            .repository
            .insert_practice(Practice {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                user_input: user_explanation.to_string(),
                input_method: InputMethod::Text,
                feedback_text: feedback.feedback.clone(),
                score: feedback.score,
                suggestions: feedback.suggestions.clone(),
                challenge_prompt: challenge.title.clone(),
                created_at: Utc::now(),
            })
            .await?;

        self.repository.add_xp(user_id, challenge.xp_reward).await?;
        info!(
            user_id = %user_id,
            challenge_id = %challenge.id,
            score = feedback.score,
            xp = challenge.xp_reward,
            "Practice evaluated"
        );

        Ok(PracticeOutcome {
            practice,
            feedback,
            xp_earned: challenge.xp_reward,
        })
    }

    /// Fetch one of the caller's translations
    pub async fn get_translation(&self, ctx: &RequestContext, id: Uuid) -> Result<Translation> {
        let user_id = ctx.require_user()?;
        self.owned_translation(user_id, id).await
    }

    pub async fn set_visibility(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        is_public: bool,
    ) -> Result<Translation> {
        let user_id = ctx.require_user()?;
        self.owned_translation(user_id, id).await?;

        let updated = self.repository.set_visibility(id, is_public).await?;
        info!(translation_id = %id, is_public, "Translation visibility changed");
        Ok(updated)
    }

    pub async fn delete_translation(&self, ctx: &RequestContext, id: Uuid) -> Result<()> {
        let user_id = ctx.require_user()?;
        self.owned_translation(user_id, id).await?;

        self.repository.delete_translation(id).await?;
        info!(translation_id = %id, "Translation deleted");
        Ok(())
    }

    /// The caller's translations, newest first. `page` starts at 1.
    pub async fn list_translations(
        &self,
        ctx: &RequestContext,
        page: Option<usize>,
        limit: Option<usize>,
    ) -> Result<Vec<Translation>> {
        let user_id = ctx.require_user()?;

        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit.filter(|l| *l > 0).unwrap_or(10).min(PAGE_MAX);
        self.repository
            .list_translations(user_id, (page - 1).saturating_mul(limit), limit)
            .await
    }

    pub async fn vote(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        vote: VoteType,
    ) -> Result<VoteStatus> {
        let user_id = ctx.require_user()?;

        let (outcome, upvotes_count) = self.repository.cast_vote(user_id, id, vote).await?;
        Ok(VoteStatus {
            vote_type: outcome.state,
            upvotes_count: Some(upvotes_count),
        })
    }

    /// Anonymous callers have no vote
    pub async fn vote_status(&self, ctx: &RequestContext, id: Uuid) -> Result<VoteStatus> {
        let vote_type = match ctx.user_id.as_deref() {
            Some(user_id) => self.repository.get_vote(user_id, id).await?,
            None => None,
        };

        Ok(VoteStatus {
            vote_type,
            upvotes_count: None,
        })
    }

    /// View a translation through its share link
    pub async fn shared_translation(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<PublicTranslation> {
        self.limiter
            .enforce(Pool::Public, &ctx.network_identifier())
            .await?;

        let translation = self
            .repository
            .get_translation(id)
            .await?
            .ok_or(GatewayError::NotFound { entity: "Translation" })?;

        if !translation.is_public {
            if ctx.user_id.as_deref() == Some(translation.user_id.as_str()) {
                return Err(GatewayError::forbidden(
                    "Cannot view your own private translation via share link. Please use the dashboard.",
                ));
            }
            return Err(GatewayError::forbidden("This translation is private"));
        }

        if let Err(e) = self.repository.increment_view_count(id).await {
            warn!(translation_id = %id, "Failed to increment view count: {}", e);
        }

        let author = self
            .repository
            .get_user(&translation.user_id)
            .await?
            .map(|user| user.name);

        Ok(PublicTranslation::from_translation(&translation, author))
    }

    /// Newest public translations
    pub async fn public_feed(&self, limit: Option<usize>) -> Result<Vec<PublicTranslation>> {
        let limit = limit.unwrap_or(FEED_DEFAULT).clamp(1, FEED_MAX);
        let translations = self.repository.public_translations(limit).await?;

        let mut feed = Vec::with_capacity(translations.len());
        for translation in &translations {
            let author = self
                .repository
                .get_user(&translation.user_id)
                .await?
                .map(|user| user.name);
            feed.push(PublicTranslation::from_translation(translation, author));
        }

        Ok(feed)
    }

    /// Store the caller's own upstream key, or clear it when `None` or blank
    pub async fn update_settings(&self, ctx: &RequestContext, api_key: Option<&str>) -> Result<bool> {
        let user_id = ctx.require_user()?;
        self.limiter.enforce(Pool::General, &ctx.identifier()).await?;

        let envelope = match api_key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => Some(self.credentials.cipher().encrypt_blocking(key).await?),
            None => None,
        };
        let stored = envelope.is_some();

        self.repository.set_encrypted_api_key(user_id, envelope).await?;
        info!(user_id = %user_id, has_api_key = stored, "API key settings updated");

        Ok(stored)
    }

    pub async fn settings(&self, ctx: &RequestContext) -> Result<UserSettings> {
        let user_id = ctx.require_user()?;
        self.limiter.enforce(Pool::General, &ctx.identifier()).await?;

        let user = self
            .repository
            .get_user(user_id)
            .await?
            .ok_or(GatewayError::NotFound { entity: "User" })?;

        Ok(UserSettings {
            id: user.id,
            name: user.name,
            has_api_key: user.encrypted_api_key.is_some(),
        })
    }

    /// Users ranked by XP, limited to those active in `period`
    pub async fn leaderboard(
        &self,
        ctx: &RequestContext,
        period: LeaderboardPeriod,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardEntry>> {
        let user_id = ctx.require_user()?;
        self.limiter.enforce(Pool::General, &ctx.identifier()).await?;

        let limit = limit.unwrap_or(LEADERBOARD_MAX).clamp(1, LEADERBOARD_MAX);
        let users = self
            .repository
            .top_users(limit, period.since(Utc::now()))
            .await?;

        Ok(users
            .into_iter()
            .enumerate()
            .map(|(index, user)| LeaderboardEntry {
                rank: index + 1,
                initials: initials(&user.name),
                is_current_user: user.id == user_id,
                user_id: user.id,
                name: user.name,
                xp: user.total_xp,
            })
            .collect())
    }

    /// Challenges open for practice
    pub async fn challenges(&self) -> Result<Vec<Challenge>> {
        self.repository.active_challenges().await
    }

    /// The caller's latest practice attempts
    pub async fn practice_history(&self, ctx: &RequestContext) -> Result<Vec<Practice>> {
        let user_id = ctx.require_user()?;
        self.repository.list_practices(user_id, HISTORY_MAX).await
    }

    /// One of the caller's practice attempts
    pub async fn get_practice(&self, ctx: &RequestContext, id: Uuid) -> Result<Practice> {
        let user_id = ctx.require_user()?;
        let practice = self
            .repository
            .get_practice(id)
            .await?
            .ok_or(GatewayError::NotFound { entity: "Practice" })?;

        if practice.user_id != user_id {
            return Err(GatewayError::forbidden("You don't own this practice"));
        }

        Ok(practice)
    }

    pub async fn dashboard_stats(&self, ctx: &RequestContext) -> Result<DashboardStats> {
        let user_id = ctx.require_user()?;
        self.repository.dashboard_stats(user_id).await
    }

    /// Latest translations and practice attempts merged, newest first.
    /// `limit` defaults to 10 and is capped at 20.
    pub async fn recent_activity(
        &self,
        ctx: &RequestContext,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityItem>> {
        let user_id = ctx.require_user()?;
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(ACTIVITY_DEFAULT)
            .min(ACTIVITY_MAX);

        let translations = self.repository.list_translations(user_id, 0, limit).await?;
        let practices = self.repository.list_practices(user_id, limit).await?;

        let mut activity: Vec<ActivityItem> = translations
            .into_iter()
            .map(|t| ActivityItem {
                id: t.id,
                kind: ActivityKind::Translation,
                title: activity_title(&t.technical_text),
                audience: Some(t.audience_type),
                score: None,
                created_at: t.created_at,
            })
            .chain(practices.into_iter().map(|p| ActivityItem {
                id: p.id,
                kind: ActivityKind::Practice,
                title: "Practice Session".to_string(),
                audience: None,
                score: Some(p.score),
                created_at: p.created_at,
            }))
            .collect();

        activity.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        activity.truncate(limit);
        Ok(activity)
    }

    async fn owned_translation(&self, user_id: &str, id: Uuid) -> Result<Translation> {
        let translation = self
            .repository
            .get_translation(id)
            .await?
            .ok_or(GatewayError::NotFound { entity: "Translation" })?;

        if translation.user_id != user_id {
            return Err(GatewayError::forbidden("You don't own this translation"));
        }

        Ok(translation)
    }

    fn validate_length(&self, field: &str, text: &str, min: usize) -> Result<()> {
        let chars = text.chars().count();
        if chars < min {
            return Err(GatewayError::invalid(format!(
                "{} must be at least {} characters",
                field, min
            )));
        }
        if chars > self.max_input_chars {
            return Err(GatewayError::invalid(format!(
                "{} must be at most {} characters",
                field, self.max_input_chars
            )));
        }
        Ok(())
    }

    async fn run_model(&self, request: ChatRequest, resolved: &ResolvedCredential) -> Result<String> {
        let model = request.model.clone();
        let call = async {
            let stream = self.model.stream_chat(request, &resolved.credential).await?;
            aggregate(stream).await
        };

        match tokio::time::timeout(self.upstream_timeout, call).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                warn!(model = %model, "Upstream call failed: {}", e);
                Err(classify_upstream(e))
            }
            Err(_) => {
                warn!(model = %model, "Upstream call timed out");
                Err(GatewayError::UpstreamTimeout {
                    timeout_ms: self.upstream_timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn activity_title(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(ACTIVITY_TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Provider-side exhaustion is reported the same way as local quota
fn classify_upstream(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::UpstreamStreamError { ref message }
        | GatewayError::Upstream { ref message, .. }
            if GatewayError::is_quota_message(message) =>
        {
            GatewayError::UpstreamQuotaExhausted
        }
        other => other,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::aggregator::StreamChunk;
    use crate::core::models::{AudienceType, User};

    const TEXT: &str = "A load balancer spreads requests across servers";

    fn request() -> TranslationRequest {
        TranslationRequest::new(TEXT, AudienceType::Parent)
    }

    #[tokio::test]
    async fn test_create_translation_persists_result() {
        let model = ScriptedModel::new(Script::Chunks(vec![
            StreamChunk::Content("Imagine".to_string()),
            StreamChunk::Content("Imagine a host seating guests".to_string()),
        ]));
        let (gateway, repo) = gateway(model.clone()).await;

        let translation = gateway
            .create_translation(&RequestContext::authenticated("alice"), request().public(true))
            .await
            .unwrap();

        assert_eq!(translation.simplified_text, "Imagine a host seating guests");
        assert_eq!(translation.ai_model, "gemini-2.0-flash");
        assert_eq!(translation.input_method, InputMethod::Text);
        assert!(translation.is_public);
        assert_eq!(repo.translation_count().await, 1);

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "shared-key");
        assert!(calls[0].0.prompt.contains(TEXT));
    }

    #[tokio::test]
    async fn test_unauthenticated_is_rejected_first() {
        let model = ScriptedModel::replying("never");
        let (gateway, _) = gateway(model.clone()).await;

        let result = gateway
            .create_translation(&RequestContext::anonymous(), request())
            .await;
        assert!(matches!(result, Err(GatewayError::Unauthenticated)));
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn test_input_length_is_validated() {
        let (gateway, _) = gateway(ScriptedModel::replying("x")).await;
        let ctx = RequestContext::authenticated("alice");

        let short = TranslationRequest::new("too short", AudienceType::Friend);
        assert!(matches!(
            gateway.create_translation(&ctx, short).await,
            Err(GatewayError::InvalidInput { .. })
        ));

        let long = TranslationRequest::new("x".repeat(5001), AudienceType::Friend);
        assert!(matches!(
            gateway.create_translation(&ctx, long).await,
            Err(GatewayError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_privileged_model_blocked_before_upstream() {
        let model = ScriptedModel::replying("never");
        let (gateway, repo) = gateway(model.clone()).await;

        let result = gateway
            .create_translation(
                &RequestContext::authenticated("alice"),
                request().with_model("gemini-2.5-pro"),
            )
            .await;

        assert!(matches!(result, Err(GatewayError::ModelNotAllowed { .. })));
        assert!(model.calls().is_empty());
        assert_eq!(repo.translation_count().await, 0);
    }

    #[tokio::test]
    async fn test_own_key_unlocks_privileged_models() {
        let model = ScriptedModel::replying("A shelf near the door");
        let (gateway, _) = gateway(model.clone()).await;
        let ctx = RequestContext::authenticated("bob");

        assert!(gateway.update_settings(&ctx, Some("bob-own-key")).await.unwrap());
        assert!(gateway.settings(&ctx).await.unwrap().has_api_key);

        let translation = gateway
            .create_translation(&ctx, request().with_model("gemini-3-pro-preview"))
            .await
            .unwrap();
        assert_eq!(translation.ai_model, "gemini-3-pro-preview");
        assert_eq!(model.calls()[0].1, "bob-own-key");

        let defaulted = gateway.create_translation(&ctx, request()).await.unwrap();
        assert_eq!(defaulted.ai_model, "gemini-2.5-pro");

        assert!(!gateway.update_settings(&ctx, Some("   ")).await.unwrap());
        assert!(!gateway.settings(&ctx).await.unwrap().has_api_key);
    }

    #[tokio::test]
    async fn test_translation_quota_exhausts_then_rejects() {
        let model = ScriptedModel::replying("ok");
        let (gateway, _) = gateway(model.clone()).await;
        let ctx = RequestContext::authenticated("alice");

        for _ in 0..10 {
            gateway.create_translation(&ctx, request()).await.unwrap();
        }
        assert!(matches!(
            gateway.create_translation(&ctx, request()).await,
            Err(GatewayError::QuotaExceeded { limit: 10, remaining: 0, .. })
        ));
        assert_eq!(model.calls().len(), 10);

        let other = RequestContext::authenticated("bob");
        assert!(gateway.create_translation(&other, request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_error_is_surfaced_and_nothing_persisted() {
        let model = ScriptedModel::new(Script::Chunks(vec![
            StreamChunk::Delta("partial".to_string()),
            StreamChunk::Error("Candidate was blocked due to SAFETY".to_string()),
        ]));
        let (gateway, repo) = gateway(model).await;

        match gateway
            .create_translation(&RequestContext::authenticated("alice"), request())
            .await
        {
            Err(GatewayError::UpstreamStreamError { message }) => {
                assert_eq!(message, "Candidate was blocked due to SAFETY")
            }
            other => panic!("expected stream error, got {:?}", other),
        }
        assert_eq!(repo.translation_count().await, 0);
    }

    #[tokio::test]
    async fn test_quota_stream_error_maps_to_upstream_quota() {
        let model = ScriptedModel::new(Script::Chunks(vec![StreamChunk::Error(
            "Quota exceeded (RESOURCE_EXHAUSTED)".to_string(),
        )]));
        let (gateway, _) = gateway(model).await;

        let result = gateway
            .create_translation(&RequestContext::authenticated("alice"), request())
            .await;
        assert!(matches!(result, Err(GatewayError::UpstreamQuotaExhausted)));
    }

    #[tokio::test]
    async fn test_empty_stream_is_a_failure() {
        let model = ScriptedModel::new(Script::Chunks(vec![]));
        let (gateway, repo) = gateway(model).await;

        let result = gateway
            .create_translation(&RequestContext::authenticated("alice"), request())
            .await;
        assert!(matches!(result, Err(GatewayError::EmptyResult)));
        assert_eq!(repo.translation_count().await, 0);
    }

    #[tokio::test]
    async fn test_upstream_http_failure() {
        let model = ScriptedModel::new(Script::Fail(503, "overloaded".to_string()));
        let (gateway, _) = gateway(model).await;

        let result = gateway
            .create_translation(&RequestContext::authenticated("alice"), request())
            .await;
        assert!(matches!(result, Err(GatewayError::Upstream { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_hung_upstream_times_out() {
        let (gateway, repo) = gateway(ScriptedModel::new(Script::Hang)).await;

        let result = gateway
            .create_translation(&RequestContext::authenticated("alice"), request())
            .await;
        assert!(matches!(result, Err(GatewayError::UpstreamTimeout { timeout_ms: 200 })));
        assert_eq!(repo.translation_count().await, 0);
    }

    #[tokio::test]
    async fn test_ownership_checks() {
        let (gateway, _) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        let bob = RequestContext::authenticated("bob");

        let translation = gateway.create_translation(&alice, request()).await.unwrap();

        assert!(matches!(
            gateway.get_translation(&bob, translation.id).await,
            Err(GatewayError::Forbidden { .. })
        ));
        assert!(matches!(
            gateway.set_visibility(&bob, translation.id, true).await,
            Err(GatewayError::Forbidden { .. })
        ));
        assert!(matches!(
            gateway.delete_translation(&bob, translation.id).await,
            Err(GatewayError::Forbidden { .. })
        ));

        let updated = gateway.set_visibility(&alice, translation.id, true).await.unwrap();
        assert!(updated.is_public);

        gateway.delete_translation(&alice, translation.id).await.unwrap();
        assert!(matches!(
            gateway.get_translation(&alice, translation.id).await,
            Err(GatewayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_share_link_rules() {
        let (gateway, _) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        let translation = gateway.create_translation(&alice, request()).await.unwrap();

        let owner_error = gateway.shared_translation(&alice, translation.id).await;
        match owner_error {
            Err(GatewayError::Forbidden { message }) => assert!(message.contains("dashboard")),
            other => panic!("expected forbidden, got {:?}", other),
        }

        let stranger = RequestContext::anonymous().with_forwarded_for("198.51.100.4");
        match gateway.shared_translation(&stranger, translation.id).await {
            Err(GatewayError::Forbidden { message }) => assert!(message.contains("private")),
            other => panic!("expected forbidden, got {:?}", other),
        }

        gateway.set_visibility(&alice, translation.id, true).await.unwrap();
        let first = gateway.shared_translation(&stranger, translation.id).await.unwrap();
        assert_eq!(first.view_count, 0);
        assert_eq!(first.author.as_deref(), Some("Alice Smith"));
        let second = gateway.shared_translation(&stranger, translation.id).await.unwrap();
        assert_eq!(second.view_count, 1);
    }

    #[tokio::test]
    async fn test_share_link_uses_public_pool_by_address() {
        let (gateway, repo) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        let translation = gateway
            .create_translation(&alice, request().public(true))
            .await
            .unwrap();

        let visitor = RequestContext::anonymous().with_forwarded_for("203.0.113.9");
        for _ in 0..20 {
            gateway.shared_translation(&visitor, translation.id).await.unwrap();
        }
        assert!(matches!(
            gateway.shared_translation(&visitor, translation.id).await,
            Err(GatewayError::QuotaExceeded { limit: 20, .. })
        ));

        let stored = repo.get_translation(translation.id).await.unwrap().unwrap();
        assert_eq!(stored.view_count, 20);
    }

    #[tokio::test]
    async fn test_public_feed_and_votes() {
        let (gateway, _) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        let bob = RequestContext::authenticated("bob");

        let public = gateway
            .create_translation(&alice, request().public(true))
            .await
            .unwrap();
        gateway.create_translation(&alice, request()).await.unwrap();

        let feed = gateway.public_feed(None).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].id, public.id);

        let status = gateway.vote(&bob, public.id, VoteType::Up).await.unwrap();
        assert_eq!(status.vote_type, Some(VoteType::Up));
        assert_eq!(status.upvotes_count, Some(1));

        let status = gateway.vote(&bob, public.id, VoteType::Down).await.unwrap();
        assert_eq!(status.upvotes_count, Some(-1));

        assert_eq!(
            gateway.vote_status(&bob, public.id).await.unwrap().vote_type,
            Some(VoteType::Down)
        );
        assert_eq!(
            gateway
                .vote_status(&RequestContext::anonymous(), public.id)
                .await
                .unwrap()
                .vote_type,
            None
        );
    }

    #[tokio::test]
    async fn test_practice_awards_xp_and_ranks() {
        let reply = r#"```json
{"score": 88, "feedback": "Very clear.", "suggestions": ["Add an example"]}
```"#;
        let (gateway, repo) = gateway(ScriptedModel::replying(reply)).await;
        let bob = RequestContext::authenticated("bob");

        let outcome = gateway
            .submit_practice(&bob, "caching", "It's like keeping snacks on your desk")
            .await
            .unwrap();
        assert_eq!(outcome.feedback.score, 88);
        assert_eq!(outcome.xp_earned, 50);
        assert_eq!(outcome.practice.challenge_prompt, "Explain caching");
        assert_eq!(repo.practices_for("bob").await.len(), 1);

        let board = gateway
            .leaderboard(&bob, LeaderboardPeriod::AllTime, None)
            .await
            .unwrap();
        assert_eq!(board[0].user_id, "bob");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[0].xp, 50);
        assert_eq!(board[0].initials, "BJ");
        assert!(board[0].is_current_user);
        assert!(!board[1].is_current_user);
    }

    #[tokio::test]
    async fn test_practice_pool_and_missing_challenge() {
        let reply = r#"{"score": 70, "feedback": "ok", "suggestions": []}"#;
        let (gateway, _) = gateway(ScriptedModel::replying(reply)).await;
        let alice = RequestContext::authenticated("alice");

        assert!(matches!(
            gateway.submit_practice(&alice, "nope", "explanation").await,
            Err(GatewayError::NotFound { entity: "Challenge" })
        ));

        for _ in 0..4 {
            gateway
                .submit_practice(&alice, "caching", "explanation")
                .await
                .unwrap();
        }
        assert!(matches!(
            gateway.submit_practice(&alice, "caching", "explanation").await,
            Err(GatewayError::QuotaExceeded { limit: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_list_translations_paging() {
        let (gateway, _) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        for _ in 0..3 {
            gateway.create_translation(&alice, request()).await.unwrap();
        }

        assert_eq!(gateway.list_translations(&alice, None, None).await.unwrap().len(), 3);
        assert_eq!(gateway.list_translations(&alice, Some(2), Some(2)).await.unwrap().len(), 1);
        assert!(gateway
            .list_translations(&RequestContext::authenticated("bob"), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_translations_huge_page_is_empty() {
        let (gateway, _) = gateway(ScriptedModel::replying("answer")).await;
        let alice = RequestContext::authenticated("alice");
        gateway.create_translation(&alice, request()).await.unwrap();

        let page = gateway
            .list_translations(&alice, Some(usize::MAX), Some(100))
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[test]
    fn test_classify_upstream() {
        assert!(matches!(
            classify_upstream(GatewayError::Upstream {
                status: 400,
                message: "You exceeded your current quota".to_string()
            }),
            GatewayError::UpstreamQuotaExhausted
        ));
        assert!(matches!(
            classify_upstream(GatewayError::EmptyResult),
            GatewayError::EmptyResult
        ));
    }

    const SCORED: &str = r#"{"score": 75, "feedback": "Good.", "suggestions": []}"#;

    #[tokio::test]
    async fn test_practice_history_and_ownership() {
        let (gateway, _) = gateway(ScriptedModel::replying(SCORED)).await;
        let alice = RequestContext::authenticated("alice");
        let bob = RequestContext::authenticated("bob");

        let outcome = gateway
            .submit_practice(&alice, "caching", "A cache is a pantry")
            .await
            .unwrap();
        let id = outcome.practice.id;

        assert_eq!(gateway.practice_history(&alice).await.unwrap().len(), 1);
        assert!(gateway.practice_history(&bob).await.unwrap().is_empty());
        assert_eq!(gateway.get_practice(&alice, id).await.unwrap().score, 75);
        assert!(matches!(
            gateway.get_practice(&bob, id).await,
            Err(GatewayError::Forbidden { .. })
        ));
        assert!(matches!(
            gateway.get_practice(&alice, Uuid::new_v4()).await,
            Err(GatewayError::NotFound { entity: "Practice" })
        ));
        assert!(matches!(
            gateway.practice_history(&RequestContext::anonymous()).await,
            Err(GatewayError::Unauthenticated)
        ));

        let challenges = gateway.challenges().await.unwrap();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].id, "caching");
    }

    #[tokio::test]
    async fn test_dashboard_and_activity() {
        let (gateway, _) = gateway(ScriptedModel::replying(SCORED)).await;
        let alice = RequestContext::authenticated("alice");

        let long_text = "x".repeat(150);
        gateway
            .create_translation(&alice, TranslationRequest::new(long_text, AudienceType::Boss).public(true))
            .await
            .unwrap();
        gateway
            .submit_practice(&alice, "caching", "A cache is a pantry")
            .await
            .unwrap();

        let stats = gateway.dashboard_stats(&alice).await.unwrap();
        assert_eq!(stats.translations, 1);
        assert_eq!(stats.practice_sessions, 1);
        assert_eq!(stats.saved_examples, 1);
        assert_eq!(stats.average_score, 75);

        let activity = gateway.recent_activity(&alice, None).await.unwrap();
        assert_eq!(activity.len(), 2);
        assert_eq!(activity[0].kind, ActivityKind::Practice);
        assert_eq!(activity[0].score, Some(75));
        assert_eq!(activity[1].kind, ActivityKind::Translation);
        assert_eq!(activity[1].title.chars().count(), 103);
        assert!(activity[1].title.ends_with("..."));
        assert_eq!(activity[1].audience, Some(AudienceType::Boss));

        assert_eq!(gateway.recent_activity(&alice, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_leaderboard_period_filters_idle_users() {
        let (gateway, repo) = gateway(ScriptedModel::replying("x")).await;
        let mut idle = User::new("carol", "Carol King");
        idle.total_xp = 500;
        idle.updated_at = Utc::now() - chrono::Duration::days(10);
        repo.upsert_user(idle).await;
        let alice = RequestContext::authenticated("alice");

        let all_time = gateway
            .leaderboard(&alice, LeaderboardPeriod::AllTime, None)
            .await
            .unwrap();
        assert_eq!(all_time[0].user_id, "carol");
        assert_eq!(all_time.len(), 3);

        let month = gateway
            .leaderboard(&alice, LeaderboardPeriod::Month, None)
            .await
            .unwrap();
        assert_eq!(month.len(), 3);

        let week = gateway
            .leaderboard(&alice, LeaderboardPeriod::Week, None)
            .await
            .unwrap();
        assert_eq!(week.len(), 2);
        assert!(week.iter().all(|entry| entry.user_id != "carol"));
    }
}
