//! HTTP API server implementation

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Json, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::core::client::GeminiClient;
use crate::core::config::GatewayConfig;
use crate::core::errors::GatewayError;
use crate::core::models::{
    ActivityItem, ActivityKind, AudienceType, Challenge, DashboardStats, InputMethod,
    LeaderboardEntry, LeaderboardPeriod, Practice, PracticeFeedback, PracticeOutcome,
    PublicTranslation, Translation, TranslationRequest, UserSettings, VoteStatus, VoteType,
};
use crate::core::ratelimit::{
    now_ms, CounterStore, InMemoryCounterStore, RateLimitDecision, RedisCounterStore,
};
use crate::core::repository::InMemoryRepository;
use crate::core::service::{RequestContext, TranslationGateway};

/// Header set by the fronting auth layer
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional display name for first-seen users
pub const USER_NAME_HEADER: &str = "x-user-name";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Application state
pub struct AppState {
    gateway: TranslationGateway,
}

impl AppState {
    pub fn new(gateway: TranslationGateway) -> Self {
        Self { gateway }
    }
}

/// Health check response
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

/// Error response
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub is_public: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub vote_type: VoteType,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PracticeRequest {
    pub challenge_id: String,
    pub user_explanation: String,
}

/// `apiKey` missing, null or blank clears the stored key
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdated {
    pub success: bool,
    pub has_api_key: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub period: LeaderboardPeriod,
    pub limit: Option<usize>,
}

/// `Json` body whose rejection is reported as `InvalidInput`
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(GatewayError))]
struct ApiJson<T>(T);

/// `Path` whose rejection is reported as `InvalidInput`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(GatewayError))]
struct ApiPath<T>(T);

/// `Query` whose rejection is reported as `InvalidInput`
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(GatewayError))]
struct ApiQuery<T>(T);

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::invalid(rejection.body_text())
    }
}

impl From<PathRejection> for GatewayError {
    fn from(rejection: PathRejection) -> Self {
        GatewayError::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        GatewayError::invalid(rejection.body_text())
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "NonTechSpeak Gateway API",
        description = "Rate-limited, credential-aware access to the explanation model"
    ),
    paths(
        create_translation,
        list_translations,
        get_translation,
        delete_translation,
        set_visibility,
        cast_vote,
        vote_status,
        submit_practice,
        list_challenges,
        practice_history,
        get_practice,
        dashboard_stats,
        recent_activity,
        shared_translation,
        public_feed,
        get_settings,
        update_settings,
        leaderboard,
    ),
    components(schemas(
        AudienceType,
        InputMethod,
        VoteType,
        LeaderboardPeriod,
        Challenge,
        DashboardStats,
        ActivityKind,
        ActivityItem,
        TranslationRequest,
        Translation,
        PublicTranslation,
        Practice,
        PracticeFeedback,
        PracticeOutcome,
        LeaderboardEntry,
        UserSettings,
        VoteStatus,
        VisibilityRequest,
        VoteRequest,
        PracticeRequest,
        SettingsUpdate,
        SettingsUpdated,
        DeleteResponse,
        ErrorResponse,
        HealthResponse,
    ))
)]
pub struct ApiDoc;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            GatewayError::Storage { .. }
            | GatewayError::Crypto { .. }
            | GatewayError::ConfigError { .. }
            | GatewayError::InternalError(_)
            | GatewayError::HttpError(_)
            | GatewayError::JsonError(_)
            | GatewayError::RedisError(_) => {
                error!("Request failed: {}", self);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(ErrorResponse { error: message });

        if let GatewayError::QuotaExceeded {
            limit,
            remaining,
            reset_at,
        } = self
        {
            let decision = RateLimitDecision {
                allowed: false,
                limit,
                remaining,
                reset_at,
            };
            let headers = [
                ("x-ratelimit-limit", limit.to_string()),
                ("x-ratelimit-remaining", remaining.to_string()),
                // unix ms, same unit as `RateLimitDecision::reset_at`
                ("x-ratelimit-reset", reset_at.to_string()),
                ("retry-after", decision.retry_after_secs(now_ms()).to_string()),
            ];
            return (status, headers, body).into_response();
        }

        (status, body).into_response()
    }
}

/// Build the caller context from request headers, registering the user on first sight
async fn caller(state: &AppState, headers: &HeaderMap) -> Result<RequestContext, GatewayError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
    };

    let ctx = RequestContext {
        user_id: header(USER_ID_HEADER),
        forwarded_for: header(FORWARDED_FOR_HEADER),
    };
    state
        .gateway
        .register_caller(&ctx, header(USER_NAME_HEADER).as_deref())
        .await?;

    Ok(ctx)
}

/// Health check handler
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// POST /api/translation/create
#[utoipa::path(
    post,
    path = "/api/translation/create",
    tag = "Translations",
    request_body = TranslationRequest,
    responses(
        (status = 200, description = "Stored translation", body = Translation),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Not signed in", body = ErrorResponse),
        (status = 403, description = "Model needs the caller's own key", body = ErrorResponse),
        (status = 429, description = "Quota exhausted", body = ErrorResponse),
        (status = 504, description = "Upstream timed out", body = ErrorResponse)
    )
)]
async fn create_translation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<TranslationRequest>,
) -> Result<Json<Translation>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let translation = state.gateway.create_translation(&ctx, payload).await?;
    Ok(Json(translation))
}

/// GET /api/translation/list
#[utoipa::path(
    get,
    path = "/api/translation/list",
    tag = "Translations",
    params(
        ("page" = Option<usize>, Query, description = "Page number, from 1"),
        ("limit" = Option<usize>, Query, description = "Page size")
    ),
    responses((status = 200, description = "Caller's translations", body = Vec<Translation>))
)]
async fn list_translations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Vec<Translation>>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let translations = state
        .gateway
        .list_translations(&ctx, query.page, query.limit)
        .await?;
    Ok(Json(translations))
}

/// GET /api/translation/:id
#[utoipa::path(
    get,
    path = "/api/translation/{id}",
    tag = "Translations",
    params(("id" = Uuid, Path, description = "Translation id")),
    responses(
        (status = 200, description = "Translation", body = Translation),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
async fn get_translation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Translation>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.get_translation(&ctx, id).await?))
}

/// DELETE /api/translation/:id
#[utoipa::path(
    delete,
    path = "/api/translation/{id}",
    tag = "Translations",
    params(("id" = Uuid, Path, description = "Translation id")),
    responses(
        (status = 200, description = "Deleted", body = DeleteResponse),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
async fn delete_translation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<DeleteResponse>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    state.gateway.delete_translation(&ctx, id).await?;
    Ok(Json(DeleteResponse { success: true }))
}

/// PATCH /api/translation/:id/visibility
#[utoipa::path(
    patch,
    path = "/api/translation/{id}/visibility",
    tag = "Translations",
    params(("id" = Uuid, Path, description = "Translation id")),
    request_body = VisibilityRequest,
    responses(
        (status = 200, description = "Updated translation", body = Translation),
        (status = 403, description = "Not the owner", body = ErrorResponse)
    )
)]
async fn set_visibility(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<VisibilityRequest>,
) -> Result<Json<Translation>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let translation = state
        .gateway
        .set_visibility(&ctx, id, payload.is_public)
        .await?;
    Ok(Json(translation))
}

/// POST /api/translation/:id/vote
#[utoipa::path(
    post,
    path = "/api/translation/{id}/vote",
    tag = "Votes",
    params(("id" = Uuid, Path, description = "Translation id")),
    request_body = VoteRequest,
    responses((status = 200, description = "Vote applied", body = VoteStatus))
)]
async fn cast_vote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<VoteRequest>,
) -> Result<Json<VoteStatus>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.vote(&ctx, id, payload.vote_type).await?))
}

/// GET /api/translation/:id/vote
#[utoipa::path(
    get,
    path = "/api/translation/{id}/vote",
    tag = "Votes",
    params(("id" = Uuid, Path, description = "Translation id")),
    responses((status = 200, description = "Caller's vote", body = VoteStatus))
)]
async fn vote_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<VoteStatus>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.vote_status(&ctx, id).await?))
}

/// POST /api/practice/submit
#[utoipa::path(
    post,
    path = "/api/practice/submit",
    tag = "Practice",
    request_body = PracticeRequest,
    responses(
        (status = 200, description = "Scored attempt", body = PracticeOutcome),
        (status = 404, description = "Unknown challenge", body = ErrorResponse),
        (status = 429, description = "Quota exhausted", body = ErrorResponse)
    )
)]
async fn submit_practice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<PracticeRequest>,
) -> Result<Json<PracticeOutcome>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let outcome = state
        .gateway
        .submit_practice(&ctx, &payload.challenge_id, &payload.user_explanation)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/practice/challenges
#[utoipa::path(
    get,
    path = "/api/practice/challenges",
    tag = "Practice",
    responses((status = 200, description = "Active challenges", body = Vec<Challenge>))
)]
async fn list_challenges(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Challenge>>, GatewayError> {
    Ok(Json(state.gateway.challenges().await?))
}

/// GET /api/practice/history
#[utoipa::path(
    get,
    path = "/api/practice/history",
    tag = "Practice",
    responses((status = 200, description = "Caller's last 50 attempts", body = Vec<Practice>))
)]
async fn practice_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Practice>>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.practice_history(&ctx).await?))
}

/// GET /api/practice/:id
#[utoipa::path(
    get,
    path = "/api/practice/{id}",
    tag = "Practice",
    params(("id" = Uuid, Path, description = "Practice id")),
    responses(
        (status = 200, description = "Practice attempt", body = Practice),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    )
)]
async fn get_practice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Practice>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.get_practice(&ctx, id).await?))
}

/// GET /api/dashboard/stats
#[utoipa::path(
    get,
    path = "/api/dashboard/stats",
    tag = "Dashboard",
    responses((status = 200, description = "Caller's counters", body = DashboardStats))
)]
async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DashboardStats>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.dashboard_stats(&ctx).await?))
}

/// GET /api/dashboard/activity
#[utoipa::path(
    get,
    path = "/api/dashboard/activity",
    tag = "Dashboard",
    params(("limit" = Option<usize>, Query, description = "Default 10, at most 20")),
    responses((status = 200, description = "Recent translations and practice", body = Vec<ActivityItem>))
)]
async fn recent_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Result<Json<Vec<ActivityItem>>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.recent_activity(&ctx, query.limit).await?))
}

/// GET /api/share/:id
#[utoipa::path(
    get,
    path = "/api/share/{id}",
    tag = "Public",
    params(("id" = Uuid, Path, description = "Translation id")),
    responses(
        (status = 200, description = "Shared translation", body = PublicTranslation),
        (status = 403, description = "Private translation", body = ErrorResponse),
        (status = 429, description = "Quota exhausted", body = ErrorResponse)
    )
)]
async fn shared_translation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PublicTranslation>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.shared_translation(&ctx, id).await?))
}

/// GET /api/public/feed
#[utoipa::path(
    get,
    path = "/api/public/feed",
    tag = "Public",
    params(("limit" = Option<usize>, Query, description = "1 to 50, default 10")),
    responses((status = 200, description = "Newest public translations", body = Vec<PublicTranslation>))
)]
async fn public_feed(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<LimitQuery>,
) -> Result<Json<Vec<PublicTranslation>>, GatewayError> {
    Ok(Json(state.gateway.public_feed(query.limit).await?))
}

/// GET /api/user/settings
#[utoipa::path(
    get,
    path = "/api/user/settings",
    tag = "Settings",
    responses((status = 200, description = "Caller's settings", body = UserSettings))
)]
async fn get_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserSettings>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    Ok(Json(state.gateway.settings(&ctx).await?))
}

/// PATCH /api/user/settings
#[utoipa::path(
    patch,
    path = "/api/user/settings",
    tag = "Settings",
    request_body = SettingsUpdate,
    responses((status = 200, description = "Settings saved", body = SettingsUpdated))
)]
async fn update_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<SettingsUpdate>,
) -> Result<Json<SettingsUpdated>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let has_api_key = state
        .gateway
        .update_settings(&ctx, payload.api_key.as_deref())
        .await?;
    Ok(Json(SettingsUpdated {
        success: true,
        has_api_key,
    }))
}

/// GET /api/leaderboard
#[utoipa::path(
    get,
    path = "/api/leaderboard",
    tag = "Leaderboard",
    params(
        ("period" = Option<LeaderboardPeriod>, Query, description = "today, week, month or all_time"),
        ("limit" = Option<usize>, Query, description = "Rows to return")
    ),
    responses(
        (status = 200, description = "Users ranked by XP", body = Vec<LeaderboardEntry>),
        (status = 400, description = "Unknown period", body = ErrorResponse)
    )
)]
async fn leaderboard(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, GatewayError> {
    let ctx = caller(&state, &headers).await?;
    let board = state
        .gateway
        .leaderboard(&ctx, query.period, query.limit)
        .await?;
    Ok(Json(board))
}

/// Build the router over a ready gateway
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .route("/api/translation/create", post(create_translation))
        .route("/api/translation/list", get(list_translations))
        .route(
            "/api/translation/:id",
            get(get_translation).delete(delete_translation),
        )
        .route("/api/translation/:id/visibility", patch(set_visibility))
        .route("/api/translation/:id/vote", post(cast_vote).get(vote_status))
        .route("/api/practice/submit", post(submit_practice))
        .route("/api/practice/challenges", get(list_challenges))
        .route("/api/practice/history", get(practice_history))
        .route("/api/practice/:id", get(get_practice))
        .route("/api/dashboard/stats", get(dashboard_stats))
        .route("/api/dashboard/activity", get(recent_activity))
        .route("/api/share/:id", get(shared_translation))
        .route("/api/public/feed", get(public_feed))
        .route("/api/user/settings", get(get_settings).patch(update_settings))
        .route("/api/leaderboard", get(leaderboard))
        .with_state(state)
}

/// Wire the gateway's collaborators from configuration
pub async fn build_gateway(config: &GatewayConfig) -> anyhow::Result<TranslationGateway> {
    let store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => {
            info!("Using Redis counter store");
            Arc::new(RedisCounterStore::connect(url).await?)
        }
        None => {
            warn!("REDIS_URL not set, rate limits are tracked per process");
            Arc::new(InMemoryCounterStore::new())
        }
    };

    let model = Arc::new(GeminiClient::from_config(config)?);
    let repository = Arc::new(InMemoryRepository::with_default_challenges().await);

    Ok(TranslationGateway::new(config, store, model, repository)?)
}

/// Run the HTTP server
pub async fn run_server(host: String, port: u16) -> anyhow::Result<()> {
    let config = GatewayConfig::load()?;
    let gateway = build_gateway(&config).await?;

    let state = Arc::new(AppState::new(gateway));
    let app = router(state);

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
