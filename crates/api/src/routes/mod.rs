use std::future::Future;

use axum::extract::{Extension, Path, Query, State};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use civic_domain::{
    identity::LedgerActor,
    idempotency::{BeginOutcome, ledger_request_key},
    impact::CommunityImpactScore,
    issues::{IssueConsensusState, IssueRegistration, IssueStatus},
    ports::idempotency::{IdempotencyKey, IdempotencyResponse},
    profile::{LeaderboardEntry, ReputationProfile, RoleProgression},
    reputation::{ActivityEntry, ReputationEvent},
    resolution::ResolveOutcome,
    verification::{CastVote, VerificationStats, VoteOutcome, VoteRecord},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::middleware::AuthContext;
use crate::{
    error::ApiError, middleware as app_middleware, observability, state::AppState, validation,
};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/issues/:issue_id", put(upsert_issue).get(get_issue))
        .route(
            "/v1/issues/:issue_id/votes",
            post(record_vote).get(list_votes),
        )
        .route("/v1/issues/:issue_id/votes/me", get(get_my_vote))
        .route(
            "/v1/issues/:issue_id/verification/stats",
            get(get_verification_stats),
        )
        .route("/v1/issues/:issue_id/quorum/resolve", post(try_resolve_quorum))
        .route("/v1/issues/:issue_id/resolution", post(resolve_outcome))
        .route(
            "/v1/issues/:issue_id/after-photo/verify",
            post(verify_after_photo),
        )
        .route("/v1/issues/:issue_id/penalties/fake", post(apply_fake_penalty))
        .route("/v1/reputation/penalties/spam", post(apply_spam_penalty))
        .route("/v1/reputation/profile", get(get_profile))
        .route("/v1/reputation/roles", get(get_role_progression))
        .route("/v1/reputation/history", get(get_history))
        .route("/v1/reputation/activity", get(get_activity))
        .route(
            "/v1/communities/:community_id/leaderboard",
            get(get_leaderboard),
        )
        .route("/v1/communities/:community_id/impact", get(get_impact))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .route_layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ));

    if !state.config.app_env.eq_ignore_ascii_case("test") {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    data_backend: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    if let Some(db) = &state.db {
        db.health_check().await.map_err(|err| {
            tracing::error!(adapter = "surrealdb", error = %err, "database health check failed");
            ApiError::Internal
        })?;
    }
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        data_backend: state.config.data_backend.clone(),
    }))
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct UpsertIssueRequest {
    #[validate(length(min = 1, max = 128))]
    community_id: String,
    #[validate(length(min = 1, max = 128))]
    reporter_id: String,
    #[validate(length(max = 64))]
    category: Option<String>,
    status: IssueStatus,
    created_at_ms: Option<i64>,
    resolved_at_ms: Option<i64>,
}

async fn upsert_issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
    Json(payload): Json<UpsertIssueRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let key = request_key("issue_upsert", &issue_id, &actor, &headers)?;
    run_idempotent(&state, key, "issue_upsert", StatusCode::OK, || async {
        let registration = IssueRegistration {
            issue_id: issue_id.clone(),
            community_id: payload.community_id,
            reporter_id: payload.reporter_id,
            category: payload.category,
            status: payload.status,
            created_at_ms: payload.created_at_ms,
            resolved_at_ms: payload.resolved_at_ms,
        };
        Ok(state
            .ledger
            .verification
            .upsert_issue(&actor, registration)
            .await?)
    })
    .await
}

async fn get_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> Result<Json<IssueConsensusState>, ApiError> {
    Ok(Json(state.ledger.verification.get_issue(&issue_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
struct CastVoteRequest {
    outcome: VoteOutcome,
    #[validate(length(max = 500))]
    remark: Option<String>,
}

async fn record_vote(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let key = request_key("vote_record", &issue_id, &actor, &headers)?;
    run_idempotent(&state, key, "vote_record", StatusCode::CREATED, || async {
        let input = CastVote {
            issue_id: issue_id.clone(),
            outcome: payload.outcome,
            remark: payload.remark,
            request_ts_ms: None,
        };
        Ok(state.ledger.verification.record_vote(&actor, input).await?)
    })
    .await
}

async fn list_votes(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
) -> Result<Json<Vec<VoteRecord>>, ApiError> {
    let actor = auth.actor()?;
    Ok(Json(
        state
            .ledger
            .verification
            .list_votes(&actor, &issue_id)
            .await?,
    ))
}

#[derive(Serialize)]
struct MyVoteResponse {
    has_voted: bool,
    vote: Option<VoteRecord>,
}

async fn get_my_vote(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
) -> Result<Json<MyVoteResponse>, ApiError> {
    let actor = auth.actor()?;
    let vote = state
        .ledger
        .verification
        .get_vote(&issue_id, actor.user_id())
        .await?;
    Ok(Json(MyVoteResponse {
        has_voted: vote.is_some(),
        vote,
    }))
}

async fn get_verification_stats(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> Result<Json<VerificationStats>, ApiError> {
    Ok(Json(
        state
            .ledger
            .verification
            .get_verification_stats(&issue_id)
            .await?,
    ))
}

async fn try_resolve_quorum(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
) -> Result<Response, ApiError> {
    let actor = auth.actor()?;
    if !actor.role.is_admin() {
        return Err(ApiError::Forbidden(
            "quorum recovery is restricted to administrators".into(),
        ));
    }
    let resolution = state.ledger.quorum.try_resolve_quorum(&issue_id).await?;
    Ok((StatusCode::OK, Json(resolution)).into_response())
}

#[derive(Debug, Deserialize)]
struct ResolveOutcomeRequest {
    is_resolved: bool,
}

async fn resolve_outcome(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
    Json(payload): Json<ResolveOutcomeRequest>,
) -> Result<Response, ApiError> {
    let actor = auth.actor()?;
    let key = request_key("resolution_outcome", &issue_id, &actor, &headers)?;
    run_idempotent(&state, key, "resolution_outcome", StatusCode::OK, || async {
        let input = ResolveOutcome {
            issue_id: issue_id.clone(),
            is_resolved: payload.is_resolved,
            request_ts_ms: None,
        };
        Ok(state.ledger.resolution.resolve_outcome(&actor, input).await?)
    })
    .await
}

#[derive(Debug, Deserialize, Validate)]
struct VerifyAfterPhotoRequest {
    #[validate(length(min = 1, max = 128))]
    uploader_id: String,
}

async fn verify_after_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
    Json(payload): Json<VerifyAfterPhotoRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let key = request_key("after_photo_verify", &issue_id, &actor, &headers)?;
    run_idempotent(&state, key, "after_photo_verify", StatusCode::OK, || async {
        Ok(state
            .ledger
            .resolution
            .verify_after_photo(&actor, &issue_id, &payload.uploader_id, None)
            .await?)
    })
    .await
}

#[derive(Debug, Deserialize, Validate)]
struct FakePenaltyRequest {
    #[validate(length(max = 500))]
    reason: Option<String>,
}

async fn apply_fake_penalty(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Path(issue_id): Path<String>,
    Json(payload): Json<FakePenaltyRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let key = request_key("penalty_fake", &issue_id, &actor, &headers)?;
    run_idempotent(&state, key, "penalty_fake", StatusCode::OK, || async {
        Ok(state
            .ledger
            .resolution
            .apply_fake_issue_penalty(&actor, &issue_id, payload.reason, None)
            .await?)
    })
    .await
}

#[derive(Debug, Deserialize, Validate)]
struct SpamPenaltyRequest {
    #[validate(length(min = 1, max = 128))]
    user_id: String,
    #[validate(length(min = 1, max = 128))]
    community_id: String,
    #[validate(length(max = 500))]
    reason: Option<String>,
}

async fn apply_spam_penalty(
    State(state): State<AppState>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<SpamPenaltyRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let subject = format!("{}:{}", payload.user_id, payload.community_id);
    let key = request_key("penalty_spam", &subject, &actor, &headers)?;
    run_idempotent(&state, key, "penalty_spam", StatusCode::OK, || async {
        Ok(state
            .ledger
            .resolution
            .apply_spam_penalty(
                &actor,
                &payload.user_id,
                &payload.community_id,
                payload.reason,
                None,
            )
            .await?)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ProfileQuery {
    community_id: Option<String>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ProfileResponse {
    Community(ReputationProfile),
    All { communities: Vec<ReputationProfile> },
}

async fn get_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let actor = auth.actor()?;
    let queries = &state.ledger.queries;
    let response = match query.community_id.as_deref() {
        Some(community_id) => {
            ProfileResponse::Community(queries.get_account(actor.user_id(), community_id).await?)
        }
        None => ProfileResponse::All {
            communities: queries.get_user_communities(actor.user_id()).await?,
        },
    };
    Ok(Json(response))
}

async fn get_role_progression(State(state): State<AppState>) -> Json<RoleProgression> {
    Json(state.ledger.queries.get_role_progression())
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    community_id: Option<String>,
    limit: Option<usize>,
}

async fn get_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ReputationEvent>>, ApiError> {
    let actor = auth.actor()?;
    Ok(Json(
        state
            .ledger
            .queries
            .get_event_history(actor.user_id(), query.community_id.as_deref(), query.limit)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn get_activity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ActivityEntry>>, ApiError> {
    let actor = auth.actor()?;
    Ok(Json(
        state
            .ledger
            .queries
            .get_activity(actor.user_id(), query.limit)
            .await?,
    ))
}

async fn get_leaderboard(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    Ok(Json(
        state
            .ledger
            .queries
            .get_community_leaderboard(&community_id, query.limit)
            .await?,
    ))
}

async fn get_impact(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
) -> Result<Json<CommunityImpactScore>, ApiError> {
    Ok(Json(
        state.ledger.impact.get_or_recompute(&community_id).await?,
    ))
}

fn request_key(
    operation: &str,
    subject_id: &str,
    actor: &LedgerActor,
    headers: &HeaderMap,
) -> Result<IdempotencyKey, ApiError> {
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Validation("missing request id".into()))?;
    Ok(ledger_request_key(
        operation,
        subject_id,
        actor.user_id(),
        request_id,
    ))
}

/// Runs a mutation once per request id; repeats get the stored response back.
async fn run_idempotent<T, F, Fut>(
    state: &AppState,
    key: IdempotencyKey,
    operation: &'static str,
    status: StatusCode,
    run: F,
) -> Result<Response, ApiError>
where
    T: Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let outcome = state.idempotency.begin(&key).await.map_err(|err| {
        tracing::error!(error = %err, operation, "idempotency begin failed");
        ApiError::Internal
    })?;

    match outcome {
        BeginOutcome::Replay(response) => {
            observability::register_idempotent_replay(operation);
            Ok(to_response(response))
        }
        BeginOutcome::InProgress => Err(ApiError::Conflict("request already in progress")),
        BeginOutcome::Started => {
            let body = match run().await {
                Ok(body) => body,
                Err(err) => {
                    if let Err(release_err) = state.idempotency.abandon(&key).await {
                        tracing::warn!(
                            error = %release_err,
                            operation,
                            "failed to release request id after error"
                        );
                    }
                    observability::register_idempotent_release(operation);
                    return Err(err);
                }
            };
            let response = IdempotencyResponse {
                status_code: status.as_u16(),
                body: serde_json::to_value(&body).map_err(|_| ApiError::Internal)?,
            };
            state
                .idempotency
                .complete(&key, response.clone())
                .await
                .map_err(|err| {
                    tracing::error!(error = %err, operation, "idempotency complete failed");
                    ApiError::Internal
                })?;
            Ok(to_response(response))
        }
    }
}

fn to_response(response: IdempotencyResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK);
    (status, Json(response.body)).into_response()
}
