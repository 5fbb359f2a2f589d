use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transcript_core::tokenizer::sorted_tokens;
use transcript_core::{
    BatchReport, FailedIndexUpdate, IndexStats, RebuildReport, SessionMatch, TranscriptSearchEngine, TranscriptSegment,
};

const MAX_K: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
    /// Wrap query tokens in <em> inside snippets
    #[serde(default)]
    pub highlight: bool,
}
fn default_k() -> usize { 10 }

#[derive(Deserialize)]
pub struct MatchParams {
    pub q: String,
    #[serde(default)]
    pub highlight: bool,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SessionMatch>,
}

#[derive(Deserialize)]
pub struct TranscriptBody {
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    pub consistent: bool,
    pub stats: IndexStats,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: TranscriptSearchEngine,
    pub admin_token: Option<String>,
}

pub fn build_app(engine: TranscriptSearchEngine, admin_token: Option<String>) -> Router {
    let app_state = AppState { engine, admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/stats", get(stats_handler))
        .route("/sessions/:id/matches", get(matches_handler))
        .route("/sessions/:id/transcript", post(index_handler).put(update_handler))
        .route("/sessions/:id", axum::routing::delete(remove_handler))
        .route("/admin/verify", get(verify_handler))
        .route("/admin/rebuild", post(rebuild_handler))
        .route("/admin/retry", post(retry_handler))
        .route("/admin/flush", post(flush_handler))
        .route("/admin/failures", get(failures_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let mut results = state.engine.search(&params.q);
    let total_hits = results.len();
    results.truncate(params.k.clamp(1, MAX_K));
    if params.highlight {
        highlight_all(&mut results, &params.q);
    }
    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, total_hits, took_ms = elapsed.as_millis() as u64, "search");
    Json(SearchResponse { query: params.q, took_ms: elapsed.as_millis(), took_s: elapsed.as_secs_f64(), total_hits, results })
}

pub async fn matches_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<MatchParams>,
) -> Json<Vec<SessionMatch>> {
    let mut matches = state.engine.get_matches_in_session(&id, &params.q);
    if params.highlight {
        highlight_all(&mut matches, &params.q);
    }
    Json(matches)
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.engine.get_index_stats())
}

async fn index_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TranscriptBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let indexed = state.engine.index_transcript(&id, body.segments).await;
    Ok(Json(serde_json::json!({ "session_id": id, "indexed": indexed })))
}

async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TranscriptBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, String)> {
    authorize(&state, &headers)?;
    state.engine.update_transcript(&id, body.segments).await;
    let pending = state.engine.pending_updates();
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "session_id": id, "queued": true, "pending": pending }))))
}

async fn remove_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let removed = state.engine.remove_transcript(&id).await;
    Ok(Json(serde_json::json!({ "session_id": id, "removed": removed })))
}

async fn verify_handler(State(state): State<AppState>) -> Json<VerifyResponse> {
    Json(VerifyResponse { consistent: state.engine.verify_index_integrity(), stats: state.engine.get_index_stats() })
}

async fn rebuild_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<RebuildReport>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    state
        .engine
        .rebuild_all()
        .await
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("rebuild failed: {err:#}")))
}

async fn retry_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    let replayed = state.engine.retry_failed_updates().await;
    let still_failing = state.engine.failed_updates().len();
    Ok(Json(serde_json::json!({ "replayed": replayed, "still_failing": still_failing })))
}

async fn flush_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<BatchReport>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    Ok(Json(state.engine.flush_updates().await))
}

async fn failures_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<FailedIndexUpdate>>, (StatusCode, String)> {
    authorize(&state, &headers)?;
    Ok(Json(state.engine.failed_updates()))
}

fn highlight_all(matches: &mut [SessionMatch], query: &str) {
    let tokens = sorted_tokens(query);
    for m in matches.iter_mut() {
        m.snippet = highlight_terms(&m.snippet, &tokens);
    }
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        return snippet.to_string();
    }
    // Longest first so overlapping terms prefer the fuller match.
    let mut alts: Vec<&String> = terms.iter().collect();
    alts.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    let alternation = alts.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    match regex::RegexBuilder::new(&alternation).case_insensitive(true).build() {
        Ok(pat) => pat.replace_all(snippet, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string(),
        Err(_) => snippet.to_string(),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
