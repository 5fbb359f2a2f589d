use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;
use transcript_core::store::SessionFile;
use transcript_core::{EngineConfig, JsonSessionStore, NoopMirror, RetryPolicy, TranscriptSearchEngine, TranscriptSegment};

const TOKEN: &str = "s3cret";

fn seg(id: &str, ts: f64, text: &str) -> TranscriptSegment {
    TranscriptSegment { id: id.into(), timestamp: ts, text: text.into(), speaker_id: None }
}

fn write_sessions(dir: &Path) -> JsonSessionStore {
    let store = JsonSessionStore::new(dir);
    store
        .write_session(&SessionFile {
            id: "A".into(),
            title: Some("Planning".into()),
            created_at: Some("2024-01-01T00:00:00Z".into()),
            segments: vec![seg("a0", 0.0, "intro"), seg("a1", 30.0, "roadmap planning roadmap")],
        })
        .unwrap();
    store
        .write_session(&SessionFile {
            id: "B".into(),
            title: Some("Standup".into()),
            created_at: None,
            segments: vec![seg("b0", 0.0, "we looked at the roadmap")],
        })
        .unwrap();
    store
}

async fn build(root: &Path) -> (Router, TranscriptSearchEngine) {
    let store = Arc::new(write_sessions(&root.join("sessions")));
    let config = EngineConfig {
        debounce: Duration::from_secs(60),
        retry: RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(10) },
        ..EngineConfig::with_data_dir(root.join("data"))
    };
    let engine = TranscriptSearchEngine::open(config, store, Arc::new(NoopMirror));
    engine.rebuild_all().await.unwrap();
    (server::build_app(engine.clone(), Some(TOKEN.into())), engine)
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn with_body(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    if let Some(t) = token {
        builder = builder.header("X-ADMIN-TOKEN", t);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    let (app, _) = build(dir.path()).await;

    let (status, json) = call(&app, get("/search?q=roadmap&k=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 2);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["id"], "A");
    assert_eq!(arr[0]["title"], "Planning");
    assert_eq!(arr[0]["segment_id"], "a1");
    assert_eq!(arr[1]["id"], "B");

    let (_, json) = call(&app, get("/search?q=")).await;
    assert_eq!(json["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn highlighted_segment_matches() {
    let dir = tempdir().unwrap();
    let (app, _) = build(dir.path()).await;

    let (status, json) = call(&app, get("/sessions/A/matches?q=Roadmap&highlight=true")).await;
    assert_eq!(status, StatusCode::OK);
    let arr = json.as_array().unwrap();
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["snippet"], "<em>roadmap</em> planning <em>roadmap</em>");
}

#[tokio::test]
async fn mutations_require_admin_token() {
    let dir = tempdir().unwrap();
    let (app, _) = build(dir.path()).await;

    let (status, _) = call(&app, with_body("POST", "/admin/rebuild", json!({}), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, with_body("DELETE", "/sessions/A", json!({}), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_flush_and_remove_round_trip() {
    let dir = tempdir().unwrap();
    let (app, engine) = build(dir.path()).await;

    let body = json!({ "segments": [{ "id": "b0", "timestamp": 0.0, "text": "hiring pipeline review" }] });
    let (status, json) = call(&app, with_body("PUT", "/sessions/B/transcript", body, Some(TOKEN))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["pending"], 1);

    let (status, json) = call(&app, with_body("POST", "/admin/flush", json!({}), Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["processed"], 1);
    assert_eq!(engine.search("hiring")[0].id, "B");

    let (status, json) = call(&app, with_body("DELETE", "/sessions/B", json!({}), Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], true);

    let (_, json) = call(&app, get("/search?q=hiring")).await;
    assert_eq!(json["total_hits"], 0);

    // B still exists in the session directory, so the index is now one short.
    let (_, json) = call(&app, get("/admin/verify")).await;
    assert_eq!(json["consistent"], false);
    assert_eq!(json["stats"]["session_count"], 1);

    let (status, json) = call(&app, with_body("POST", "/admin/rebuild", json!({}), Some(TOKEN))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["indexed"], 2);
    let (_, json) = call(&app, get("/admin/verify")).await;
    assert_eq!(json["consistent"], true);
}

#[tokio::test]
async fn index_endpoint_indexes_known_sessions_only() {
    let dir = tempdir().unwrap();
    let (app, _) = build(dir.path()).await;

    let body = json!({ "segments": [{ "id": "a9", "timestamp": 5.0, "text": "presupuesto anual" }] });
    let (_, json) = call(&app, with_body("POST", "/sessions/A/transcript", body.clone(), Some(TOKEN))).await;
    assert_eq!(json["indexed"], true);
    let (_, json) = call(&app, get("/search?q=presupuesto")).await;
    assert_eq!(json["results"][0]["id"], "A");

    let (_, json) = call(&app, with_body("POST", "/sessions/ghost/transcript", body, Some(TOKEN))).await;
    assert_eq!(json["indexed"], false);

    let (_, stats) = call(&app, get("/stats")).await;
    assert_eq!(stats["session_count"], 2);
}
