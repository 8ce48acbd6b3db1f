//! Router tests driving the full HTTP surface against a fake renderer.

#![cfg(unix)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use reel_api::{create_router, ApiConfig, AppState};
use reel_media::{ClipMerger, MediaResult, MergeRequest};
use reel_models::{EffectCatalog, ParameterBuilder};
use reel_worker::{JobStore, RenderOrchestrator, WorkerConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

const RENDERER_SCRIPT: &str = r#"
case "$2" in
  Slow)
    echo "Rendering 5%"
    exec sleep 30
    ;;
esac
echo "Rendering 50%"
echo "Rendering 100%"
printf 'clip-%s' "$2" > "$3"
"#;

/// Concatenates the step clips.
struct ConcatMerger;

#[async_trait]
impl ClipMerger for ConcatMerger {
    async fn merge(
        &self,
        request: &MergeRequest,
        _cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<PathBuf> {
        let mut merged = Vec::new();
        for input in &request.inputs {
            merged.extend(tokio::fs::read(&input.path).await?);
        }
        tokio::fs::write(&request.output, merged).await?;
        Ok(request.output.clone())
    }
}

struct TestApp {
    root: TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("renderer.sh"), RENDERER_SCRIPT).unwrap();

        let catalog_json = json!({
            "effects": [
                {"id": "title", "composition_id": "Title", "working_dir": ".",
                 "width": 720, "height": 1280, "duration_secs": 1, "required_fields": ["text"]},
                {"id": "stars", "composition_id": "Stars", "working_dir": ".",
                 "width": 720, "height": 1280},
                {"id": "slow", "composition_id": "Slow", "working_dir": ".",
                 "width": 720, "height": 1280}
            ]
        });
        let catalog = EffectCatalog::from_json_str(&catalog_json.to_string(), root.path()).unwrap();
        let builder: Arc<dyn ParameterBuilder> = Arc::new(catalog);

        let worker = WorkerConfig {
            output_dir: root.path().join("output"),
            temp_dir: root.path().join("tmp"),
            renderer_program: "sh".to_string(),
            renderer_args: vec![root.path().join("renderer.sh").to_string_lossy().to_string()],
            job_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let orchestrator = RenderOrchestrator::new(
            worker,
            Arc::new(JobStore::new()),
            Arc::clone(&builder),
            Arc::new(ConcatMerger),
        );

        let state = AppState::new(ApiConfig::default(), orchestrator, builder);
        Self {
            root,
            router: create_router(state, None),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .send(Request::get(uri).body(Body::empty()).unwrap())
            .await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    async fn submit(&self, uri: &str, body: Value) -> String {
        let (status, response) = self.post(uri, body).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{response}");
        let job_id = response["job_id"].as_str().unwrap().to_string();
        assert_eq!(response["status_url"], format!("/jobs/{}", job_id));
        job_id
    }

    async fn wait_for_state(&self, job_id: &str, wanted: &str) -> Value {
        for _ in 0..1000 {
            let (status, snapshot) = self.get(&format!("/jobs/{}", job_id)).await;
            assert_eq!(status, StatusCode::OK);
            if snapshot["state"] == wanted {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached {}", job_id, wanted);
    }
}

#[tokio::test]
async fn test_health_sets_request_id_and_security_headers() {
    let app = TestApp::new();
    let request = Request::get("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-request-id"], "req-123");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_checks_directories_and_renderer() {
    let app = TestApp::new();
    let (status, body) = app.get("/ready").await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "ready");
    assert!(app.root.path().join("output").is_dir());
}

#[tokio::test]
async fn test_list_effects() {
    let app = TestApp::new();
    let (status, body) = app.get("/effects").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["effects"], json!(["slow", "stars", "title"]));
}

#[tokio::test]
async fn test_single_job_lifecycle_and_download() {
    let app = TestApp::new();
    let job_id = app.submit("/jobs/title", json!({"text": "Hello"})).await;

    let snapshot = app.wait_for_state(&job_id, "completed").await;
    assert_eq!(snapshot["kind"], "single");
    assert_eq!(snapshot["progress"], 100);
    assert_eq!(snapshot["download_url"], format!("/jobs/{}/download", job_id));
    assert!(snapshot["started_at"].is_string());
    assert!(snapshot.get("error").is_none());

    let request = Request::get(format!("/jobs/{}/download", job_id))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment"));
    assert_eq!(body, b"clip-Title");
}

#[tokio::test]
async fn test_validation_errors_create_no_job() {
    let app = TestApp::new();

    let (status, body) = app.post("/jobs/nope", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    let (status, _) = app.post("/jobs/title", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post("/jobs/title", json!({"text": "x", "fps": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.post("/jobs/composite", json!({"effects": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/jobs").await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = TestApp::new();
    let request = Request::post("/jobs/stars")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_and_malformed_job_ids() {
    let app = TestApp::new();

    let (status, body) = app.get("/jobs/render-20260101-0000000000000001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = app.get("/jobs/bad.id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/jobs/render-20260101-0000000000000001/cancel", json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_and_download_conflicts() {
    let app = TestApp::new();
    let job_id = app.submit("/jobs/slow", json!({})).await;
    app.wait_for_state(&job_id, "rendering").await;

    let (status, body) = app.get(&format!("/jobs/{}/download", job_id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, body) = app.post(&format!("/jobs/{}/cancel", job_id), json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["cancelling"], true);

    let snapshot = app.wait_for_state(&job_id, "failed").await;
    assert_eq!(snapshot["error_code"], "cancelled");
    assert!(snapshot.get("download_url").is_none());

    let (status, _) = app.post(&format!("/jobs/{}/cancel", job_id), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_missing_artifact_is_distinct_not_found() {
    let app = TestApp::new();
    let job_id = app.submit("/jobs/stars", json!({})).await;
    app.wait_for_state(&job_id, "completed").await;

    std::fs::remove_file(app.root.path().join("output").join(format!("{}.mp4", job_id))).unwrap();

    let (status, body) = app.get(&format!("/jobs/{}/download", job_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "artifact_missing");
}

#[tokio::test]
async fn test_composite_job_and_listing() {
    let app = TestApp::new();
    let single = app.submit("/jobs/stars", json!({})).await;
    let composite = app
        .submit(
            "/jobs/composite",
            json!({
                "effects": [
                    {"effect_id": "title", "params": {"text": "Intro"}},
                    {"effect_id": "stars"}
                ],
                "merge_mode": "sequence"
            }),
        )
        .await;

    let snapshot = app.wait_for_state(&composite, "completed").await;
    assert_eq!(snapshot["kind"], "composite");
    app.wait_for_state(&single, "completed").await;

    let (_, _, body) = app
        .send(
            Request::get(format!("/jobs/{}/download", composite))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(body, b"clip-Titleclip-Stars");

    let (status, listing) = app.get("/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 2);
    assert_eq!(listing["jobs"][0]["job_id"], composite.as_str());
    assert_eq!(listing["jobs"][1]["job_id"], single.as_str());
}
