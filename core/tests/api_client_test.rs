use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use voicelab_core::{DownloadStage, TtsRequest, VoiceLabError, WorkerApiClient};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn progress_body() -> &'static str {
    concat!(
        "data: {\"pct\":10,\"stage\":\"downloading\",\"downloadedBytes\":1,\"totalBytes\":10,\"error\":null}\n\n",
        "data: {\"pct\":100,\"stage\":\"completed\",\"downloadedBytes\":10,\"totalBytes\":10,\"error\":null}\n\n",
    )
}

fn worker_app(download_bodies: Arc<Mutex<Vec<Value>>>) -> Router {
    Router::new()
        .route(
            "/health",
            get(|| async { Json(json!({"ok": true, "version": "0.1.0"})) }),
        )
        .route(
            "/models/status",
            get(|| async {
                Json(json!({"models": [{
                    "modelId": "qwen-tts-0.6b",
                    "kind": "tts",
                    "size": "0.6b",
                    "status": "completed",
                    "downloadedBytes": 10,
                    "totalBytes": 10,
                    "progress": 100,
                    "path": "/cache/qwen",
                    "error": null
                }]}))
            }),
        )
        .route(
            "/models/download",
            post(move |Json(body): Json<Value>| {
                let bodies = Arc::clone(&download_bodies);
                async move {
                    bodies.lock().unwrap().push(body);
                    Json(json!({"ok": true, "path": "/cache/qwen"}))
                }
            }),
        )
        .route("/models/download/events", get(|| async { progress_body() }))
        .route(
            "/tts/stream",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["voiceId"], "narrator");
                let mut headers = HeaderMap::new();
                headers.insert("X-Sample-Rate", HeaderValue::from_static("22050"));
                headers.insert("X-Channels", HeaderValue::from_static("1"));
                (headers, vec![1u8, 0, 2, 0, 3, 0])
            }),
        )
}

#[tokio::test]
async fn reads_health_and_model_status() {
    let base_url = serve(worker_app(Arc::default())).await;
    let api = WorkerApiClient::new(format!("{}/", base_url)).unwrap();
    assert_eq!(api.base_url(), base_url);

    let health = api.health().await.unwrap();
    assert!(health.ok);
    assert_eq!(health.version, "0.1.0");

    let status = api.models_status().await.unwrap();
    let model = status.find("qwen-tts-0.6b").unwrap();
    assert_eq!(model.status, "completed");
    assert_eq!(model.progress, 100);
}

#[tokio::test]
async fn download_model_reports_progress_in_order() {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let base_url = serve(worker_app(Arc::clone(&bodies))).await;
    let api = WorkerApiClient::new(base_url).unwrap();

    let mut seen = Vec::new();
    let resp = api
        .download_model("qwen-tts-0.6b", |evt| seen.push((evt.percent, evt.stage)))
        .await
        .unwrap();

    assert!(resp.ok);
    assert_eq!(resp.path, "/cache/qwen");
    assert_eq!(
        seen,
        vec![(10, DownloadStage::Downloading), (100, DownloadStage::Completed)]
    );
    assert_eq!(
        bodies.lock().unwrap().as_slice(),
        &[json!({"model_id": "qwen-tts-0.6b"})]
    );
}

#[tokio::test]
async fn download_model_fails_on_worker_error_frame() {
    let app = Router::new()
        .route(
            "/models/download",
            post(|| async { Json(json!({"ok": true, "path": ""})) }),
        )
        .route(
            "/models/download/events",
            get(|| async {
                "data: {\"pct\": 0, \"stage\": \"error\", \"downloadedBytes\": 0, \"totalBytes\": 10, \"error\": \"401 Unauthorized\"}\n\n"
            }),
        );
    let api = WorkerApiClient::new(serve(app).await).unwrap();

    let mut seen = Vec::new();
    let result = api
        .download_model("qwen-tts-0.6b", |evt| seen.push(evt.stage))
        .await;

    assert_eq!(seen, vec![DownloadStage::Failed]);
    match result {
        Err(VoiceLabError::DownloadFailed(reason)) => assert_eq!(reason, "401 Unauthorized"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn single_session_events() {
    let base_url = serve(worker_app(Arc::default())).await;
    let api = WorkerApiClient::new(base_url).unwrap();

    let events: Vec<_> = api
        .model_download_events("qwen-tts-0.6b")
        .unwrap()
        .collect()
        .await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].as_ref().unwrap().percent, 100);
}

#[tokio::test]
async fn synthesize_pcm_uses_response_headers() {
    let base_url = serve(worker_app(Arc::default())).await;
    let api = WorkerApiClient::new(base_url).unwrap();

    let pcm = api
        .synthesize_pcm(&TtsRequest::new("narrator", "Hello there"))
        .await
        .unwrap();
    assert_eq!(pcm.bytes, vec![1, 0, 2, 0, 3, 0]);
    assert_eq!(pcm.sample_rate, 22_050);
    assert_eq!(pcm.channels, 1);
}

#[tokio::test]
async fn error_status_maps_to_http_error() {
    let app = Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading") }),
    );
    let api = WorkerApiClient::new(serve(app).await).unwrap();

    match api.health().await {
        Err(VoiceLabError::Http(msg)) => {
            assert!(msg.contains("503"));
            assert!(msg.contains("loading"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
