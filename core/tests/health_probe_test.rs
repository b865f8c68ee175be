use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use voicelab_core::worker::HealthProbe;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn becomes_healthy_after_warmup() {
    let started = Instant::now();
    let app = Router::new().route(
        "/health",
        get(move || async move {
            if started.elapsed() < Duration::from_secs(2) {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            }
        }),
    );
    let base_url = serve(app).await;

    let probe = HealthProbe::new().unwrap();
    assert!(probe.wait_until_healthy(&base_url, Duration::from_secs(5)).await);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn never_healthy_returns_false_on_time() {
    let app = Router::new().route("/health", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let base_url = serve(app).await;

    let probe = HealthProbe::new().unwrap();
    let begin = Instant::now();
    assert!(!probe.wait_until_healthy(&base_url, Duration::from_secs(1)).await);
    assert!(begin.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn connection_refused_counts_as_not_ready() {
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let probe = HealthProbe::new().unwrap();
    let base_url = format!("http://127.0.0.1:{}", port);
    assert!(!probe.check(&base_url).await);
    assert!(!probe.wait_until_healthy(&base_url, Duration::from_millis(700)).await);
}
