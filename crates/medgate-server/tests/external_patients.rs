//! External patient endpoints against a wiremock upstream.

use std::time::Duration;

use medgate_server::{AppConfig, ServerBuilder, StorageBackend};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_server(upstream: &str) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let mut cfg = AppConfig::default();
    cfg.storage.backend = StorageBackend::Memory;
    cfg.upstream.base_url = upstream.to_string();
    cfg.upstream.timeout_ms = 5_000;

    let app = ServerBuilder::new()
        .with_config(cfg)
        .build()
        .await
        .expect("build server")
        .router();

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}/api/v1/external-patients"), tx, server)
}

fn patient(id: &str) -> Value {
    json!({"resourceType": "Patient", "id": id})
}

#[tokio::test]
async fn cached_read_survives_upstream_outage() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/ABC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(patient("ABC")))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(&upstream.uri()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/ABC/cached")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let first: Value = resp.json().await.unwrap();
    assert_eq!(first, patient("ABC"));

    // Upstream goes away; the cached copy is served
    upstream.reset().await;
    let resp = client.get(format!("{base}/ABC/cached")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let second: Value = resp.json().await.unwrap();
    assert_eq!(second, first);

    // The uncached route always goes upstream
    let resp = client.get(format!("{base}/ABC")).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "upstream");
    assert_eq!(body["details"]["upstream_status"], 404);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn upstream_failures_are_not_cached() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/FLAKY"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/Patient/FLAKY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(patient("FLAKY")))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(&upstream.uri()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/FLAKY/cached")).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["details"]["upstream_status"], 503);
    assert_eq!(body["details"]["upstream_body"], "try later");

    let resp = client.get(format!("{base}/FLAKY/cached")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn delayed_read_times_out() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/SLOW"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(patient("SLOW"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/Patient/FAST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(patient("FAST")))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(&upstream.uri()).await;
    let client = reqwest::Client::new();

    let started = std::time::Instant::now();
    let resp = client
        .get(format!("{base}/SLOW/delayed?timeout=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 408);
    assert!(started.elapsed() < Duration::from_millis(2_500));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "timeout");

    let resp = client
        .get(format!("{base}/FAST/delayed?timeout=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for bad in ["0", "-1", "abc"] {
        let resp = client
            .get(format!("{base}/FAST/delayed?timeout={bad}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "timeout={bad}");
    }

    // Larger than any representable deadline: bounded by the request budget instead.
    let resp = client
        .get(format!("{base}/FAST/delayed?timeout={}", u64::MAX))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "FAST");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn search_and_create_pass_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient"))
        .and(query_param("family", "Doe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": 1,
            "entry": [{"resource": patient("1")}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/Patient"))
        .respond_with(ResponseTemplate::new(201).set_body_json(patient("new-1")))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(&upstream.uri()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}?family=Doe&family=Roe"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["entry"][0]["resource"]["id"], "1");

    let resp = client
        .post(&base)
        .json(&json!({"resourceType": "Patient", "active": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["id"], "new-1");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn malformed_upstream_response() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/BROKEN"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(&upstream.uri()).await;
    let resp = reqwest::get(format!("{base}/BROKEN")).await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
