//! End-to-end tests: the router served on an ephemeral port in front of a stub
//! review service, driven over real HTTP with reqwest

use self::upstream::spawn_upstream;
use crate::AppState;
use crate::database::DatabaseManager;
use crate::env::AppConfig;
use crate::reporting::{LogOnlyHandler, QueuedReporter, ViolationHandler, store::AbuseReportStore};
use crate::routing::router::create_router;
use crate::security::{AbuseLimiter, LimiterConfig, allowlist::Allowlist};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;

const REVIEW_PATH: &str = "/api/trpc/review.create";

async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    DatabaseManager::new(pool.clone())
        .apply_pending_migrations()
        .await
        .expect("Failed to apply migrations");
    pool
}

fn limiter(max_requests: u32, allowlist: &str, handler: Arc<dyn ViolationHandler>) -> Arc<AbuseLimiter> {
    Arc::new(AbuseLimiter::new(
        LimiterConfig {
            window: Duration::from_secs(60),
            max_requests,
            allowlist: Allowlist::parse(allowlist).unwrap(),
            salt: "e2e-salt".to_string(),
            max_tracked_windows: 1000,
        },
        handler,
    ))
}

fn app_state(pool: SqlitePool, upstream_url: &str, limiter: Arc<AbuseLimiter>) -> AppState {
    AppState {
        db: pool,
        http_client: Client::new(),
        config: AppConfig {
            upstream_url: upstream_url.to_string(),
            review_path: REVIEW_PATH.to_string(),
            ..AppConfig::default()
        },
        limiter,
    }
}

async fn spawn_gate(state: AppState) -> (SocketAddr, oneshot::Sender<()>) {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await
        .unwrap();
    });
    (addr, tx)
}

async fn submit(client: &Client, gate: SocketAddr, client_ip: Option<&str>) -> reqwest::Response {
    let mut request = client
        .post(format!("http://{}{}?batch=1", gate, REVIEW_PATH))
        .header("referer", "https://jdma.example.fr/Demarches/12?button=34")
        .json(&serde_json::json!({"0": {"json": {"product_id": 12, "button_id": 34}}}));
    if let Some(ip) = client_ip {
        request = request.header("x-client-ip", ip);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn allowed_submissions_are_forwarded_and_excess_is_rejected() {
    let upstream = spawn_upstream().await;
    let state = app_state(
        create_test_pool().await,
        &upstream.url,
        limiter(5, "", Arc::new(LogOnlyHandler)),
    );
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    for _ in 0..5 {
        let res = submit(&client, gate, Some("198.51.100.7")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["result"]["data"]["json"]["status"], "created");
    }

    let res = submit(&client, gate, Some("198.51.100.7")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "E-RATE-LIMITED");
    assert!(body["error"]["details"]["retryAfterMs"].as_u64().unwrap() <= 60_000);

    let received = upstream.received().await;
    assert_eq!(received.len(), 5);
    assert_eq!(received[0].query.as_deref(), Some("batch=1"));
    assert!(received[0].body.contains("product_id"));
    assert_eq!(
        received[0].referer.as_deref(),
        Some("https://jdma.example.fr/Demarches/12?button=34")
    );

    // another client is unaffected
    let res = submit(&client, gate, Some("203.0.113.20")).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn allowlisted_clients_are_never_limited() {
    let upstream = spawn_upstream().await;
    let limiter = limiter(2, "10.0.0.0-10.0.0.255", Arc::new(LogOnlyHandler));
    let state = app_state(create_test_pool().await, &upstream.url, limiter.clone());
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    for _ in 0..10 {
        let res = submit(&client, gate, Some("10.0.0.42")).await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let stats = limiter.stats();
    assert_eq!(stats.bypassed, 10);
    assert_eq!(stats.tracked_windows, 0);
}

#[tokio::test]
async fn peer_address_is_used_without_proxy_headers() {
    let upstream = spawn_upstream().await;
    let state = app_state(
        create_test_pool().await,
        &upstream.url,
        limiter(2, "", Arc::new(LogOnlyHandler)),
    );
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    assert_eq!(submit(&client, gate, None).await.status(), StatusCode::CREATED);
    assert_eq!(submit(&client, gate, None).await.status(), StatusCode::CREATED);
    assert_eq!(
        submit(&client, gate, None).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn denied_submission_is_recorded_as_abuse_report() {
    let upstream = spawn_upstream().await;
    let pool = create_test_pool().await;
    let store = AbuseReportStore::new(pool.clone());
    let (reporter, _worker) = QueuedReporter::spawn(store.clone(), 16, Duration::from_secs(2));
    let state = app_state(pool, &upstream.url, limiter(3, "", Arc::new(reporter)));
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    for _ in 0..3 {
        submit(&client, gate, Some("198.51.100.7")).await;
    }
    let res = submit(&client, gate, Some("198.51.100.7")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let mut rows = Vec::new();
    for _ in 0..100 {
        rows = store.recent(10).await.unwrap();
        if !rows.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.coarse_address, "198.51.100.0");
    assert_eq!(row.target_product_id, 12);
    assert_eq!(row.target_button_id, 34);
    assert_eq!(row.total_attempts, 4);
    assert_eq!(row.anonymized_id.len(), 64);
}

#[tokio::test]
async fn unreachable_upstream_yields_bad_gateway() {
    // bind then drop to get a port nothing listens on
    let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("http://{}", closed.local_addr().unwrap());
    drop(closed);

    let state = app_state(
        create_test_pool().await,
        &dead_url,
        limiter(5, "", Arc::new(LogOnlyHandler)),
    );
    let (gate, _shutdown) = spawn_gate(state).await;

    let res = submit(&Client::new(), gate, Some("198.51.100.7")).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn health_reports_limiter_stats_and_is_not_limited() {
    let upstream = spawn_upstream().await;
    let state = app_state(
        create_test_pool().await,
        &upstream.url,
        limiter(1, "", Arc::new(LogOnlyHandler)),
    );
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    submit(&client, gate, Some("198.51.100.7")).await;
    submit(&client, gate, Some("198.51.100.7")).await;

    for _ in 0..5 {
        let res = client
            .get(format!("http://{}/health", gate))
            .header("x-client-ip", "198.51.100.7")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let body: Value = client
        .get(format!("http://{}/health", gate))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["limiter"]["allowed"], 1);
    assert_eq!(body["limiter"]["denied"], 1);
    assert_eq!(body["limiter"]["tracked_windows"], 1);
}

#[tokio::test]
async fn unknown_paths_are_not_counted() {
    let upstream = spawn_upstream().await;
    let limiter = limiter(1, "", Arc::new(LogOnlyHandler));
    let state = app_state(create_test_pool().await, &upstream.url, limiter.clone());
    let (gate, _shutdown) = spawn_gate(state).await;

    let res = Client::new()
        .post(format!("http://{}/api/trpc/form.create", gate))
        .header("x-client-ip", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(limiter.stats().tracked_windows, 0);
}

#[tokio::test]
async fn upstream_stub_sees_nothing_from_denied_clients() {
    let upstream = spawn_upstream().await;
    let state = app_state(
        create_test_pool().await,
        &upstream.url,
        limiter(1, "", Arc::new(LogOnlyHandler)),
    );
    let (gate, _shutdown) = spawn_gate(state).await;
    let client = Client::new();

    for _ in 0..4 {
        submit(&client, gate, Some("2001:db8::7")).await;
    }

    assert_eq!(upstream.received().await.len(), 1);
}
