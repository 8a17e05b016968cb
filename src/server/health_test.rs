//! Tests for health endpoints

use super::*;
use std::time::Duration;

/// Wait for server to be ready with retry logic
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", max_retries, e),
        }
    }
    client
}

fn spawn_server(port: u16, readiness: ReadinessState, metrics: SharedMetrics) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _ = run_health_server(port, readiness, metrics).await;
    })
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let port = 18380;
    let handle = spawn_server(port, ReadinessState::new(), create_metrics().unwrap());
    let client = wait_for_server(port, 10).await;

    let response = client
        .get(format!("http://127.0.0.1:{}/healthz", port))
        .send()
        .await
        .expect("Failed to connect to health server");

    assert_eq!(response.status(), 200);
    handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_daemon_state() {
    let port = 18381;
    let readiness = ReadinessState::new();
    let handle = spawn_server(port, readiness.clone(), create_metrics().unwrap());
    let client = wait_for_server(port, 10).await;
    let url = format!("http://127.0.0.1:{}/readyz", port);

    // No etcd yet
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 503);

    readiness.set_ready();
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);

    readiness.set_not_ready();
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 503);

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text_format() {
    let port = 18382;
    let metrics = create_metrics().unwrap();
    metrics.record_eviction();
    let handle = spawn_server(port, ReadinessState::new(), metrics);
    let client = wait_for_server(port, 10).await;

    let response = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("etcd_keeper_evictions_total 1"));

    handle.abort();
}

#[test]
fn test_readiness_clones_share_state() {
    let state = ReadinessState::new();
    let clone = state.clone();

    state.set_ready();

    assert!(clone.is_ready());
}
