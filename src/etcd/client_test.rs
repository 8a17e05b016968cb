//! Tests for the etcd HTTP client against a local axum stand-in

use super::*;
use crate::etcd::Cluster;
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Duration;

/// Serve `router` on an ephemeral localhost port and return a member
/// whose client URL points at it
async fn serve(router: Router) -> Member {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Member {
        id: None,
        name: "i-deadbeef1".to_string(),
        peer_urls: vec!["http://127.0.0.1:2380".to_string()],
        client_urls: vec![format!("http://127.0.0.1:{}", port)],
    }
}

fn members_body() -> Value {
    json!({"members": [
        {"id": "ifoobari1", "name": "i-deadbeef1", "peerURLs": ["http://127.0.0.1:2380"], "clientURLs": ["http://127.0.0.1:2379"]},
        {"id": "ifoobari2", "name": "i-deadbeef2", "peerURLs": ["http://127.0.0.2:2380"], "clientURLs": ["http://127.0.0.2:2379"]},
        {"id": "ifoobari4", "name": "i-deadbeef4", "peerURLs": ["http://127.0.0.4:2380"], "clientURLs": []}
    ]})
}

fn etcd_router() -> Router {
    Router::new()
        .route(
            "/v2/members",
            get(|| async { Json(members_body()) }).post(|Json(body): Json<Value>| async move {
                let peer = body["peerURLs"][0].as_str().unwrap_or_default().to_string();
                if peer == "http://127.0.0.2:2380" {
                    (
                        StatusCode::CREATED,
                        Json(json!({"id": "ifoobar", "name": "", "peerURLs": [peer], "clientURLs": [""]})),
                    )
                } else {
                    (StatusCode::FORBIDDEN, Json(json!({"message": "forbidden"})))
                }
            }),
        )
        .route(
            "/v2/stats/self",
            get(|| async { Json(json!({"leaderInfo": {"leader": "ifoobari1"}})) }),
        )
        .route(
            "/v2/members/{id}",
            delete(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "ifoobari7" => StatusCode::INTERNAL_SERVER_ERROR,
                    "gone" => StatusCode::NOT_FOUND,
                    _ => StatusCode::NO_CONTENT,
                }
            }),
        )
}

fn api() -> HttpEtcdApi {
    HttpEtcdApi::new(Duration::from_secs(5))
}

#[tokio::test]
async fn test_members_parses_membership() {
    let via = serve(etcd_router()).await;

    let members = api().members(&via).await.unwrap();

    assert_eq!(members.len(), 3);
    assert_eq!(members[0].id.as_deref(), Some("ifoobari1"));
    assert_eq!(members[2].client_urls, Vec::<String>::new());
}

#[tokio::test]
async fn test_leader_reads_leader_info() {
    let via = serve(etcd_router()).await;

    let leader = api().leader(&via).await.unwrap();

    assert_eq!(leader.as_deref(), Some("ifoobari1"));
}

#[tokio::test]
async fn test_leader_empty_string_is_no_leader() {
    let router = Router::new().route(
        "/v2/stats/self",
        get(|| async { Json(json!({"leaderInfo": {"leader": ""}})) }),
    );
    let via = serve(router).await;

    assert_eq!(api().leader(&via).await.unwrap(), None);
}

#[tokio::test]
async fn test_add_member_returns_created_member() {
    let via = serve(etcd_router()).await;

    let added = api()
        .add_member(&via, &["http://127.0.0.2:2380".to_string()])
        .await
        .unwrap();

    assert_eq!(added.id.as_deref(), Some("ifoobar"));
    assert_eq!(added.peer_urls, vec!["http://127.0.0.2:2380".to_string()]);
}

#[tokio::test]
async fn test_add_member_rejected_status() {
    let via = serve(etcd_router()).await;

    let result = api()
        .add_member(&via, &["http://127.0.0.9:2380".to_string()])
        .await;

    assert!(matches!(result, Err(MemberError::Status { status: 403, .. })));
}

#[tokio::test]
async fn test_delete_member_statuses() {
    let via = serve(etcd_router()).await;
    let api = api();

    assert!(api.delete_member(&via, "ifoobari4").await.is_ok());
    assert!(matches!(
        api.delete_member(&via, "ifoobari7").await,
        Err(MemberError::Status { status: 500, .. })
    ));

    let gone = api.delete_member(&via, "gone").await.unwrap_err();
    assert!(gone.is_already_absent());
}

#[tokio::test]
async fn test_members_malformed_body() {
    let router = Router::new().route("/v2/members", get(|| async { "not json" }));
    let via = serve(router).await;

    let result = api().members(&via).await;

    assert!(matches!(result, Err(MemberError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_request_times_out() {
    let router = Router::new().route(
        "/v2/members",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(members_body())
        }),
    );
    let via = serve(router).await;

    let result = HttpEtcdApi::new(Duration::from_millis(100))
        .members(&via)
        .await;

    assert!(matches!(result, Err(MemberError::Http(_))));
}

#[tokio::test]
async fn test_member_without_client_url() {
    let via = Member {
        id: Some("ifoobari4".to_string()),
        name: "i-deadbeef4".to_string(),
        peer_urls: vec![],
        client_urls: vec![],
    };

    let result = api().members(&via).await;

    assert!(matches!(result, Err(MemberError::NoClientUrl(_))));
}

#[tokio::test]
async fn test_load_members_over_http() {
    let via = serve(etcd_router()).await;

    let cluster = Cluster::load_members(&api(), &[via.clone()], "eu-west-1", "i-deadbeef3").await;

    let accessible = cluster.accessible_member().expect("accessible member");
    assert_eq!(accessible.id.as_deref(), Some("ifoobari1"));
    assert_eq!(accessible.client_urls, via.client_urls);
    assert_eq!(cluster.leader_id(), Some("ifoobari1"));
}

/// A single endpoint answering 404 yields an empty view, not an error
#[tokio::test]
async fn test_load_members_http_404_is_absent_cluster() {
    let via = serve(Router::new()).await;

    let cluster = Cluster::load_members(&api(), &[via], "eu-west-1", "i-deadbeef3").await;

    assert!(cluster.accessible_member().is_none());
    assert!(cluster.leader_id().is_none());
}
