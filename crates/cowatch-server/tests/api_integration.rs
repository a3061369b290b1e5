#[allow(dead_code)]
mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use cowatch_server::config::ServerConfig;
use cowatch_server::store::{Repository, StoreError, StoreResult, room_key};

use common::*;

/// A store whose every call fails, as if the backend were down.
struct DownStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl Repository for DownStore {
    async fn ping(&self) -> StoreResult<()> {
        down()
    }
    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        down()
    }
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        down()
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        down()
    }
    async fn del(&self, _key: &str) -> StoreResult<()> {
        down()
    }
    async fn lrange_all(&self, _key: &str) -> StoreResult<Vec<String>> {
        down()
    }
    async fn rpush(&self, _key: &str, _value: &str) -> StoreResult<()> {
        down()
    }
    async fn lset(&self, _key: &str, _index: usize, _value: &str) -> StoreResult<()> {
        down()
    }
    async fn replace_list(&self, _key: &str, _values: &[String]) -> StoreResult<()> {
        down()
    }
    async fn sadd(&self, _key: &str, _member: &str) -> StoreResult<()> {
        down()
    }
    async fn srem(&self, _key: &str, _member: &str) -> StoreResult<()> {
        down()
    }
    async fn smembers(&self, _key: &str) -> StoreResult<Vec<String>> {
        down()
    }
}

async fn get_json(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn health_reports_counts() {
    let server = TestServer::new().await;
    let _ws = ws_connect(&server.ws_url()).await;
    // Let the upgrade register
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get_json(&format!("{}/health", server.base_url())).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"]["websocket"], 1);
    assert_eq!(body["connections"]["lobby"], 0);
    assert_eq!(body["rooms"]["active"], 0);
    assert_eq!(body["rooms"]["voiceActive"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn ready_when_store_answers() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");
}

#[tokio::test]
async fn store_outage_degrades_health_and_readiness() {
    let server = TestServer::with_store(ServerConfig::default(), Arc::new(DownStore)).await;

    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let (status, body) = get_json(&format!("{}/health", server.base_url())).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "degraded");
    assert!(body["rooms"]["active"].is_null());

    let (status, body) = get_json(&format!("{}/api/rooms", server.base_url())).await;
    assert_eq!(status, 500);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn list_rooms_pages_busiest_first() {
    let server = TestServer::new().await;

    let mut a1 = ws_connect(&server.ws_url()).await;
    let mut a2 = ws_connect(&server.ws_url()).await;
    let mut b1 = ws_connect(&server.ws_url()).await;
    ws_join_room(&mut a1, "1111", 1, "alice", true).await;
    ws_join_room(&mut a2, "1111", 2, "bob", false).await;
    ws_join_room(&mut b1, "2222", 3, "carol", true).await;

    let (status, body) = get_json(&format!("{}/api/rooms", server.base_url())).await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["hasMore"], false);
    let rooms = body["rooms"].as_array().unwrap();
    assert_eq!(rooms[0]["roomCode"], "1111");
    assert_eq!(rooms[0]["memberCount"], 2);
    assert_eq!(rooms[0]["hostName"], "alice");
    assert_eq!(rooms[1]["roomCode"], "2222");

    let (_, body) = get_json(&format!("{}/api/rooms?page=1&limit=1", server.base_url())).await;
    assert_eq!(body["rooms"].as_array().unwrap().len(), 1);
    assert_eq!(body["hasMore"], true);

    let (_, body) = get_json(&format!("{}/api/rooms?page=2&limit=1", server.base_url())).await;
    assert_eq!(body["rooms"][0]["roomCode"], "2222");
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn list_rooms_drops_expired_registry_entries() {
    let server = TestServer::new().await;
    let mut ws = ws_connect(&server.ws_url()).await;
    ws_join_room(&mut ws, "1111", 1, "alice", true).await;

    // State vanished without the registry being told
    server.state.store.del(&room_key("1111")).await.unwrap();

    let (_, body) = get_json(&format!("{}/api/rooms", server.base_url())).await;
    assert_eq!(body["total"], 0);
    assert!(
        server
            .state
            .store
            .smembers(cowatch_server::store::ACTIVE_ROOMS_KEY)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn check_room_requires_code() {
    let server = TestServer::new().await;
    let (status, body) = get_json(&format!("{}/api/rooms/check", server.base_url())).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, _) = get_json(&format!("{}/api/rooms/check?code=", server.base_url())).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn check_room_reports_existence() {
    let server = TestServer::new().await;
    let url = |code: &str| format!("{}/api/rooms/check?code={code}", server.base_url());

    let (status, body) = get_json(&url("1234")).await;
    assert_eq!(status, 200);
    assert_eq!(body["exists"], false);

    let mut ws = ws_connect(&server.ws_url()).await;
    ws_join_room(&mut ws, "1234", 1, "alice", true).await;

    let (_, body) = get_json(&url("1234")).await;
    assert_eq!(body["exists"], true);

    let (status, body) = get_json(&url("bad%20code")).await;
    assert_eq!(status, 200);
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn new_room_code_is_free_and_four_digits() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/rooms/code", server.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 4);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    assert!(!server.state.store.exists(&room_key(code)).await.unwrap());
}

#[tokio::test]
async fn unknown_api_route_is_json_404() {
    let server = TestServer::new().await;
    let (status, body) = get_json(&format!("{}/api/nope", server.base_url())).await;
    assert_eq!(status, 404);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/rooms", server.base_url()))
        .header("Origin", "https://watch.example")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
