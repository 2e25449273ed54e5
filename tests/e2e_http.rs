//! Client and server talking over HTTP

use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{Value, json};

use wirerpc_client::{Client, ConnectionState};
use wirerpc_integration_tests::{
    client_config, init_tracing, math_methods, server_config, unused_addr,
};
use wirerpc_server::{HttpServer, ServerEvent};

async fn start() -> Result<(HttpServer, String)> {
    init_tracing();
    let server = HttpServer::new(server_config().with_max_body_size(1024), math_methods())?;
    let addr = server.listen().await?;
    Ok((server, format!("http://{}/", addr)))
}

async fn post(url: &str, body: impl Into<String>) -> Result<(StatusCode, String)> {
    let response = reqwest::Client::new()
        .post(url)
        .body(body.into())
        .send()
        .await?;
    let status = response.status();
    Ok((status, response.text().await?))
}

#[tokio::test]
async fn test_client_over_http() -> Result<()> {
    let (_server, url) = start().await?;
    let client = Client::from_url(&url, client_config())?;
    client.connect().await?;

    let response = client.request("add", Some(json!([3, 4]))).await?;
    assert_eq!(response["result"], 7);

    let err = client.request("divide", Some(json!([1, 0]))).await.unwrap_err();
    assert_eq!(err.rpc_error().expect("rpc error").code(), -32010);

    let err = client.request("missing", None).await.unwrap_err();
    assert_eq!(err.rpc_error().expect("rpc error").code(), -32601);

    client.notify("log", Some(json!(["hello"]))).await?;

    let responses = client
        .batch(vec![
            client.message("add", Some(json!([1, 2])), true)?,
            client.message("add", Some(json!([3, 4])), true)?,
        ])
        .await?;
    assert_eq!(responses.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_status_codes() -> Result<()> {
    let (_server, url) = start().await?;

    let (status, body) = post(&url, r#"{"jsonrpc":"2.0","method":"add","params":[1],"id":1}"#).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "{\"result\":1,\"jsonrpc\":\"2.0\",\"id\":1}\n");

    let (status, body) = post(&url, r#"{"jsonrpc":"2.0","method":"missing","id":2}"#).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let reply: Value = serde_json::from_str(&body)?;
    assert_eq!(reply["error"]["data"], "missing");

    let (status, _) = post(&url, "{oops").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, _) = post(&url, "[]").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(&url, r#"{"jsonrpc":"2.0","method":"log"}"#).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (status, _) = post(&url, "x".repeat(4096)).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let status = reqwest::get(&url).await?.status();
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = post(&format!("{}other", url), "{}").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_http_notification_events() -> Result<()> {
    let (server, url) = start().await?;
    let mut events = server.events();

    let (status, _) = post(&url, r#"{"jsonrpc":"2.0","method":"log","params":["x"]}"#).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    loop {
        match events.recv().await? {
            ServerEvent::Notification(notification) => {
                assert_eq!(notification.params, Some(json!(["x"])));
                break;
            }
            ServerEvent::ClientConnected(info) | ServerEvent::ClientDisconnected(info) => {
                assert_eq!(info.transport.to_string(), "HTTP");
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_request_timeout_does_not_wait_for_reply() -> Result<()> {
    let (_server, url) = start().await?;
    let client = Client::from_url(&url, client_config().with_timeout(Duration::from_millis(100)))?;
    client.connect().await?;

    let started = Instant::now();
    let err = client.request("sleep", Some(json!([2000]))).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_calls_do_not_queue_behind_slow_request() -> Result<()> {
    let (_server, url) = start().await?;
    let client = Client::from_url(&url, client_config())?;
    client.connect().await?;

    let slow = client.request("sleep", Some(json!([1500])));
    let fast = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        let response = client.request("add", Some(json!([1, 2]))).await?;
        client.notify("log", None).await?;
        anyhow::Ok((response, started.elapsed()))
    };
    let (slow, fast) = tokio::join!(slow, fast);

    let (response, elapsed) = fast?;
    assert_eq!(response["result"], 3);
    assert!(elapsed < Duration::from_secs(1), "{:?}", elapsed);
    assert_eq!(slow?["result"], 1500);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_fails_pending_call() -> Result<()> {
    init_tracing();
    let client = Client::from_url(&format!("http://{}/", unused_addr()), client_config())?;
    client.connect().await?;

    let started = Instant::now();
    let err = client.request("add", Some(json!([1]))).await.unwrap_err();
    assert!(err.rpc_error().is_some());
    assert!(!err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}
