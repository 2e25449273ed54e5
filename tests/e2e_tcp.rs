//! Client and server talking over TCP

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use wirerpc_client::{Client, ClientError, ConnectionState};
use wirerpc_integration_tests::{
    client_config, init_tracing, math_methods, server_config, unused_addr,
};
use wirerpc_server::{ServerEvent, TcpServer};

async fn start() -> Result<(TcpServer, Client)> {
    init_tracing();
    let server = TcpServer::new(server_config(), math_methods())?;
    let addr = server.listen().await?;
    let client = Client::from_url(&format!("tcp://{}", addr), client_config())?;
    client.connect().await?;
    info!(%addr, "Connected");
    Ok((server, client))
}

#[tokio::test]
async fn test_request_round_trip() -> Result<()> {
    let (server, client) = start().await?;

    let response = client.request("add", Some(json!([1, 2, 3]))).await?;
    assert_eq!(response, json!({"result": 6, "jsonrpc": "2.0", "id": 1}));

    client.end().await?;
    server.close()?;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() -> Result<()> {
    let (_server, client) = start().await?;

    let (slow, fast) = tokio::join!(
        client.request("sleep", Some(json!([50]))),
        client.request("add", Some(json!([2, 2]))),
    );
    assert_eq!(slow?["result"], 50);
    assert_eq!(fast?["result"], 4);
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_errors_reach_the_caller() -> Result<()> {
    let (_server, client) = start().await?;

    let err = client.request("divide", Some(json!([1, 0]))).await.unwrap_err();
    let rpc = err.rpc_error().expect("rpc error");
    assert_eq!(rpc.code(), -32010);
    assert_eq!(rpc.error.message, "Division by zero");
    assert_eq!(rpc.error.data, Some(json!([1.0, 0.0])));

    let err = client.request("missing", None).await.unwrap_err();
    assert_eq!(err.rpc_error().expect("rpc error").code(), -32601);

    let err = client.request("add", Some(json!({"a": 1}))).await.unwrap_err();
    assert_eq!(err.rpc_error().expect("rpc error").code(), -32602);
    Ok(())
}

#[tokio::test]
async fn test_batch_round_trip() -> Result<()> {
    let (_server, client) = start().await?;

    let responses = client
        .batch(vec![
            client.message("add", Some(json!([1, 1])), true)?,
            client.message("log", Some(json!(["ignored"])), false)?,
            client.message("add", Some(json!([2, 2])), true)?,
        ])
        .await?;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["result"], 2);
    assert_eq!(responses[1]["result"], 4);

    let err = client
        .batch(vec![
            client.message("add", Some(json!([1])), true)?,
            client.message("missing", None, true)?,
        ])
        .await
        .unwrap_err();
    match err {
        ClientError::BatchRejected(members) => assert_eq!(members.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_notifications_both_ways() -> Result<()> {
    let (server, client) = start().await?;
    let mut events = server.events();

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("update", move |notification| {
        let _ = tx.send(notification.params);
    });
    assert_eq!(server.notify("update", Some(json!({"n": 1})))?, 1);
    assert_eq!(rx.recv().await, Some(Some(json!({"n": 1}))));

    client.notify("log", Some(json!(["hello"]))).await?;
    match events.recv().await? {
        ServerEvent::Notification(notification) => {
            assert_eq!(notification.method, "log");
            assert_eq!(notification.params, Some(json!(["hello"])));
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_close_fails_pending_calls() -> Result<()> {
    let (server, client) = start().await?;

    let closer = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.close()
    };
    let (result, closed) = tokio::join!(client.request("sleep", Some(json!([5000]))), closer);
    closed?;

    let err = result.unwrap_err();
    assert_eq!(err.rpc_error().expect("rpc error").error.message, "Connection closed");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_connect_retries_until_server_listens() -> Result<()> {
    init_tracing();
    let addr = unused_addr();
    let client = Client::from_url(&format!("tcp://{}", addr), client_config().with_retries(20))?;

    let server = TcpServer::new(server_config().with_bind_address(addr), math_methods())?;
    let starter = async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        server.listen().await
    };
    let (connected, listening) = tokio::join!(client.connect(), starter);
    listening?;
    connected?;

    assert_eq!(client.request("add", Some(json!([40, 2]))).await?["result"], 42);
    Ok(())
}

#[tokio::test]
async fn test_connect_fails_without_server() -> Result<()> {
    init_tracing();
    let addr = unused_addr();
    let client = Client::from_url(&format!("tcp://{}", addr), client_config().with_retries(1))?;

    let err = client.connect().await.unwrap_err();
    assert!(err.is_retryable(), "{:?}", err);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}
