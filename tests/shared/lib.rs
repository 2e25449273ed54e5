//! Shared fixtures for the end-to-end tests

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::{Value, json};
use wirerpc_core::{BackoffConfig, ProtocolConfig};
use wirerpc_server::{HandlerError, MethodRegistry, ServerConfig, parse_params};

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Methods every e2e server exposes
pub fn math_methods() -> MethodRegistry {
    MethodRegistry::new()
        .with_fn("add", |params| async move {
            let numbers: Vec<i64> = parse_params(params)?;
            Ok(json!(numbers.iter().sum::<i64>()))
        })
        .with_fn("divide", |params| async move {
            let (a, b): (f64, f64) = parse_params(params)?;
            if b == 0.0 {
                return Err(HandlerError::custom(-32010, "Division by zero", Some(json!([a, b]))));
            }
            Ok(json!(a / b))
        })
        .with_fn("sleep", |params| async move {
            let (ms,): (u64,) = parse_params(params)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::from(ms))
        })
}

/// Server config on an ephemeral loopback port
pub fn server_config() -> ServerConfig {
    ServerConfig::default().with_bind_address(SocketAddr::from(([127, 0, 0, 1], 0)))
}

/// Client config with short timeouts and fast retries
pub fn client_config() -> ProtocolConfig {
    ProtocolConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_backoff(BackoffConfig::fixed(Duration::from_millis(50)))
}

/// A loopback address nothing is listening on right now
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}
