//! Connect, retry and disconnect bookkeeping for one client connection.

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::BackoffConfig;
use crate::error::TransportError;
use crate::transport::{EventReceiver, Transport};

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Drives `Disconnected -> Connecting -> Connected -> Disconnected`.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: Mutex<ConnectionState>,
    retries: u32,
    backoff: BackoffConfig,
}

/// A claimed `Connecting` state. Dropping it before a connection is made
/// puts the state back to `Disconnected`.
#[derive(Debug)]
pub struct ConnectAttempt<'a> {
    lifecycle: &'a ConnectionLifecycle,
    armed: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.lifecycle.state.lock() = ConnectionState::Disconnected;
        }
    }
}

impl ConnectAttempt<'_> {
    /// Connect `transport`, retrying refused connections. The retry budget
    /// starts afresh on every attempt.
    pub async fn run(
        mut self,
        transport: &mut dyn Transport,
    ) -> Result<EventReceiver, TransportError> {
        let lifecycle = self.lifecycle;
        let mut remaining = lifecycle.retries;
        let mut attempt = 0;
        loop {
            match transport.connect().await {
                Ok(events) => {
                    self.armed = false;
                    *lifecycle.state.lock() = ConnectionState::Connected;
                    info!(
                        transport = %transport.transport_type(),
                        endpoint = %transport.endpoint(),
                        "Connected"
                    );
                    return Ok(events);
                }
                Err(e) if e.is_retryable() && remaining > 0 => {
                    remaining -= 1;
                    attempt += 1;
                    warn!("Unable to connect. Retrying. {} attempts left.", remaining);
                    tokio::time::sleep(lifecycle.backoff.delay_for_attempt(attempt)).await;
                }
                Err(e) => {
                    error!(endpoint = %transport.endpoint(), error = %e, "Unable to connect");
                    return Err(e);
                }
            }
        }
    }
}

impl ConnectionLifecycle {
    pub fn new(retries: u32, backoff: BackoffConfig) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            retries,
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Move `Disconnected -> Connecting`, rejecting the call at once when a
    /// connection exists or another attempt is under way.
    pub fn begin(&self) -> Result<ConnectAttempt<'_>, TransportError> {
        let mut state = self.state.lock();
        if *state != ConnectionState::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        *state = ConnectionState::Connecting;
        Ok(ConnectAttempt {
            lifecycle: self,
            armed: true,
        })
    }

    /// [`begin`](Self::begin) and [`ConnectAttempt::run`] in one step.
    pub async fn connect(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<EventReceiver, TransportError> {
        self.begin()?.run(transport).await
    }

    /// Record that the connection is gone. Returns false if it already was.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.lock();
        let was_connected = *state != ConnectionState::Disconnected;
        *state = ConnectionState::Disconnected;
        was_connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportType;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Refuses the first `refusals` attempts.
    struct FlakyTransport {
        refusals: u32,
        attempts: Arc<AtomicU32>,
        fatal: bool,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn transport_type(&self) -> TransportType {
            TransportType::Tcp
        }

        fn endpoint(&self) -> String {
            "127.0.0.1:1".to_string()
        }

        async fn connect(&mut self) -> Result<EventReceiver, TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fatal {
                return Err(TransportError::from_connect_error(io::Error::from(
                    io::ErrorKind::PermissionDenied,
                )));
            }
            if attempt < self.refusals {
                return Err(TransportError::from_connect_error(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )));
            }
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Ok(rx)
        }

        async fn write(&mut self, _frame: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    fn flaky(refusals: u32) -> (FlakyTransport, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            FlakyTransport {
                refusals,
                attempts: attempts.clone(),
                fatal: false,
            },
            attempts,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_refused_connections() {
        let lifecycle = ConnectionLifecycle::new(2, BackoffConfig::fixed(Duration::from_millis(50)));
        let (mut transport, attempts) = flaky(2);

        assert!(lifecycle.connect(&mut transport).await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted() {
        let lifecycle = ConnectionLifecycle::new(1, BackoffConfig::fixed(Duration::from_millis(50)));
        let (mut transport, attempts) = flaky(5);

        let err = lifecycle.connect(&mut transport).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

        // The budget is reset for the next connect call.
        let err = lifecycle.connect(&mut transport).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let lifecycle = ConnectionLifecycle::new(3, BackoffConfig::default());
        let (mut transport, attempts) = flaky(0);
        transport.fatal = true;

        assert!(lifecycle.connect(&mut transport).await.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let lifecycle = ConnectionLifecycle::new(0, BackoffConfig::default());
        let (mut transport, _) = flaky(0);
        let _events = lifecycle.connect(&mut transport).await.unwrap();

        let err = lifecycle.connect(&mut transport).await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyConnected));

        assert!(lifecycle.mark_disconnected());
        assert!(!lifecycle.mark_disconnected());
        assert!(lifecycle.connect(&mut transport).await.is_ok());
    }

    #[test]
    fn test_begin_rejected_while_connecting() {
        let lifecycle = ConnectionLifecycle::new(0, BackoffConfig::default());
        let attempt = lifecycle.begin().unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);
        assert!(matches!(lifecycle.begin(), Err(TransportError::AlreadyConnected)));

        drop(attempt);
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert!(lifecycle.begin().is_ok());
    }
}
