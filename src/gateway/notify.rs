//! Notification channel
//!
//! LISTEN/NOTIFY fan-out on one dedicated connection, opened lazily on the
//! first subscribe. Raw backend notifications are relayed to a broadcast
//! channel; a supervising loop reconnects with doubling backoff after
//! connection loss and re-issues `LISTEN` for every tracked channel.
//! Worker errors land in a bounded error log, never in the host's lap.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_postgres::Client;

use crate::config::ConnectionConfig;
use crate::db::connect::open_with_messages;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::command::quote_ident;

const BROADCAST_CAPACITY: usize = 256;
const ERROR_LOG_CAPACITY: usize = 16;
const RECONNECT_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// One delivered backend notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
    pub process_id: i32,
}

struct HubInner {
    client: Option<Client>,
    channels: BTreeSet<String>,
    worker_running: bool,
}

struct HubState {
    config: ConnectionConfig,
    broadcast: broadcast::Sender<Notification>,
    inner: Mutex<HubInner>,
    errors: std::sync::Mutex<VecDeque<String>>,
    shutdown: AtomicBool,
}

impl HubState {
    fn push_error(&self, message: String) {
        if let Ok(mut log) = self.errors.lock() {
            if log.len() == ERROR_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(message);
        }
    }
}

/// Multicast hub over one LISTEN connection. Cheap to clone; clones share
/// the connection, channel set, and broadcast stream.
#[derive(Clone)]
pub struct NotificationHub {
    state: Arc<HubState>,
}

impl NotificationHub {
    pub(crate) fn new(config: ConnectionConfig) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Arc::new(HubState {
                config,
                broadcast,
                inner: Mutex::new(HubInner {
                    client: None,
                    channels: BTreeSet::new(),
                    worker_running: false,
                }),
                errors: std::sync::Mutex::new(VecDeque::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Start listening on `channel`. Opens the dedicated connection and
    /// starts the relay worker on first use.
    pub async fn subscribe(&self, channel: &str) -> GatewayResult<()> {
        self.state.shutdown.store(false, Ordering::SeqCst);
        let mut inner = self.state.inner.lock().await;
        inner.channels.insert(channel.to_string());

        if inner.client.is_none() && !inner.worker_running {
            let (client, messages) = open_with_messages(&self.state.config).await?;
            inner.client = Some(client);
            inner.worker_running = true;
            tokio::spawn(relay_loop(Arc::clone(&self.state), messages));
        }

        if let Some(client) = &inner.client {
            let stmt = format!("LISTEN {}", quote_ident(channel));
            client
                .batch_execute(&stmt)
                .await
                .map_err(GatewayError::from_backend)?;
        }
        Ok(())
    }

    /// Stop listening on `channel`. Other channels keep delivering.
    pub async fn unsubscribe(&self, channel: &str) -> GatewayResult<()> {
        let mut inner = self.state.inner.lock().await;
        if !inner.channels.remove(channel) {
            return Ok(());
        }
        if let Some(client) = &inner.client {
            let stmt = format!("UNLISTEN {}", quote_ident(channel));
            client
                .batch_execute(&stmt)
                .await
                .map_err(GatewayError::from_backend)?;
        }
        Ok(())
    }

    /// A fresh receiver over everything the hub delivers.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.state.broadcast.subscribe()
    }

    /// Recent worker errors, oldest first, bounded.
    pub fn recent_errors(&self) -> Vec<String> {
        self.state
            .errors
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Close the dedicated connection and stop the relay worker.
    pub async fn shutdown(&self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        let mut inner = self.state.inner.lock().await;
        inner.client = None;
        inner.channels.clear();
        inner.worker_running = false;
    }
}

async fn relay_loop(
    state: Arc<HubState>,
    mut messages: mpsc::UnboundedReceiver<tokio_postgres::Notification>,
) {
    let mut backoff = RECONNECT_INITIAL;
    loop {
        match messages.recv().await {
            Some(raw) => {
                backoff = RECONNECT_INITIAL;
                let note = Notification {
                    channel: raw.channel().to_string(),
                    payload: raw.payload().to_string(),
                    process_id: raw.process_id(),
                };
                // Send only fails when nobody is receiving right now
                let _ = state.broadcast.send(note);
            }
            None => {
                if state.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                {
                    let mut inner = state.inner.lock().await;
                    inner.client = None;
                    if inner.channels.is_empty() {
                        inner.worker_running = false;
                        return;
                    }
                }
                state.push_error("notification connection lost".to_string());
                tracing::warn!(
                    delay_ms = backoff.as_millis() as u64,
                    "notification connection lost; reconnecting"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);

                match reconnect(&state).await {
                    Ok(new_messages) => messages = new_messages,
                    Err(e) => {
                        // Receiver stays closed; next recv returns None
                        // immediately and the loop sleeps again
                        state.push_error(format!("notification reconnect failed: {}", e));
                        tracing::warn!("notification reconnect failed: {}", e);
                    }
                }
            }
        }
    }
}

async fn reconnect(
    state: &Arc<HubState>,
) -> GatewayResult<mpsc::UnboundedReceiver<tokio_postgres::Notification>> {
    let mut inner = state.inner.lock().await;
    let (client, messages) = open_with_messages(&state.config).await?;
    for channel in &inner.channels {
        let stmt = format!("LISTEN {}", quote_ident(channel));
        client
            .batch_execute(&stmt)
            .await
            .map_err(GatewayError::from_backend)?;
    }
    inner.client = Some(client);
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> HubState {
        let (broadcast, _) = broadcast::channel(4);
        let config = ConnectionConfig {
            name: "test".to_string(),
            profile: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "amdb".to_string(),
            username: "amdb".to_string(),
            password: None,
            ssl_mode: crate::config::SslMode::Disable,
        };
        HubState {
            config,
            broadcast,
            inner: Mutex::new(HubInner {
                client: None,
                channels: BTreeSet::new(),
                worker_running: false,
            }),
            errors: std::sync::Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    #[test]
    fn test_error_log_is_bounded() {
        let state = test_state();
        for i in 0..ERROR_LOG_CAPACITY + 5 {
            state.push_error(format!("error {}", i));
        }
        let log = state.errors.lock().unwrap();
        assert_eq!(log.len(), ERROR_LOG_CAPACITY);
        assert_eq!(log.front().map(String::as_str), Some("error 5"));
        assert_eq!(
            log.back().map(String::as_str),
            Some(&*format!("error {}", ERROR_LOG_CAPACITY + 4))
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = RECONNECT_INITIAL;
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(backoff);
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
        assert_eq!(seen[0], Duration::from_millis(500));
        assert_eq!(seen[1], Duration::from_secs(1));
        assert!(seen.iter().all(|d| *d <= RECONNECT_MAX));
        assert_eq!(*seen.last().unwrap(), RECONNECT_MAX);
    }
}
