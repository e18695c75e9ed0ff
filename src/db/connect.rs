//! Connection opening
//!
//! The gateway opens one short-lived connection per autonomous call and one
//! dedicated connection per transaction scope or notification hub. TLS is
//! negotiated per the profile's [`SslMode`] using rustls with OS trust roots
//! (Mozilla roots as fallback).

use crate::config::ConnectionConfig;
use crate::config::connections::SslMode;
use crate::error::{GatewayError, GatewayResult};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, CancelToken, Client, Connection};

/// A live client plus the pieces needed to cancel its in-flight work.
pub(crate) struct OpenClient {
    pub(crate) client: Client,
    cancel: CancelToken,
    ssl_mode: SslMode,
}

impl OpenClient {
    /// Open a connection and drive it on a background task.
    pub(crate) async fn open(config: &ConnectionConfig) -> GatewayResult<Self> {
        let conn_string = config.connection_string_with_password();

        let client = match config.ssl_mode {
            SslMode::Disable => {
                let (client, connection) =
                    tokio_postgres::connect(&conn_string, tokio_postgres::NoTls)
                        .await
                        .map_err(|e| GatewayError::Connection(e.to_string()))?;
                spawn_driver(connection);
                client
            }
            SslMode::Prefer | SslMode::Require => {
                let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                let (client, connection) = tokio_postgres::connect(&conn_string, tls)
                    .await
                    .map_err(|e| GatewayError::Connection(e.to_string()))?;
                spawn_driver(connection);
                client
            }
        };

        let cancel = client.cancel_token();
        let ssl_mode = config.ssl_mode;

        Ok(Self {
            client,
            cancel,
            ssl_mode,
        })
    }

    /// Send a best-effort backend cancel request for whatever this client is
    /// currently executing. Fire-and-forget: the caller has already decided
    /// the operation is over.
    pub(crate) fn spawn_cancel(&self) {
        let cancel = self.cancel.clone();
        let ssl_mode = self.ssl_mode;
        tokio::spawn(async move {
            let result = match ssl_mode {
                SslMode::Disable => cancel.cancel_query(tokio_postgres::NoTls).await,
                SslMode::Prefer | SslMode::Require => {
                    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                    cancel.cancel_query(tls).await
                }
            };
            if let Err(e) = result {
                tracing::debug!("backend cancel request failed: {}", e);
            }
        });
    }
}

/// Open a connection whose asynchronous messages (LISTEN notifications) are
/// relayed to the returned receiver instead of being discarded.
///
/// The receiver closes when the connection dies, which is the notification
/// hub's signal to reconnect.
pub(crate) async fn open_with_messages(
    config: &ConnectionConfig,
) -> GatewayResult<(Client, mpsc::UnboundedReceiver<tokio_postgres::Notification>)> {
    let conn_string = config.connection_string_with_password();
    let (tx, rx) = mpsc::unbounded_channel();

    let client = match config.ssl_mode {
        SslMode::Disable => {
            let (client, connection) =
                tokio_postgres::connect(&conn_string, tokio_postgres::NoTls)
                    .await
                    .map_err(|e| GatewayError::Connection(e.to_string()))?;
            spawn_message_relay(connection, tx);
            client
        }
        SslMode::Prefer | SslMode::Require => {
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
            let (client, connection) = tokio_postgres::connect(&conn_string, tls)
                .await
                .map_err(|e| GatewayError::Connection(e.to_string()))?;
            spawn_message_relay(connection, tx);
            client
        }
    };

    Ok((client, rx))
}

/// Drive a connection to completion, logging (not surfacing) the final error.
fn spawn_driver<S, T>(connection: Connection<S, T>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("connection closed with error: {}", e);
        }
    });
}

/// Drive a connection while forwarding notification messages.
fn spawn_message_relay<S, T>(
    mut connection: Connection<S, T>,
    tx: mpsc::UnboundedSender<tokio_postgres::Notification>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut stream = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = stream.next().await {
            match message {
                Ok(AsyncMessage::Notification(n)) => {
                    if tx.send(n).is_err() {
                        break;
                    }
                }
                // Notices and parameter-status changes are uninteresting here
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("notification connection lost: {}", e);
                    break;
                }
            }
        }
    });
}

/// Build a rustls ClientConfig that trusts OS certificates (with Mozilla roots as fallback)
fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let mut loaded = 0;
    for cert in native_certs.certs {
        if root_store.add(cert).is_ok() {
            loaded += 1;
        }
    }
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
