//! Listener loop and per-connection sessions.

use std::{future::Future, net::SocketAddr, pin::Pin, sync::Arc, time::Duration};

use salve_core::{ChannelConfig, ChannelError, Exchange, Identity, SecureChannel};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};

use crate::error::ServerError;

/// Address the reference server listens on.
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Port shared by client and server.
pub const DEFAULT_PORT: u16 = 5000;

/// Greeting sent to every client once the channel is established.
pub const DEFAULT_GREETING: &str = "Buongiorno client!";

/// Pause after a failed accept before the listener is polled again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServeMode {
    /// One connection at a time; the next accept waits for the session to end
    #[default]
    Sequential,
    /// Each connection runs on its own task
    Concurrent,
}

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerSessionConfig {
    /// Listen address
    pub bind: String,
    /// Listen port; 0 picks a free one
    pub port: u16,
    /// Message sent to each client after the handshake
    pub greeting: String,
    /// Connection scheduling
    pub mode: ServeMode,
    /// TLS channel settings applied to every connection
    pub channel: ChannelConfig,
}

impl Default for ServerSessionConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            greeting: DEFAULT_GREETING.to_string(),
            mode: ServeMode::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl ServerSessionConfig {
    /// `bind:port` as passed to the listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Read-only state every session shares.
#[derive(Debug)]
struct Shared {
    identity: Arc<Identity>,
    config: ServerSessionConfig,
}

/// Bound listener plus the identity presented to every client.
#[derive(Debug)]
pub struct ServerSession {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl ServerSession {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns `Bind` if the address is invalid or in use.
    pub async fn bind(
        identity: Arc<Identity>,
        config: ServerSessionConfig,
    ) -> Result<Self, ServerError> {
        let addr = config.address();
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;

        tracing::info!(
            addr = %listener.local_addr()?,
            subject = identity.subject(),
            mode = ?config.mode,
            "listening"
        );

        Ok(Self { listener, shared: Arc::new(Shared { identity, config }) })
    }

    /// Address actually bound, useful when the configured port was 0.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the socket cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Settings this server runs with.
    pub fn config(&self) -> &ServerSessionConfig {
        &self.shared.config
    }

    /// Accept exactly one connection and run its session.
    ///
    /// # Errors
    ///
    /// `Accept` if no connection could be accepted, `Session` if the
    /// handshake, the trust decision or the exchange failed.
    pub async fn accept_one(&self) -> Result<Exchange, ServerError> {
        let (stream, peer) = self.listener.accept().await.map_err(ServerError::Accept)?;
        Ok(serve_connection(&self.shared, stream, peer).await?)
    }

    /// Serve connections until `shutdown` completes.
    ///
    /// Session failures and accept errors are logged and never end the loop.
    /// In-flight sessions are cut short when the shutdown signal arrives.
    pub async fn serve_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    if back_off(shutdown.as_mut()).await {
                        break;
                    }
                    continue;
                },
            };

            match self.shared.config.mode {
                ServeMode::Sequential => {
                    tokio::select! {
                        () = &mut shutdown => break,
                        _ = isolated(&self.shared, stream, peer) => {},
                    }
                },
                ServeMode::Concurrent => {
                    let shared = Arc::clone(&self.shared);
                    sessions.spawn(async move { isolated(&shared, stream, peer).await });
                    while sessions.try_join_next().is_some() {}
                },
            }
        }

        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "aborting in-flight sessions");
        }
        sessions.shutdown().await;
        tracing::info!("server stopped");
    }
}

/// Wait out [`ACCEPT_BACKOFF`]; returns true if `shutdown` completed first.
async fn back_off<F>(shutdown: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        () = shutdown => true,
        () = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

/// Error boundary around one session.
async fn isolated(shared: &Shared, stream: TcpStream, peer: SocketAddr) -> Option<Exchange> {
    match serve_connection(shared, stream, peer).await {
        Ok(exchange) => Some(exchange),
        Err(e) => {
            tracing::error!(%peer, error = %e, "session failed");
            None
        },
    }
}

async fn serve_connection(
    shared: &Shared,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<Exchange, ChannelError> {
    tracing::info!(%peer, "client connected");

    let mut channel =
        SecureChannel::new(stream, Arc::clone(&shared.identity), shared.config.channel.clone());
    let result = async {
        channel.open_as_server().await?;
        channel.exchange(&shared.config.greeting).await
    }
    .await;
    channel.close().await;

    let exchange = result?;
    tracing::info!(
        %peer,
        remote = ?exchange.remote_subject,
        received = exchange.received.as_str(),
        "session complete"
    );
    Ok(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = ServerSessionConfig::default();
        assert_eq!(config.address(), "0.0.0.0:5000");
        assert_eq!(config.greeting, "Buongiorno client!");
        assert_eq!(config.mode, ServeMode::Sequential);
        assert!(config.channel.require_client_certificate);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_retry_waits_for_backoff() {
        let shutdown = std::future::pending::<()>();
        tokio::pin!(shutdown);

        let started = tokio::time::Instant::now();
        assert!(!back_off(shutdown.as_mut()).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cuts_accept_backoff_short() {
        let shutdown = std::future::ready(());
        tokio::pin!(shutdown);

        let started = tokio::time::Instant::now();
        assert!(back_off(shutdown.as_mut()).await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }
}
