//! One client session: connect, authenticate, greet, close.

use std::{sync::Arc, time::Duration};

use salve_core::{CertificateStore, ChannelConfig, Exchange, Identity, SecureChannel};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::error::ClientError;

/// Host the reference client dials.
pub const DEFAULT_HOST: &str = "localhost";

/// Port shared by client and server.
pub const DEFAULT_PORT: u16 = 5000;

/// Name the server certificate must carry.
pub const DEFAULT_SERVER_NAME: &str = "Server";

/// Greeting sent once the channel is established.
pub const DEFAULT_GREETING: &str = "Salve server!";

/// Client session settings.
#[derive(Debug, Clone)]
pub struct ClientSessionConfig {
    /// Server host name or address
    pub host: String,
    /// Server TCP port
    pub port: u16,
    /// Name checked against the server certificate
    pub server_name: String,
    /// Message sent after the handshake
    pub greeting: String,
    /// Bound on opening the TCP connection
    pub connect_timeout: Option<Duration>,
    /// TLS channel settings
    pub channel: ChannelConfig,
}

impl Default for ClientSessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            connect_timeout: None,
            channel: ChannelConfig::default(),
        }
    }
}

impl ClientSessionConfig {
    /// `host:port` as dialled.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Drives one greeting exchange with a server.
#[derive(Debug, Clone)]
pub struct ClientSession {
    identity: Arc<Identity>,
    config: ClientSessionConfig,
}

impl ClientSession {
    /// Session presenting `identity`.
    pub fn new(identity: Arc<Identity>, config: ClientSessionConfig) -> Self {
        Self { identity, config }
    }

    /// Session presenting the identity held by `store`.
    pub fn from_store(store: &CertificateStore, config: ClientSessionConfig) -> Self {
        Self::new(store.identity(), config)
    }

    /// Settings this session runs with.
    pub fn config(&self) -> &ClientSessionConfig {
        &self.config
    }

    /// Connect to the configured server and run the session.
    ///
    /// # Errors
    ///
    /// `Connect`/`ConnectTimeout` if the server cannot be reached, otherwise
    /// whatever [`Self::run_on`] returns.
    pub async fn run(&self) -> Result<Exchange, ClientError> {
        let addr = self.config.address();
        let connect = TcpStream::connect(addr.as_str());

        let stream = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ClientError::ConnectTimeout { addr: addr.clone() })?,
            None => connect.await,
        }
        .map_err(|source| ClientError::Connect { addr: addr.clone(), source })?;

        tracing::info!(%addr, "connected");
        self.run_on(stream).await
    }

    /// Run the session over an already connected transport.
    ///
    /// The channel is closed before returning, on success and on failure.
    ///
    /// # Errors
    ///
    /// `Channel` if the handshake, the trust decision or the exchange fails.
    pub async fn run_on<S>(&self, transport: S) -> Result<Exchange, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut channel =
            SecureChannel::new(transport, Arc::clone(&self.identity), self.config.channel.clone());

        let result = greet(&mut channel, &self.config).await;
        channel.close().await;

        let exchange = result?;
        tracing::info!(
            local = exchange.local_subject.as_str(),
            remote = ?exchange.remote_subject,
            received = exchange.received.as_str(),
            "session complete"
        );
        Ok(exchange)
    }
}

async fn greet<S>(
    channel: &mut SecureChannel<S>,
    config: &ClientSessionConfig,
) -> Result<Exchange, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.open_as_client(&config.server_name).await?;
    Ok(channel.exchange(&config.greeting).await?)
}
