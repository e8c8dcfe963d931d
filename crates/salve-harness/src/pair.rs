//! Two channels joined by an in-memory duplex pipe.

use std::sync::Arc;

use salve_core::{ChannelConfig, ChannelError, Identity, SecureChannel};
use tokio::io::DuplexStream;

use crate::{BoxError, CLIENT_NAME, SERVER_NAME, TestIdentity, permissive_config};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Client and server channel over one duplex pipe, both still `Created`.
#[derive(Debug)]
pub struct ChannelPair {
    /// Initiating side
    pub client: SecureChannel<DuplexStream>,
    /// Accepting side
    pub server: SecureChannel<DuplexStream>,
}

impl ChannelPair {
    /// Join two identities with their own configurations.
    pub fn new(
        client: Arc<Identity>,
        client_config: ChannelConfig,
        server: Arc<Identity>,
        server_config: ChannelConfig,
    ) -> Self {
        let (client_io, server_io) = tokio::io::duplex(PIPE_CAPACITY);
        Self {
            client: SecureChannel::new(client_io, client, client_config),
            server: SecureChannel::new(server_io, server, server_config),
        }
    }

    /// Fresh self-signed `Utente`/`Server` identities, both sides permissive.
    pub fn self_signed() -> Result<Self, BoxError> {
        let client = TestIdentity::client(CLIENT_NAME)?.identity()?;
        let server = TestIdentity::server(SERVER_NAME)?.identity()?;
        Ok(Self::new(client, permissive_config(), server, permissive_config()))
    }

    /// Drive both handshakes concurrently.
    ///
    /// Returns the client result first, then the server result.
    pub async fn handshake(
        &mut self,
        server_name: &str,
    ) -> (Result<(), ChannelError>, Result<(), ChannelError>) {
        tokio::join!(self.client.open_as_client(server_name), self.server.open_as_server())
    }
}
