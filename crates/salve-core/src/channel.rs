//! Mutually authenticated TLS channel over a byte stream.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐ open_as_*  ┌─────────────┐  accepted   ┌─────────────┐
//! │ Created │───────────>│ Handshaking │────────────>│ Established │
//! └─────────┘            └─────────────┘             └─────────────┘
//!      │                        │                           │
//!      │ close                  │ error / rejected          │ close
//!      ↓                        ↓                           ↓
//! ┌─────────┐              ┌────────┐                  ┌────────┐
//! │ Closed  │              │ Failed │                  │ Closed │
//! └─────────┘              └────────┘                  └────────┘
//! ```
//!
//! `Failed` is terminal; `close` is accepted in it and releases nothing more.
//! Application data only flows in `Established`, which is reached once the
//! TLS handshake succeeded and the trust policy accepted the peer
//! certificate.
//!
//! # Framing
//!
//! There is no length prefix or delimiter. [`SecureChannel::send`] writes the
//! whole message in one call; [`SecureChannel::receive`] performs one read of
//! at most [`ChannelConfig::receive_buffer_size`] bytes and returns what it
//! got. Messages larger than the buffer are refused by `send`.
//!
//! # End of stream
//!
//! The transport only completes a read with zero bytes at end of stream, so
//! a zero-length read always means the peer shut down and is reported as
//! [`ChannelError::ConnectionClosed`]. A peer that drops the connection
//! without a TLS close_notify is reported the same way. While no data has
//! arrived the read simply stays pending.

use std::{fmt, future::Future, io, sync::Arc, time::Duration};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::{
    certificate::PeerCertificate,
    config::{ChannelConfig, TlsVersion},
    error::{ChannelError, HandshakeFailure},
    identity::Identity,
    tls,
};

/// Secure channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Transport attached, no cryptography yet
    Created,
    /// TLS handshake in progress
    Handshaking,
    /// Peer authenticated and accepted, data may flow
    Established,
    /// Handshake failed; terminal
    Failed,
    /// Channel closed locally
    Closed,
}

/// One completed greeting exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Subject of the local certificate
    pub local_subject: String,
    /// Subject of the peer certificate, if the peer presented one
    pub remote_subject: Option<String>,
    /// Message sent to the peer
    pub sent: String,
    /// Message received from the peer
    pub received: String,
}

enum Transport<S> {
    Raw(S),
    Tls(Box<TlsStream<S>>),
    Released,
}

/// TLS channel bound to one transport connection and the local identity.
pub struct SecureChannel<S> {
    state: ChannelState,
    transport: Transport<S>,
    identity: Arc<Identity>,
    config: ChannelConfig,
    peer: Option<PeerCertificate>,
    version: Option<TlsVersion>,
}

impl<S> fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("state", &self.state)
            .field("local", &self.identity.subject())
            .field("peer", &self.peer.as_ref().map(PeerCertificate::subject))
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Attach a channel to `transport` in the `Created` state.
    pub fn new(transport: S, identity: Arc<Identity>, config: ChannelConfig) -> Self {
        Self {
            state: ChannelState::Created,
            transport: Transport::Raw(transport),
            identity,
            config,
            peer: None,
            version: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Run the handshake as the initiating party.
    ///
    /// Presents the local identity, offers only the configured protocol
    /// version and checks the server certificate against
    /// `expected_server_name` before consulting the trust policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the channel is `Created`. Any other
    /// error leaves the channel `Failed`.
    pub async fn open_as_client(&mut self, expected_server_name: &str) -> Result<(), ChannelError> {
        let raw = self.begin_handshake("open as client")?;
        let limit = self.config.handshake_timeout;

        let result = match self.connector(expected_server_name) {
            Ok((connector, server_name)) => {
                handshake(limit, connector.connect(server_name, raw)).await.map(TlsStream::from)
            },
            Err(e) => Err(e),
        };

        self.complete_handshake(result)
    }

    /// Run the handshake as the accepting party.
    ///
    /// Requests a client certificate, mandatory unless
    /// [`ChannelConfig::require_client_certificate`] is off, and checks it
    /// against the trust policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the channel is `Created`. Any other
    /// error leaves the channel `Failed`.
    pub async fn open_as_server(&mut self) -> Result<(), ChannelError> {
        let raw = self.begin_handshake("open as server")?;
        let limit = self.config.handshake_timeout;

        let result = match tls::server_config(&self.identity, &self.config) {
            Ok(config) => {
                let acceptor = TlsAcceptor::from(Arc::new(config));
                handshake(limit, acceptor.accept(raw)).await.map(TlsStream::from)
            },
            Err(e) => Err(e),
        };

        self.complete_handshake(result)
    }

    /// Send one message in a single write.
    ///
    /// # Errors
    ///
    /// Returns `NotEstablished` outside `Established`, `EmptyMessage` or
    /// `MessageTooLarge` for messages the peer could not receive in one read,
    /// and `Io` if the transport fails.
    pub async fn send(&mut self, message: &str) -> Result<(), ChannelError> {
        let max = self.config.receive_buffer_size;
        let stream = self.stream("send")?;

        if message.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        if message.len() > max {
            return Err(ChannelError::MessageTooLarge { size: message.len(), max });
        }

        stream.write_all(message.as_bytes()).await?;
        stream.flush().await?;

        tracing::info!(text = message, "message sent");
        Ok(())
    }

    /// Wait for the next message.
    ///
    /// Returns everything obtained by one read as one message, decoded as
    /// UTF-8 with invalid sequences replaced.
    ///
    /// # Errors
    ///
    /// Returns `NotEstablished` outside `Established`, `ConnectionClosed` when
    /// the peer shut down, `Timeout` if a receive timeout is configured and
    /// elapses, and `Io` if the transport fails.
    pub async fn receive(&mut self) -> Result<String, ChannelError> {
        let limit = self.config.receive_timeout;
        let mut buffer = vec![0u8; self.config.receive_buffer_size.max(1)];
        let stream = self.stream("receive")?;

        let read = with_timeout(limit, "receive", read_some(stream, &mut buffer)).await?;
        let message = decode(&buffer[..read]);

        tracing::info!(text = message.as_str(), "message received");
        Ok(message)
    }

    /// Send `outgoing`, then wait for one reply.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::send`] or [`Self::receive`].
    pub async fn exchange(&mut self, outgoing: &str) -> Result<Exchange, ChannelError> {
        self.send(outgoing).await?;
        let received = self.receive().await?;

        Ok(Exchange {
            local_subject: self.local_certificate_subject()?.to_string(),
            remote_subject: self.peer.as_ref().map(|p| p.subject().to_string()),
            sent: outgoing.to_string(),
            received,
        })
    }

    /// Close the channel.
    ///
    /// Idempotent and accepted in every state. An established channel sends
    /// close_notify, bounded by [`ChannelConfig::close_timeout`]; the
    /// transport and the peer certificate are dropped in every case.
    pub async fn close(&mut self) {
        let transport = std::mem::replace(&mut self.transport, Transport::Released);
        self.peer = None;

        let previous = self.state;
        if previous != ChannelState::Failed {
            self.state = ChannelState::Closed;
        }

        if let Transport::Tls(mut stream) = transport {
            match tokio::time::timeout(self.config.close_timeout, stream.shutdown()).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => tracing::debug!(error = %e, "shutdown failed"),
                Err(_) => tracing::debug!("shutdown timed out"),
            }
        }

        if previous == ChannelState::Established {
            tracing::debug!("channel closed");
        }
    }

    /// Subject of the local certificate.
    ///
    /// # Errors
    ///
    /// Returns `NotEstablished` outside `Established`.
    pub fn local_certificate_subject(&self) -> Result<&str, ChannelError> {
        self.ensure_established("read the local certificate")?;
        Ok(self.identity.subject())
    }

    /// Subject of the certificate the peer presented.
    ///
    /// # Errors
    ///
    /// Returns `NotEstablished` outside `Established`, or a missing-peer
    /// certificate failure if client certificates were optional and none was
    /// sent.
    pub fn remote_certificate_subject(&self) -> Result<&str, ChannelError> {
        self.peer_certificate().map(PeerCertificate::subject)
    }

    /// Certificate the peer presented.
    ///
    /// # Errors
    ///
    /// Same as [`Self::remote_certificate_subject`].
    pub fn peer_certificate(&self) -> Result<&PeerCertificate, ChannelError> {
        self.ensure_established("read the peer certificate")?;
        self.peer.as_ref().ok_or(ChannelError::Handshake(HandshakeFailure::MissingPeerCertificate))
    }

    /// Protocol version the handshake settled on.
    ///
    /// # Errors
    ///
    /// Returns `NotEstablished` outside `Established`.
    pub fn negotiated_protocol_version(&self) -> Result<TlsVersion, ChannelError> {
        self.ensure_established("read the protocol version")?;
        Ok(self.version.unwrap_or(self.config.protocol_version))
    }

    fn ensure_established(&self, operation: &'static str) -> Result<(), ChannelError> {
        if self.state == ChannelState::Established {
            Ok(())
        } else {
            Err(ChannelError::NotEstablished { state: self.state, operation })
        }
    }

    fn stream(&mut self, operation: &'static str) -> Result<&mut TlsStream<S>, ChannelError> {
        self.ensure_established(operation)?;
        match &mut self.transport {
            Transport::Tls(stream) => Ok(stream.as_mut()),
            _ => Err(ChannelError::NotEstablished { state: self.state, operation }),
        }
    }

    fn begin_handshake(&mut self, operation: &'static str) -> Result<S, ChannelError> {
        if self.state != ChannelState::Created {
            return Err(ChannelError::InvalidState { state: self.state, operation });
        }

        match std::mem::replace(&mut self.transport, Transport::Released) {
            Transport::Raw(raw) => {
                self.state = ChannelState::Handshaking;
                Ok(raw)
            },
            other => {
                self.transport = other;
                Err(ChannelError::InvalidState { state: self.state, operation })
            },
        }
    }

    fn connector(&self, name: &str) -> Result<(TlsConnector, ServerName<'static>), ChannelError> {
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| ChannelError::InvalidServerName(name.to_string()))?;
        let config = tls::client_config(&self.identity, &self.config)?;
        Ok((TlsConnector::from(Arc::new(config)), server_name))
    }

    fn complete_handshake(
        &mut self,
        result: Result<TlsStream<S>, ChannelError>,
    ) -> Result<(), ChannelError> {
        let established = result.and_then(|stream| {
            let (_, session) = stream.get_ref();
            let peer = session
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|der| PeerCertificate::from_der(der.clone()))
                .transpose()
                .map_err(HandshakeFailure::Tls)?;
            let version = session.protocol_version().and_then(TlsVersion::from_negotiated);
            Ok((stream, peer, version))
        });

        match established {
            Ok((stream, peer, version)) => {
                self.transport = Transport::Tls(Box::new(stream));
                self.peer = peer;
                self.version = version;
                self.state = ChannelState::Established;

                tracing::info!(
                    local = self.identity.subject(),
                    remote = ?self.peer.as_ref().map(PeerCertificate::subject),
                    version = ?self.version,
                    "authentication complete"
                );
                Ok(())
            },
            Err(e) => {
                self.state = ChannelState::Failed;
                tracing::debug!(error = %e, "handshake failed");
                Err(e)
            },
        }
    }
}

async fn handshake<F, T>(limit: Option<Duration>, future: F) -> Result<T, ChannelError>
where
    F: Future<Output = io::Result<T>>,
{
    with_timeout(limit, "handshake", async { future.await.map_err(tls::handshake_error) }).await
}

async fn with_timeout<F, T>(
    limit: Option<Duration>,
    operation: &'static str,
    future: F,
) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| ChannelError::Timeout { operation })?,
        None => future.await,
    }
}

async fn read_some<S>(stream: &mut TlsStream<S>, buffer: &mut [u8]) -> Result<usize, ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match stream.read(buffer).await {
        Ok(0) => Err(ChannelError::ConnectionClosed),
        Ok(read) => Ok(read),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            tracing::debug!("peer closed the connection without close_notify");
            Err(ChannelError::ConnectionClosed)
        },
        Err(e) => Err(e.into()),
    }
}

fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "received payload is not valid UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_replaces_invalid_utf8() {
        assert_eq!(decode("Salve server!".as_bytes()), "Salve server!");
        assert_eq!(decode(&[b'o', b'k', 0xff]), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn timeout_is_reported_with_operation() {
        let pending = std::future::pending::<Result<(), ChannelError>>();
        let err = with_timeout(Some(Duration::from_millis(10)), "receive", pending).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { operation: "receive" }));
    }

    #[tokio::test]
    async fn no_limit_awaits_the_future() {
        let ready = async { Ok::<_, ChannelError>(7) };
        assert_eq!(with_timeout(None, "receive", ready).await.unwrap(), 7);
    }
}
