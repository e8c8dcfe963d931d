//! `salve-server`: accept mutually authenticated TLS sessions until Ctrl-C.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Parser, ValueEnum};
use salve_core::{
    CertificateStore, ChannelConfig, IdentityError, TlsVersion, TrustPolicy, load_trust_anchors,
};
use salve_server::{ServeMode, ServerError, ServerSession, ServerSessionConfig, session};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One client at a time
    Sequential,
    /// One task per client
    Concurrent,
}

impl From<Mode> for ServeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Sequential => Self::Sequential,
            Mode::Concurrent => Self::Concurrent,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "salve-server", version, about = "Mutually authenticated TLS greeting server")]
struct Cli {
    /// Listen address
    #[arg(long, default_value = session::DEFAULT_BIND)]
    bind: String,

    /// Listen port
    #[arg(long, default_value_t = session::DEFAULT_PORT)]
    port: u16,

    /// PEM bundle with the server certificate and private key
    #[arg(long, default_value = "self-server.pem")]
    identity: PathBuf,

    /// Passphrase for an encrypted private key
    #[arg(long)]
    passphrase: Option<String>,

    /// Message sent to every client
    #[arg(long, default_value = session::DEFAULT_GREETING)]
    greeting: String,

    /// TLS version to pin (1.2 or 1.3)
    #[arg(long, default_value_t = TlsVersion::Tls12)]
    tls: TlsVersion,

    /// Accept client certificates from untrusted issuers (self-signed)
    #[arg(long)]
    trust_self_signed: bool,

    /// PEM file with CA certificates client chains may end in
    #[arg(long)]
    trust_anchors: Option<PathBuf>,

    /// Name every client certificate must carry
    #[arg(long)]
    client_name: Option<String>,

    /// Connection scheduling
    #[arg(long, value_enum, default_value_t = Mode::Sequential)]
    mode: Mode,

    /// Seconds allowed for each handshake and each receive
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let store = CertificateStore::load(&cli.identity, cli.passphrase.as_deref())?;
    let trust_anchors = match &cli.trust_anchors {
        Some(path) => load_trust_anchors(path)?,
        None => Vec::new(),
    };
    let timeout = cli.timeout_secs.map(Duration::from_secs);

    let config = ServerSessionConfig {
        bind: cli.bind,
        port: cli.port,
        greeting: cli.greeting,
        mode: cli.mode.into(),
        channel: ChannelConfig {
            protocol_version: cli.tls,
            trust: if cli.trust_self_signed {
                TrustPolicy::trust_self_signed()
            } else {
                TrustPolicy::strict()
            },
            trust_anchors,
            expected_peer_name: cli.client_name,
            handshake_timeout: timeout,
            receive_timeout: timeout,
            ..ChannelConfig::default()
        },
    };

    let server = ServerSession::bind(store.identity(), config).await?;
    tracing::info!("press Ctrl-C to stop");
    server.serve_until(ctrl_c()).await;
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
