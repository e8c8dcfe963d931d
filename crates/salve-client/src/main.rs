//! `salve-client`: greet a Salve server over mutually authenticated TLS.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use salve_client::{ClientError, ClientSession, ClientSessionConfig, session};
use salve_core::{CertificateStore, ChannelConfig, TlsVersion, TrustPolicy, load_trust_anchors};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "salve-client", version, about = "Mutually authenticated TLS greeting client")]
struct Cli {
    /// Server host name or address
    #[arg(long, default_value = session::DEFAULT_HOST)]
    host: String,

    /// Server TCP port
    #[arg(long, default_value_t = session::DEFAULT_PORT)]
    port: u16,

    /// Name the server certificate must carry
    #[arg(long, default_value = session::DEFAULT_SERVER_NAME)]
    server_name: String,

    /// PEM bundle with the client certificate and private key
    #[arg(long, default_value = "self-utente.pem")]
    identity: PathBuf,

    /// Passphrase for an encrypted private key
    #[arg(long)]
    passphrase: Option<String>,

    /// Message sent once the channel is established
    #[arg(long, default_value = session::DEFAULT_GREETING)]
    greeting: String,

    /// TLS version to pin (1.2 or 1.3)
    #[arg(long, default_value_t = TlsVersion::Tls12)]
    tls: TlsVersion,

    /// Accept server certificates from untrusted issuers (self-signed)
    #[arg(long)]
    trust_self_signed: bool,

    /// PEM file with CA certificates the server chain may end in
    #[arg(long)]
    trust_anchors: Option<PathBuf>,

    /// Seconds allowed for the TCP connect and the TLS handshake each
    #[arg(long)]
    timeout_secs: Option<u64>,
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
            tracing::error!(error = %e, "client error");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let store = CertificateStore::load(&cli.identity, cli.passphrase.as_deref())?;
    let trust_anchors = match &cli.trust_anchors {
        Some(path) => load_trust_anchors(path)?,
        None => Vec::new(),
    };
    let timeout = cli.timeout_secs.map(Duration::from_secs);

    let config = ClientSessionConfig {
        host: cli.host,
        port: cli.port,
        server_name: cli.server_name,
        greeting: cli.greeting,
        connect_timeout: timeout,
        channel: ChannelConfig {
            protocol_version: cli.tls,
            trust: if cli.trust_self_signed {
                TrustPolicy::trust_self_signed()
            } else {
                TrustPolicy::strict()
            },
            trust_anchors,
            handshake_timeout: timeout,
            receive_timeout: timeout,
            ..ChannelConfig::default()
        },
    };

    ClientSession::from_store(&store, config).run().await.map(|_| ())
}
