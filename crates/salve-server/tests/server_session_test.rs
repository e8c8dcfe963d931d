//! Server listener loop over real TCP sockets.
//!
//! - End-to-end greeting exchange with the client role driver
//! - Failure isolation: broken connections do not stop the listener
//! - Concurrent mode and shutdown

use std::{net::SocketAddr, sync::Arc, time::Duration};

use salve_client::{ClientSession, ClientSessionConfig};
use salve_core::{CertificateStore, ChannelError, HandshakeFailure, Identity};
use salve_harness::{IdentityFiles, handshake_without_certificate, permissive_config};
use salve_server::{ServeMode, ServerError, ServerSession, ServerSessionConfig};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
};

struct Fixture {
    server: Arc<Identity>,
    client: Arc<Identity>,
    _files: IdentityFiles,
}

fn fixture() -> Fixture {
    let files = IdentityFiles::generate().unwrap();
    let server = CertificateStore::load(&files.server, None).unwrap().identity();
    let client = CertificateStore::load(&files.client, None).unwrap().identity();
    Fixture { server, client, _files: files }
}

async fn bind(identity: Arc<Identity>, mode: ServeMode) -> ServerSession {
    let config = ServerSessionConfig {
        bind: "127.0.0.1".into(),
        port: 0,
        mode,
        channel: permissive_config(),
        ..ServerSessionConfig::default()
    };
    ServerSession::bind(identity, config).await.unwrap()
}

fn client(identity: &Arc<Identity>, addr: SocketAddr) -> ClientSession {
    let config = ClientSessionConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        channel: permissive_config(),
        ..ClientSessionConfig::default()
    };
    ClientSession::new(Arc::clone(identity), config)
}

#[tokio::test]
async fn accept_one_reports_the_exchange() {
    salve_harness::init_tracing();
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = server.local_addr().unwrap();

    let client = client(&fx.client, addr);
    let (served, greeted) = tokio::join!(server.accept_one(), client.run());

    let served = served.unwrap();
    assert_eq!(served.local_subject, "CN=Server");
    assert_eq!(served.remote_subject.as_deref(), Some("CN=Utente"));
    assert_eq!(served.sent, "Buongiorno client!");
    assert_eq!(served.received, "Salve server!");

    let greeted = greeted.unwrap();
    assert_eq!(greeted.sent, "Salve server!");
    assert_eq!(greeted.received, "Buongiorno client!");
}

#[tokio::test]
async fn accept_one_surfaces_missing_client_certificate() {
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = server.local_addr().unwrap();

    let anonymous = async {
        let stream = TcpStream::connect(addr).await.unwrap();
        handshake_without_certificate(stream).await
    };
    let (served, _) = tokio::join!(server.accept_one(), anonymous);

    assert!(matches!(
        served,
        Err(ServerError::Session(ChannelError::Handshake(HandshakeFailure::MissingPeerCertificate)))
    ));
}

#[tokio::test]
async fn malformed_connection_does_not_stop_the_listener() {
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve_until(async move {
                let _ = stopped.await;
            })
            .await;
    });

    // Plain text instead of a ClientHello
    let mut garbage = TcpStream::connect(addr).await.unwrap();
    garbage.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let mut sink = Vec::new();
    let _ = garbage.read_to_end(&mut sink).await;

    // A client without a certificate
    let stream = TcpStream::connect(addr).await.unwrap();
    let _ = handshake_without_certificate(stream).await;

    let exchange = client(&fx.client, addr).run().await.unwrap();
    assert_eq!(exchange.received, "Buongiorno client!");

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
}

#[tokio::test]
async fn successive_sessions_are_independent() {
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve_until(async move {
                let _ = stopped.await;
            })
            .await;
    });

    for _ in 0..3 {
        let exchange = client(&fx.client, addr).run().await.unwrap();
        assert_eq!(exchange.remote_subject.as_deref(), Some("CN=Server"));
    }

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_mode_serves_clients_in_parallel() {
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Concurrent).await;
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve_until(async move {
                let _ = stopped.await;
            })
            .await;
    });

    // Holds its connection open without ever starting a handshake
    let _idle = TcpStream::connect(addr).await.unwrap();

    let first = client(&fx.client, addr);
    let second = client(&fx.client, addr);
    let (a, b) = tokio::join!(first.run(), second.run());
    assert_eq!(a.unwrap().received, "Buongiorno client!");
    assert_eq!(b.unwrap().received, "Buongiorno client!");

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_interrupts_a_stalled_session() {
    let fx = fixture();
    let server = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve_until(async move {
                let _ = stopped.await;
            })
            .await;
    });

    let _idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
}

#[tokio::test]
async fn bind_reports_address_in_use() {
    let fx = fixture();
    let first = bind(Arc::clone(&fx.server), ServeMode::Sequential).await;
    let addr = first.local_addr().unwrap();

    let config = ServerSessionConfig {
        bind: addr.ip().to_string(),
        port: addr.port(),
        ..ServerSessionConfig::default()
    };
    let err = ServerSession::bind(Arc::clone(&fx.server), config).await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { .. }));
}
