//! Peer certificate validation through real handshakes.
//!
//! Each test builds one misbehaving certificate and checks which
//! [`ValidationOutcome`] the rejecting side reports.

use std::sync::Arc;

use salve_core::{
    ChannelConfig, ChannelError, ChannelState, Identity, TrustPolicy, ValidationOutcome,
};
use salve_harness::{
    CLIENT_NAME, ChannelPair, IdentityBuilder, Role, SERVER_NAME, TestCa, TestIdentity,
    permissive_config,
};

fn client() -> Arc<Identity> {
    TestIdentity::client(CLIENT_NAME).unwrap().identity().unwrap()
}

fn server() -> Arc<Identity> {
    TestIdentity::server(SERVER_NAME).unwrap().identity().unwrap()
}

fn rejected_with(err: ChannelError) -> ValidationOutcome {
    match err {
        ChannelError::CertificateRejected { outcome } => outcome,
        other => panic!("expected a certificate rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn strict_policy_rejects_self_signed_server() {
    let mut pair = ChannelPair::new(client(), ChannelConfig::default(), server(), permissive_config());

    let (client, _server) = pair.handshake(SERVER_NAME).await;

    assert_eq!(rejected_with(client.unwrap_err()), ValidationOutcome::ChainError);
    assert_eq!(pair.client.state(), ChannelState::Failed);
}

#[tokio::test]
async fn strict_policy_rejects_self_signed_client() {
    let mut pair = ChannelPair::new(client(), permissive_config(), server(), ChannelConfig::default());

    let (client, server) = pair.handshake(SERVER_NAME).await;

    assert_eq!(rejected_with(server.unwrap_err()), ValidationOutcome::ChainError);
    assert!(client.unwrap_err().is_handshake_failure());
    assert_eq!(pair.server.state(), ChannelState::Failed);
}

#[tokio::test]
async fn expired_server_certificate_is_rejected_even_when_self_signed_is_trusted() {
    let expired = IdentityBuilder::new(SERVER_NAME, Role::Server)
        .expired()
        .self_signed()
        .unwrap()
        .identity()
        .unwrap();
    let mut pair = ChannelPair::new(client(), permissive_config(), expired, permissive_config());

    let (client, _server) = pair.handshake(SERVER_NAME).await;

    assert_eq!(rejected_with(client.unwrap_err()), ValidationOutcome::Expired);
}

#[tokio::test]
async fn expired_client_certificate_is_rejected() {
    let expired = IdentityBuilder::new(CLIENT_NAME, Role::Client)
        .expired()
        .self_signed()
        .unwrap()
        .identity()
        .unwrap();
    let mut pair = ChannelPair::new(expired, permissive_config(), server(), permissive_config());

    let (_client, server) = pair.handshake(SERVER_NAME).await;

    assert_eq!(rejected_with(server.unwrap_err()), ValidationOutcome::Expired);
}

#[tokio::test]
async fn wrong_server_name_is_a_name_mismatch() {
    let mut pair = ChannelPair::self_signed().unwrap();

    let (client, _server) = pair.handshake("other.example").await;

    assert_eq!(
        rejected_with(client.unwrap_err()),
        ValidationOutcome::NameMismatch { expected: "other.example".into() }
    );
}

#[tokio::test]
async fn server_name_falls_back_to_common_name() {
    let no_san = IdentityBuilder::new(SERVER_NAME, Role::Server)
        .subject_alt_names(&[])
        .self_signed()
        .unwrap()
        .identity()
        .unwrap();
    let mut pair = ChannelPair::new(client(), permissive_config(), no_san, permissive_config());

    let (client, server) = pair.handshake("server").await;
    client.unwrap();
    server.unwrap();
}

#[tokio::test]
async fn server_checks_expected_client_name() {
    let expecting = |name: &str| ChannelConfig {
        expected_peer_name: Some(name.to_string()),
        ..permissive_config()
    };

    let mut pair = ChannelPair::new(client(), permissive_config(), server(), expecting(CLIENT_NAME));
    let (client_result, server_result) = pair.handshake(SERVER_NAME).await;
    client_result.unwrap();
    server_result.unwrap();

    let mut pair = ChannelPair::new(client(), permissive_config(), server(), expecting("Altro"));
    let (_client, server_result) = pair.handshake(SERVER_NAME).await;
    assert_eq!(
        rejected_with(server_result.unwrap_err()),
        ValidationOutcome::NameMismatch { expected: "Altro".into() }
    );
}

#[tokio::test]
async fn chain_to_configured_anchor_is_valid_under_strict_policy() {
    let ca = TestCa::new().unwrap();
    let server = IdentityBuilder::new("localhost", Role::Server)
        .signed_by(&ca)
        .unwrap()
        .identity()
        .unwrap();
    let client = IdentityBuilder::new(CLIENT_NAME, Role::Client)
        .signed_by(&ca)
        .unwrap()
        .identity()
        .unwrap();
    let config = ChannelConfig {
        trust: TrustPolicy::strict(),
        trust_anchors: vec![ca.anchor()],
        ..ChannelConfig::default()
    };

    let mut pair = ChannelPair::new(client, config.clone(), server, config);
    let (client_result, server_result) = pair.handshake("localhost").await;
    client_result.unwrap();
    server_result.unwrap();

    assert_eq!(pair.client.remote_certificate_subject().unwrap(), "CN=localhost");
    assert_eq!(pair.server.remote_certificate_subject().unwrap(), "CN=Utente");
}

/// Client configured with `ca` as its only anchor, server issued by `issuer`.
async fn client_verdict_for_foreign_issuer(
    ca: &TestCa,
    issuer: &TestCa,
    trust: TrustPolicy,
) -> Result<(), ChannelError> {
    let server = IdentityBuilder::new("localhost", Role::Server)
        .signed_by(issuer)
        .unwrap()
        .identity()
        .unwrap();
    let config = ChannelConfig { trust, trust_anchors: vec![ca.anchor()], ..ChannelConfig::default() };

    let mut pair = ChannelPair::new(client(), config, server, permissive_config());
    let (client_result, _server) = pair.handshake("localhost").await;
    client_result
}

#[tokio::test]
async fn anchor_from_another_ca_is_a_chain_error() {
    let ca = TestCa::new().unwrap();
    let other = TestCa::new().unwrap();

    let err = client_verdict_for_foreign_issuer(&ca, &other, TrustPolicy::strict()).await.unwrap_err();
    assert_eq!(rejected_with(err), ValidationOutcome::ChainError);
}

#[tokio::test]
async fn issuer_sharing_the_anchor_name_is_a_chain_error() {
    let ca = TestCa::named("Salve CA").unwrap();
    let impostor = TestCa::named("Salve CA").unwrap();

    let err =
        client_verdict_for_foreign_issuer(&ca, &impostor, TrustPolicy::strict()).await.unwrap_err();
    assert_eq!(rejected_with(err), ValidationOutcome::ChainError);
}

#[tokio::test]
async fn self_signed_trust_accepts_foreign_issuer_with_anchors_configured() {
    let ca = TestCa::new().unwrap();
    let other = TestCa::new().unwrap();
    client_verdict_for_foreign_issuer(&ca, &other, TrustPolicy::trust_self_signed()).await.unwrap();

    let impostor = TestCa::named("Salve CA").unwrap();
    let ca = TestCa::named("Salve CA").unwrap();
    client_verdict_for_foreign_issuer(&ca, &impostor, TrustPolicy::trust_self_signed())
        .await
        .unwrap();
}

#[tokio::test]
async fn strict_server_rejects_client_from_same_named_issuer() {
    let ca = TestCa::named("Salve CA").unwrap();
    let impostor = TestCa::named("Salve CA").unwrap();
    let server = IdentityBuilder::new("localhost", Role::Server)
        .signed_by(&ca)
        .unwrap()
        .identity()
        .unwrap();
    let client = IdentityBuilder::new(CLIENT_NAME, Role::Client)
        .signed_by(&impostor)
        .unwrap()
        .identity()
        .unwrap();
    let config = ChannelConfig { trust_anchors: vec![ca.anchor()], ..ChannelConfig::default() };

    let mut pair = ChannelPair::new(client, config.clone(), server, config);
    let (_client, server_result) = pair.handshake("localhost").await;

    assert_eq!(rejected_with(server_result.unwrap_err()), ValidationOutcome::ChainError);
}
