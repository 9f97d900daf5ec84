mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fixture, MockTransport, ALEX_ID};
use rconbridge::bridge::Bridge;
use rconbridge::classify::{Acknowledgement, Outcome, SuccessDetail};
use rconbridge::error::{CommandError, GatewayError, RegistryError};
use rconbridge::rcon::{RconTransport, TransportError};
use tokio_test::assert_ok;

#[tokio::test]
async fn missing_transport_is_protocol_unavailable() {
    let fx = fixture();
    let bridge = Bridge::open_with(fx.config.clone(), None, |_: &str| None)
        .await
        .unwrap();
    assert!(!bridge.gateway().has_transport());
    let err = bridge
        .execute_command(Some("alpha"), "ListPlayers")
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::ProtocolUnavailable);
}

#[tokio::test]
async fn unknown_and_disabled_servers_are_rejected() {
    let fx = fixture();
    let mock = MockTransport::new();
    let bridge = fx.open(mock.clone()).await;

    assert_eq!(
        bridge.execute_command(Some("gamma"), "ListPlayers").await.unwrap_err(),
        GatewayError::Disabled("gamma".into())
    );
    assert_eq!(
        bridge.execute_command(Some("nope"), "ListPlayers").await.unwrap_err(),
        GatewayError::Disabled("nope".into())
    );
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn default_server_is_used_when_none_given() {
    let fx = fixture();
    let mock = MockTransport::new();
    mock.reply(Some("alpha"), "ListPlayers", "No Players Connected");
    let bridge = fx.open(mock.clone()).await;

    let report = assert_ok!(bridge.execute_command(None, "ListPlayers").await);
    assert_eq!(report.server_id, "alpha");
    assert_eq!(report.outcome, Outcome::Success(SuccessDetail::Roster { online: 0 }));
}

#[tokio::test]
async fn transport_errors_map_to_gateway_errors() {
    let fx = fixture();
    let mock = MockTransport::new();
    mock.fail(Some("alpha"), "refuse", TransportError::Io("connection refused".into()));
    mock.fail(Some("alpha"), "auth", TransportError::AuthRejected);
    mock.fail(Some("alpha"), "sock", TransportError::Timeout);
    let bridge = fx.open(mock).await;

    assert!(matches!(
        bridge.execute_command(Some("alpha"), "refuse").await,
        Err(GatewayError::ConnectionFailed(_))
    ));
    assert!(matches!(
        bridge.execute_command(Some("alpha"), "auth").await,
        Err(GatewayError::ConnectionFailed(_))
    ));
    assert!(matches!(
        bridge.execute_command(Some("alpha"), "sock").await,
        Err(GatewayError::TimedOut(_))
    ));
}

#[tokio::test]
async fn hung_server_times_out_without_blocking_others() {
    let fx = fixture();
    let mock = MockTransport::new();
    mock.slow(Some("alpha"), "hang", Duration::from_millis(1500), "late");
    mock.reply(Some("beta"), "version", "v1.0");
    let bridge = Arc::new(fx.open(mock).await);

    let hung = {
        let b = bridge.clone();
        tokio::spawn(async move { b.execute_command(Some("alpha"), "hang").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let report = assert_ok!(bridge.execute_command(Some("beta"), "version").await);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(report.outcome.is_success());

    // connection_timeout = 1s plus 50ms grace
    let err = hung.await.unwrap().unwrap_err();
    assert_eq!(err, GatewayError::TimedOut(Duration::from_millis(1050)));
}

#[tokio::test]
async fn environment_overrides_reach_the_transport_but_are_not_saved() {
    let fx = fixture();
    let mock = MockTransport::new();
    let transport: Arc<dyn RconTransport> = mock.clone();
    let bridge = Bridge::open_with(fx.config.clone(), Some(transport), |key: &str| match key {
        "RCON_PASSWORD_ALPHA" => Some("from-env".to_string()),
        "RCON_PORT_ALPHA" => Some("28000".to_string()),
        _ => None,
    })
    .await
    .unwrap();

    assert_ok!(bridge.execute_command(Some("alpha"), "version").await);
    let endpoint = mock.last_endpoint().unwrap();
    assert_eq!(endpoint.password, "from-env");
    assert_eq!(endpoint.port, 28000);
    assert_eq!(endpoint.host, "10.0.0.1");

    assert_ok!(bridge.persist().await);
    let saved = fx.read("servers.json");
    assert_eq!(saved["alpha"]["password"], "a");
    assert_eq!(saved["alpha"]["port"], 27020);
}

#[tokio::test]
async fn set_default_server_persists_flags() {
    let fx = fixture();
    let mock = MockTransport::new();
    let bridge = fx.open(mock.clone()).await;

    assert_ok!(bridge.set_default_server("beta").await);
    assert_eq!(bridge.default_server().await.as_deref(), Some("beta"));
    let saved = fx.read("servers.json");
    assert_eq!(saved["beta"]["default"], true);
    assert_eq!(saved["alpha"]["default"], false);
    assert!(saved.get("_comment").is_none());

    assert_eq!(
        bridge.set_default_server("gamma").await.unwrap_err(),
        RegistryError::DisabledServer("gamma".into())
    );
    assert_eq!(
        bridge.set_default_server("delta").await.unwrap_err(),
        RegistryError::UnknownServer("delta".into())
    );

    assert_ok!(bridge.claim("Alex", 1).await);
    assert_eq!(mock.calls()[0].0, "beta");
}

#[tokio::test]
async fn list_servers_marks_default_and_disabled() {
    let fx = fixture();
    let bridge = fx.open(MockTransport::new()).await;
    let servers = bridge.list_servers().await;
    let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
    assert!(servers[0].is_default);
    assert!(!servers[2].enabled);
    assert_eq!(servers[2].connection_timeout, 10);
}

#[tokio::test]
async fn test_connectivity_runs_roster_command() {
    let fx = fixture();
    let mock = MockTransport::new();
    mock.reply(Some("beta"), "ListPlayers", "0. Alex, 13dbca05ba8166e2e60c50fe271f2417");
    let bridge = fx.open(mock.clone()).await;

    let report = assert_ok!(bridge.test_connectivity("beta").await);
    assert_eq!(report.outcome, Outcome::Success(SuccessDetail::Roster { online: 1 }));
    assert_eq!(mock.calls(), vec![("beta".to_string(), "ListPlayers".to_string())]);
}

#[tokio::test]
async fn broadcast_sanitises_text() {
    let fx = fixture();
    let mock = MockTransport::new();
    let bridge = fx.open(mock.clone()).await;

    let report = assert_ok!(bridge.broadcast("restart in \"5\"\nminutes").await);
    assert_eq!(report.command, "ServerChat \"restart in '5' minutes\"");
    assert_eq!(
        report.outcome,
        Outcome::Success(SuccessDetail::Acknowledged {
            intent: Acknowledgement::Chat,
            text: String::new()
        })
    );
    assert_eq!(
        bridge.broadcast("   ").await.unwrap_err(),
        CommandError::EmptyMessage
    );
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn give_item_targets_identity_with_normalised_blueprint() {
    let fx = fixture();
    let mock = MockTransport::new();
    let bridge = fx.open(mock.clone()).await;

    let report = assert_ok!(
        bridge
            .give_item("Alex", "PrimalEarth/Items/PrimalItem_Pick.PrimalItem_Pick", 2, 10, true)
            .await
    );
    assert_eq!(
        report.command,
        format!(
            "GiveItemToEOSID {} \"Blueprint'/Game/PrimalEarth/Items/PrimalItem_Pick.PrimalItem_Pick'\" 2 10 1 0 0 0 0 0",
            ALEX_ID
        )
    );
    assert_eq!(
        bridge.give_item("Broken", "x", 1, 0, false).await.unwrap_err(),
        CommandError::InvalidIdentity("Broken".into())
    );
    assert_eq!(
        bridge.give_item("Ghost", "x", 1, 0, false).await.unwrap_err(),
        CommandError::UnknownPlayer("Ghost".into())
    );
    assert_eq!(mock.call_count(), 1);
}
