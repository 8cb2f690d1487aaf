//! Integration tests for the builder and the assembled service.

use std::time::Duration;

use gatehouse::{GatehouseBuilder, Outbound, StoreBackend};
use gatehouse::protocol::{ClientMessage, ConnectionId, Directive, ServerMessage};

async fn recv(
    outbound: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>,
) -> Outbound {
    tokio::time::timeout(Duration::from_secs(2), outbound.recv())
        .await
        .expect("timed out waiting for outbound traffic")
        .expect("gateway closed")
}

#[tokio::test]
async fn test_build_memory_backend_and_login() {
    let (handle, mut outbound) = GatehouseBuilder::new()
        .store_backend(StoreBackend::Memory)
        .build()
        .await
        .expect("memory build should succeed");

    handle
        .deliver(
            ConnectionId(1),
            ClientMessage::Login { play_token: "alice".into() },
        )
        .unwrap();

    // BindChannel, SetIdentity, ElevateState, then the accept reply.
    assert!(matches!(
        recv(&mut outbound).await,
        Outbound::Control(Directive::BindChannel { .. })
    ));
    assert!(matches!(
        recv(&mut outbound).await,
        Outbound::Control(Directive::SetIdentity { .. })
    ));
    assert!(matches!(
        recv(&mut outbound).await,
        Outbound::Control(Directive::ElevateState { .. })
    ));
    assert!(matches!(
        recv(&mut outbound).await,
        Outbound::Message { message: ServerMessage::AcceptLogin, .. }
    ));
}

#[tokio::test]
async fn test_build_file_backend_persists_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");

    let (handle, mut outbound) = GatehouseBuilder::new()
        .store_backend(StoreBackend::File(path.clone()))
        .build()
        .await
        .expect("file build should succeed");

    handle
        .deliver(
            ConnectionId(1),
            ClientMessage::Login { play_token: "alice".into() },
        )
        .unwrap();
    // Drain through the accept reply so the mapping write has happened.
    loop {
        if matches!(
            recv(&mut outbound).await,
            Outbound::Message { message: ServerMessage::AcceptLogin, .. }
        ) {
            break;
        }
    }

    let persisted = std::fs::read_to_string(&path).expect("mapping file written");
    assert!(persisted.contains("alice"));
}

#[tokio::test]
async fn test_request_auth_scheme_defaults_to_devtoken() {
    let (handle, mut outbound) =
        GatehouseBuilder::new().build().await.expect("build should succeed");

    handle
        .deliver(ConnectionId(1), ClientMessage::RequestAuthScheme)
        .unwrap();

    match recv(&mut outbound).await {
        Outbound::Message {
            message: ServerMessage::SetAuthScheme { authorization_url, .. },
            ..
        } => assert!(authorization_url.is_none()),
        other => panic!("expected SetAuthScheme, got {other:?}"),
    }
}
