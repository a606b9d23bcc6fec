//! listen / disconnect supervision.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc;

use rocketchat_connector::config::ConnectorConfig;
use rocketchat_connector::rocketchat::{
    ConnectorState, RocketChatConnector, RocketChatError, Watermark,
};
use rocketchat_connector::types::Message;

use crate::common::{connector_config, history, me_body, record, MockServer, HANG_UP};

const WAIT: Duration = Duration::from_secs(5);

fn start_of_may() -> Watermark {
    match "2018-05-11T16:00:00.000Z".parse() {
        Ok(at) => Watermark::new(at),
        Err(err) => panic!("timestamp should parse: {err}"),
    }
}

async fn connected(
    server: &MockServer,
    config: &ConnectorConfig,
) -> (Arc<RocketChatConnector>, mpsc::Receiver<Message>) {
    server.route("me", 200, me_body()).await;
    let (tx, rx) = mpsc::channel(16);
    let connector = RocketChatConnector::new(config, Arc::new(tx))
        .with_watermark(start_of_may())
        .with_shutdown_timeout(Duration::from_secs(2));
    if let Err(err) = connector.connect().await {
        panic!("login should succeed: {err}");
    }
    (Arc::new(connector), rx)
}

async fn wait_for_state(connector: &RocketChatConnector, wanted: ConnectorState) {
    let mut states = connector.subscribe();
    let reached = matches!(
        tokio::time::timeout(WAIT, states.wait_for(|s| *s == wanted)).await,
        Ok(Ok(_))
    );
    assert!(
        reached,
        "connector never reached {wanted:?}, stuck at {:?}",
        connector.state()
    );
}

fn spawn_listen(
    connector: &Arc<RocketChatConnector>,
) -> tokio::task::JoinHandle<Result<(), RocketChatError>> {
    let connector = Arc::clone(connector);
    tokio::spawn(async move { connector.listen().await })
}

async fn joined(
    handle: tokio::task::JoinHandle<Result<(), RocketChatError>>,
) -> Result<(), RocketChatError> {
    match tokio::time::timeout(WAIT, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => panic!("listen task panicked: {err}"),
        Err(_) => panic!("listen did not return in time"),
    }
}

#[tokio::test]
async fn listen_before_connect_is_refused() {
    let server = MockServer::start().await;
    let (tx, _rx) = mpsc::channel(1);
    let connector = RocketChatConnector::new(&connector_config(&server.api_root()), Arc::new(tx));

    assert!(matches!(
        connector.listen().await,
        Err(RocketChatError::NotConnected)
    ));
    assert_eq!(connector.state(), ConnectorState::Created);
    assert!(server.requests().await.is_empty());
}

#[tokio::test]
async fn disconnect_before_first_interval_makes_no_history_call() {
    let server = MockServer::start().await;
    let mut config = connector_config(&server.api_root());
    config.update_interval = 1.0;
    let (connector, _rx) = connected(&server, &config).await;

    let listener = spawn_listen(&connector);
    wait_for_state(&connector, ConnectorState::Listening).await;
    assert!(connector.is_listening());

    connector.disconnect().await;

    assert!(joined(listener).await.is_ok());
    assert!(server.requests_to("channels.history").await.is_empty());
    assert_eq!(connector.state(), ConnectorState::Disconnected);
    assert!(!connector.is_listening());
}

#[tokio::test]
async fn listen_forwards_messages_until_disconnect() {
    let server = MockServer::start().await;
    server
        .route(
            "channels.history",
            200,
            history(vec![record(
                "ZbhuIO764jOIu",
                "2018-05-11T16:05:41.047Z",
                "hows it going",
            )]),
        )
        .await;
    let (connector, mut rx) = connected(&server, &connector_config(&server.api_root())).await;

    let listener = spawn_listen(&connector);
    let event = match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("dispatch channel closed"),
        Err(_) => panic!("no event dispatched in time"),
    };
    assert_eq!(event.text, "hows it going");
    assert!(connector.is_listening());
    assert_eq!(connector.state(), ConnectorState::Listening);

    connector.disconnect().await;

    assert!(joined(listener).await.is_ok());
    assert_eq!(connector.watermark().as_query(), "2018-05-11T16:05:41.047Z");
    assert!(rx.try_recv().is_err());
    assert!(!server.requests_to("channels.history").await.is_empty());
}

#[tokio::test]
async fn history_rejection_ends_listen_as_failed() {
    let server = MockServer::start().await;
    server
        .route("channels.history", 401, serde_json::json!({"success": false}))
        .await;
    let (connector, _rx) = connected(&server, &connector_config(&server.api_root())).await;

    let result = joined(spawn_listen(&connector)).await;

    match result {
        Err(RocketChatError::Poll { status }) => assert_eq!(status, StatusCode::UNAUTHORIZED),
        other => panic!("expected poll error, got {other:?}"),
    }
    assert_eq!(connector.state(), ConnectorState::Failed);
    assert!(!connector.is_listening());

    // A supervisor may log in again after a failure.
    assert!(connector.connect().await.is_ok());
    assert_eq!(connector.state(), ConnectorState::Connected);
}

#[tokio::test]
async fn dropped_connection_ends_listen_with_transport_error() {
    let server = MockServer::start().await;
    server
        .route("channels.history", HANG_UP, serde_json::Value::Null)
        .await;
    let (connector, _rx) = connected(&server, &connector_config(&server.api_root())).await;

    let result = joined(spawn_listen(&connector)).await;

    assert!(
        matches!(result, Err(RocketChatError::Transport(_))),
        "got {result:?}"
    );
    assert_eq!(connector.state(), ConnectorState::Failed);
}

#[tokio::test]
async fn second_listen_is_refused() {
    let server = MockServer::start().await;
    let mut config = connector_config(&server.api_root());
    config.update_interval = 1.0;
    let (connector, _rx) = connected(&server, &config).await;

    let listener = spawn_listen(&connector);
    wait_for_state(&connector, ConnectorState::Listening).await;

    assert!(matches!(
        connector.listen().await,
        Err(RocketChatError::AlreadyListening)
    ));

    connector.disconnect().await;
    assert!(joined(listener).await.is_ok());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let server = MockServer::start().await;
    let (connector, _rx) = connected(&server, &connector_config(&server.api_root())).await;

    connector.disconnect().await;
    connector.disconnect().await;

    assert_eq!(connector.state(), ConnectorState::Disconnected);
    assert!(!connector.is_listening());
    assert_eq!(connector.identity().await, None);
    let closed = match connector.session() {
        Some(session) => session.is_closed().await,
        None => panic!("connector should own a session"),
    };
    assert!(closed);

    assert!(matches!(
        connector.connect().await,
        Err(RocketChatError::SessionClosed)
    ));
    assert!(matches!(
        connector.listen().await,
        Err(RocketChatError::SessionClosed)
    ));
}
