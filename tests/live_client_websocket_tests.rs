//! Live client over a real WebSocket.
//!
//! Runs the protocol client through `WebSocketTransport` against a local
//! tokio-tungstenite server speaking the Gemini Live message shapes.

mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use live_assist::core::realtime::{
    CloseReason, ConnectionState, FunctionDeclaration, InboundEvent, LiveClient,
    LiveConnectConfig, ToolCallResponse, WebSocketTransport,
};
use live_assist::errors::ConnectionError;
use live_assist::LogStore;

use mock_providers::{GeminiLiveMock, REJECTED_TOKEN};

fn live_config(base_url: String) -> LiveConnectConfig {
    LiveConnectConfig {
        base_url,
        voice: Some("Kore".to_string()),
        system_instruction: Some("Be brief.".to_string()),
        tools: vec![FunctionDeclaration::new("search_products", "Search the catalog")],
        setup_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn next_event(events: &mut live_assist::core::realtime::InboundEventStream) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(5), events.next_event())
        .await
        .expect("event within 5s")
        .expect("stream open")
}

#[tokio::test]
async fn test_setup_handshake_and_tool_round_trip() {
    let mut mock = GeminiLiveMock::start().await;
    let config = live_config(mock.base_url());
    let logs = LogStore::default();
    let mut client = LiveClient::new(Arc::new(WebSocketTransport::new()), logs.clone());

    let (connected, mut conn) = tokio::join!(
        client.connect("gemini-live-2.5-flash-preview", &config, "auth_tokens/abc"),
        async {
            let conn = mock.accept().await;
            conn.setup_complete();
            conn
        }
    );
    connected.unwrap();
    assert!(client.is_open());

    assert!(
        conn.uri
            .contains("/ws/live.BidiGenerateContentConstrained?access_token=auth_tokens%2Fabc"),
        "unexpected upgrade uri {}",
        conn.uri
    );
    let setup = &conn.setup["setup"];
    assert_eq!(setup["model"], "models/gemini-live-2.5-flash-preview");
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Kore"
    );
    assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], "search_products");

    let mut events = client.events().unwrap();
    assert_eq!(next_event(&mut events).await, InboundEvent::ConnectionOpened);

    conn.send_json(json!({"toolCall": {"functionCalls": [
        {"id": "1", "name": "search_products", "args": {"query": "jeans"}}
    ]}}));
    match next_event(&mut events).await {
        InboundEvent::ToolCallRequest(batch) => {
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].args["query"], "jeans");
        }
        other => panic!("unexpected {other:?}"),
    }

    client
        .send_tool_responses(vec![ToolCallResponse {
            id: "1".to_string(),
            name: "search_products".to_string(),
            response: json!({"items": [{"sku": "J-1"}]}),
        }])
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), conn.next_of_kind("toolResponse"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        json!({"toolResponse": {"functionResponses": [
            {"id": "1", "name": "search_products", "response": {"items": [{"sku": "J-1"}]}}
        ]}})
    );

    client.disconnect();
    assert_eq!(
        client.state_history(),
        vec![
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ]
    );
    assert!(logs.entries().iter().any(|e| e.kind == "client.toolResponse"));
}

#[tokio::test]
async fn test_upgrade_rejection_is_auth_error() {
    let mock = GeminiLiveMock::start().await;
    let config = live_config(mock.base_url());
    let mut client = LiveClient::new(Arc::new(WebSocketTransport::new()), LogStore::default());

    let err = client
        .connect("gemini-live-2.5-flash-preview", &config, REJECTED_TOKEN)
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectionError::AuthRejected(_)), "got {err:?}");
    assert!(matches!(client.state(), ConnectionState::Failed(_)));
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Bind and drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = live_config(format!("ws://127.0.0.1:{port}/ws/live"));
    let mut client = LiveClient::new(Arc::new(WebSocketTransport::new()), LogStore::default());

    let err = client.connect("m", &config, "auth_tokens/abc").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn test_server_close_reason_reaches_caller() {
    let mut mock = GeminiLiveMock::start().await;
    let config = live_config(mock.base_url());
    let mut client = LiveClient::new(Arc::new(WebSocketTransport::new()), LogStore::default());

    let (connected, conn) = tokio::join!(
        client.connect("m", &config, "auth_tokens/abc"),
        async {
            let conn = mock.accept().await;
            conn.setup_complete();
            conn
        }
    );
    connected.unwrap();
    let mut events = client.events().unwrap();
    assert_eq!(next_event(&mut events).await, InboundEvent::ConnectionOpened);

    conn.send_json(json!({"serverContent": {"interrupted": true}}));
    conn.close(1000, "Token has been used too many times");

    assert_eq!(next_event(&mut events).await, InboundEvent::Interrupted);
    match next_event(&mut events).await {
        InboundEvent::ConnectionClosed(reason) => {
            assert_eq!(
                reason,
                CloseReason::new(Some(1000), "Token has been used too many times")
            );
            assert!(reason.is_credential_exhausted());
        }
        other => panic!("unexpected {other:?}"),
    }
}
