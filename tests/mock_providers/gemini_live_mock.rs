//! WebSocket mock of the Gemini Live endpoint.
//!
//! Every accepted connection is handed to the test as a [`MockLiveConnection`]
//! after the mock has read the setup message. The test decides when to send
//! `setupComplete` and what follows.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Access token the mock refuses at the HTTP upgrade.
pub const REJECTED_TOKEN: &str = "auth_tokens/rejected";

pub enum ServerAction {
    Json(Value),
    Close { code: u16, reason: String },
}

/// Server side of one accepted connection.
pub struct MockLiveConnection {
    /// Request path and query of the upgrade.
    pub uri: String,
    pub setup: Value,
    pub from_client: mpsc::UnboundedReceiver<Value>,
    to_client: mpsc::UnboundedSender<ServerAction>,
}

impl MockLiveConnection {
    pub fn send_json(&self, value: Value) {
        let _ = self.to_client.send(ServerAction::Json(value));
    }

    pub fn setup_complete(&self) {
        self.send_json(serde_json::json!({ "setupComplete": {} }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(ServerAction::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next client message of the given top-level kind, skipping others.
    pub async fn next_of_kind(&mut self, kind: &str) -> Option<Value> {
        while let Some(msg) = self.from_client.recv().await {
            if msg.get(kind).is_some() {
                return Some(msg);
            }
        }
        None
    }
}

pub struct GeminiLiveMock {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<MockLiveConnection>,
}

impl GeminiLiveMock {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, tx).await {
                        eprintln!("mock connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            connections: rx,
        }
    }

    /// Base URL to configure as `live_api_url`.
    pub fn base_url(&self) -> String {
        format!("ws://{}/ws/live", self.addr)
    }

    pub async fn accept(&mut self) -> MockLiveConnection {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.connections.recv())
            .await
            .expect("no connection within 5s")
            .expect("mock server stopped")
    }
}

async fn handle_connection(
    stream: TcpStream,
    connections: mpsc::UnboundedSender<MockLiveConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut uri = String::new();
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        uri = request.uri().to_string();
        let rejected = format!(
            "access_token={}",
            url::form_urlencoded::byte_serialize(REJECTED_TOKEN.as_bytes()).collect::<String>()
        );
        if uri.contains(&rejected) {
            let mut error = ErrorResponse::new(Some("API key not valid".to_string()));
            *error.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(error);
        }
        Ok(response)
    })
    .await?;
    let (mut write, mut read) = ws_stream.split();

    // The first frame is always the setup message.
    let setup = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text)?,
            Some(Ok(_)) => continue,
            _ => return Ok(()),
        }
    };

    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let _ = connections.send(MockLiveConnection {
        uri,
        setup,
        from_client: client_rx,
        to_client: server_tx,
    });

    loop {
        tokio::select! {
            action = server_rx.recv() => match action {
                Some(ServerAction::Json(value)) => {
                    write.send(Message::Text(value.to_string().into())).await?;
                }
                Some(ServerAction::Close { code, reason }) => {
                    write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await?;
                    break;
                }
                None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        let _ = client_tx.send(value);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Ok(value) = serde_json::from_slice::<Value>(&data) {
                        let _ = client_tx.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(())
}
