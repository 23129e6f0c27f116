//! A minimal hub server on a local port, speaking just enough of the JSON
//! protocol for the client tests.

use futures::{SinkExt, StreamExt};
use infrastructure::hub::{HubOptions, ReconnectPolicy};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub type ServerSocket = WebSocketStream<TcpStream>;

pub const WAIT: Duration = Duration::from_secs(5);

/// Binds a port and returns options pointing at it, without negotiation or
/// reconnects.
pub async fn listen() -> (TcpListener, HubOptions) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/chathub", listener.local_addr().unwrap());
    let options = HubOptions::new(url)
        .skip_negotiation(true)
        .with_reconnect(ReconnectPolicy::disabled());
    (listener, options)
}

/// Accepts one client and completes the JSON handshake.
pub async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    let hello = next_text(&mut ws).await.expect("handshake request");
    let hello: Value = serde_json::from_str(hello.trim_end_matches('\u{1e}')).unwrap();
    assert_eq!(hello, json!({ "protocol": "json", "version": 1 }));
    send_raw(&mut ws, "{}\u{1e}".to_string()).await;
    ws
}

pub async fn next_text(ws: &mut ServerSocket) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message.ok()? {
            Message::Text(text) => return Some(text.to_string()),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

/// Next hub record from the client, skipping keepalive pings.
pub async fn next_record(ws: &mut ServerSocket) -> Option<Value> {
    loop {
        let text = next_text(ws).await?;
        for record in text.split('\u{1e}').filter(|r| !r.is_empty()) {
            let value: Value = serde_json::from_str(record).unwrap();
            if value["type"] != 6 {
                return Some(value);
            }
        }
    }
}

pub async fn send_raw(ws: &mut ServerSocket, frame: String) {
    ws.send(Message::text(frame)).await.unwrap();
}

pub async fn send_record(ws: &mut ServerSocket, record: Value) {
    send_raw(ws, format!("{}\u{1e}", record)).await;
}

/// A `ReceiveMessage` invocation carrying an assistant message.
pub fn pushed(content: &str) -> Value {
    json!({
        "type": 1,
        "target": "ReceiveMessage",
        "arguments": [{
            "id": "m-1",
            "content": content,
            "isUser": false,
            "timestamp": "2024-05-01T12:00:00Z"
        }]
    })
}
