use domain::models::ChatMessage;
use domain::ports::PushChannel;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{error, warn};

use crate::hub::{HubConnection, HubError, HubOptions, HubState};

const RECEIVE_MESSAGE: &str = "ReceiveMessage";
const SEND_MESSAGE: &str = "SendMessage";
const PUSH_CAPACITY: usize = 64;

/// Republishes the hub's `ReceiveMessage` events on a broadcast channel.
pub struct RealtimeClient {
    hub: HubConnection,
    messages: broadcast::Sender<ChatMessage>,
}

impl RealtimeClient {
    /// Builds the client and opens its connection. A failed connect is logged
    /// and leaves the client disconnected.
    pub async fn connect(options: HubOptions) -> Self {
        let client = Self::new(options);
        if let Err(err) = client.hub.start().await {
            error!(error = %err, "hub connection error");
        }
        client
    }

    /// Builds the client without connecting.
    pub fn new(options: HubOptions) -> Self {
        let hub = HubConnection::new(options);
        let (messages, _) = broadcast::channel(PUSH_CAPACITY);

        let publisher = messages.clone();
        hub.on(RECEIVE_MESSAGE, move |arguments| {
            let Some(payload) = arguments.first() else {
                warn!("ReceiveMessage without a payload");
                return;
            };
            match serde_json::from_value::<ChatMessage>(payload.clone()) {
                // No subscribers is fine: nothing is replayed to late joiners.
                Ok(message) => {
                    let _ = publisher.send(message);
                }
                Err(err) => warn!(error = %err, "dropping malformed pushed message"),
            }
        });

        Self { hub, messages }
    }

    pub fn hub(&self) -> &HubConnection {
        &self.hub
    }

    pub fn state(&self) -> HubState {
        self.hub.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<HubState> {
        self.hub.state_changes()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.messages.subscribe()
    }

    /// Invokes `SendMessage(text, session_id)` and waits for the acknowledgement.
    pub async fn send_message(&self, text: &str, session_id: &str) -> Result<(), HubError> {
        self.hub
            .invoke(SEND_MESSAGE, vec![json!(text), json!(session_id)])
            .await
            .map(|_| ())
    }

    pub async fn disconnect(&self) {
        self.hub.stop().await;
    }
}

impl PushChannel for RealtimeClient {
    fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        RealtimeClient::subscribe(self)
    }

    async fn disconnect(&self) {
        RealtimeClient::disconnect(self).await
    }
}
