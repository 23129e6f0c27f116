use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::error::HubError;
use super::negotiate::{negotiate, websocket_url};
use super::protocol::{self, HubMessage};
use super::retry::ReconnectPolicy;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;
type Pending = oneshot::Sender<Result<Value, HubError>>;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub skip_negotiation: bool,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
}

impl HubOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            skip_negotiation: false,
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }
}

/// A single logical connection to a hub. Cloning shares the connection.
#[derive(Clone)]
pub struct HubConnection {
    shared: Arc<Shared>,
}

struct Shared {
    options: HubOptions,
    http: reqwest::Client,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    pending: Mutex<HashMap<String, Pending>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_invocation: AtomicU64,
    state: watch::Sender<HubState>,
    stop: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// How one established socket came to an end.
enum SessionEnd {
    Stopped,
    Lost { reason: String, reconnect: bool },
}

impl HubConnection {
    pub fn new(options: HubOptions) -> Self {
        let (state, _) = watch::channel(HubState::Disconnected);
        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                options,
                http: reqwest::Client::new(),
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                next_invocation: AtomicU64::new(0),
                state,
                stop,
                driver: Mutex::new(None),
            }),
        }
    }

    /// Registers a handler for server invocations of `method` (case-insensitive).
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        lock(&self.shared.handlers)
            .entry(method.to_lowercase())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn state(&self) -> HubState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<HubState> {
        self.shared.state.subscribe()
    }

    /// Opens the connection. Reconnecting only applies once this has succeeded.
    pub async fn start(&self) -> Result<(), HubError> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == HubState::Disconnected {
                *state = HubState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(HubError::AlreadyStarted);
        }
        self.shared.stop.send_replace(false);

        let (socket, trailing) = match self.shared.connect().await {
            Ok(established) => established,
            Err(err) => {
                self.shared.set_state(HubState::Disconnected);
                return Err(err);
            }
        };
        if *self.shared.stop.borrow() {
            let mut socket = socket;
            let _ = socket.close(None).await;
            self.shared.set_state(HubState::Disconnected);
            return Err(HubError::ConnectionClosed);
        }

        self.shared.set_state(HubState::Connected);
        info!(url = %self.shared.options.url, "hub connected");
        let driver = tokio::spawn(drive(Arc::clone(&self.shared), socket, trailing));
        *lock(&self.shared.driver) = Some(driver);
        Ok(())
    }

    /// Invokes `target` on the server and waits for its completion.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Value, HubError> {
        let id = self
            .shared
            .next_invocation
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let frame = HubMessage::invocation(Some(id.clone()), target, arguments).encode()?;
        let (tx, rx) = oneshot::channel();
        {
            let outbound = lock(&self.shared.outbound);
            let Some(sender) = outbound.as_ref() else {
                return Err(HubError::NotConnected);
            };
            lock(&self.shared.pending).insert(id.clone(), tx);
            if sender.send(frame).is_err() {
                lock(&self.shared.pending).remove(&id);
                return Err(HubError::NotConnected);
            }
        }
        rx.await.map_err(|_| HubError::ConnectionClosed)?
    }

    /// Closes the connection and stops any reconnect in progress. Idempotent.
    pub async fn stop(&self) {
        self.shared.stop.send_replace(true);
        let driver = lock(&self.shared.driver).take();
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                warn!(error = %err, "hub driver ended abnormally");
            }
        }
        self.shared.fail_pending();
        self.shared.set_state(HubState::Disconnected);
    }
}

impl Shared {
    fn set_state(&self, next: HubState) {
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn fail_pending(&self) {
        for (_, waiter) in lock(&self.pending).drain() {
            let _ = waiter.send(Err(HubError::ConnectionClosed));
        }
    }

    async fn connect(&self) -> Result<(Socket, Vec<HubMessage>), HubError> {
        let url = if self.options.skip_negotiation {
            websocket_url(&self.options.url, None, None)?
        } else {
            negotiate(&self.http, &self.options.url).await?.url
        };
        debug!(%url, "opening hub socket");
        let (mut socket, _) = connect_async(url.as_str()).await?;
        let trailing = handshake(&mut socket, self.options.server_timeout).await?;
        Ok((socket, trailing))
    }

    /// Returns how the session should end when `message` closes it.
    fn dispatch(&self, message: HubMessage) -> Option<SessionEnd> {
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                let handlers = lock(&self.handlers)
                    .get(&target.to_lowercase())
                    .cloned()
                    .unwrap_or_default();
                if handlers.is_empty() {
                    warn!(method = %target, "no client method registered for hub invocation");
                }
                for handler in handlers {
                    handler(&arguments);
                }
                None
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                match lock(&self.pending).remove(&invocation_id) {
                    Some(waiter) => {
                        let outcome = match error {
                            Some(error) => Err(HubError::Invocation(error)),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    }
                    None => debug!(%invocation_id, "completion for unknown invocation"),
                }
                None
            }
            HubMessage::Close {
                error,
                allow_reconnect,
            } => Some(SessionEnd::Lost {
                reason: error.unwrap_or_else(|| "server closed the connection".into()),
                reconnect: allow_reconnect,
            }),
            HubMessage::Ping => None,
            HubMessage::StreamItem { .. } | HubMessage::Unknown(_) => {
                debug!(?message, "ignoring hub message");
                None
            }
        }
    }
}

async fn handshake(socket: &mut Socket, timeout: Duration) -> Result<Vec<HubMessage>, HubError> {
    socket.send(Message::text(protocol::handshake_request())).await?;
    let reply = tokio::time::timeout(timeout, async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(HubError::Handshake("socket closed during handshake".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(HubError::from(err)),
            }
        }
    })
    .await
    .map_err(|_| HubError::Handshake("timed out waiting for the server".into()))??;
    protocol::parse_handshake(&reply)
}

async fn drive(shared: Arc<Shared>, socket: Socket, trailing: Vec<HubMessage>) {
    let mut stop = shared.stop.subscribe();
    let mut socket = socket;
    let mut trailing = trailing;

    loop {
        let end = run_session(&shared, socket, trailing, &mut stop).await;
        shared.fail_pending();
        match end {
            SessionEnd::Stopped => break,
            SessionEnd::Lost {
                reason,
                reconnect: false,
            } => {
                warn!(%reason, "hub connection closed");
                break;
            }
            SessionEnd::Lost {
                reason,
                reconnect: true,
            } => {
                warn!(%reason, "hub connection lost");
                match reconnect(&shared, &mut stop).await {
                    Some((next, rest)) => {
                        socket = next;
                        trailing = rest;
                    }
                    None => break,
                }
            }
        }
    }

    shared.set_state(HubState::Disconnected);
}

async fn run_session(
    shared: &Shared,
    socket: Socket,
    trailing: Vec<HubMessage>,
    stop: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *lock(&shared.outbound) = Some(tx);

    let end = 'session: {
        if *stop.borrow_and_update() {
            break 'session SessionEnd::Stopped;
        }
        for message in trailing {
            if let Some(end) = shared.dispatch(message) {
                break 'session end;
            }
        }

        let mut keep_alive = interval(shared.options.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.tick().await;
        let server_timeout = sleep(shared.options.server_timeout);
        tokio::pin!(server_timeout);

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break 'session SessionEnd::Stopped;
                }
                Some(frame) = rx.recv() => {
                    if let Err(err) = sink.send(Message::text(frame)).await {
                        break 'session lost(err.to_string());
                    }
                }
                _ = keep_alive.tick() => {
                    let ping = match HubMessage::Ping.encode() {
                        Ok(ping) => ping,
                        Err(err) => break 'session lost(err.to_string()),
                    };
                    if let Err(err) = sink.send(Message::text(ping)).await {
                        break 'session lost(err.to_string());
                    }
                }
                () = &mut server_timeout => {
                    break 'session lost("no message from the server within the timeout".into());
                }
                incoming = stream.next() => {
                    server_timeout
                        .as_mut()
                        .reset(Instant::now() + shared.options.server_timeout);
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            for message in protocol::parse_frame(&text) {
                                if let Some(end) = shared.dispatch(message) {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break 'session end;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            break 'session lost("socket closed by the server".into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break 'session lost(err.to_string()),
                    }
                }
            }
        }
    };

    *lock(&shared.outbound) = None;
    end
}

fn lost(reason: String) -> SessionEnd {
    SessionEnd::Lost {
        reason,
        reconnect: true,
    }
}

async fn reconnect(
    shared: &Shared,
    stop: &mut watch::Receiver<bool>,
) -> Option<(Socket, Vec<HubMessage>)> {
    shared.set_state(HubState::Reconnecting);
    let policy = &shared.options.reconnect;

    for attempt in 0..policy.max_attempts() {
        let delay = policy.next_delay(attempt)?;
        tokio::select! {
            _ = sleep(delay) => {}
            _ = stop.changed() => return None,
        }
        info!(attempt = attempt + 1, "reconnecting to hub");
        let outcome = tokio::select! {
            outcome = shared.connect() => outcome,
            _ = stop.changed() => return None,
        };
        match outcome {
            Ok(established) => {
                if *stop.borrow() {
                    return None;
                }
                shared.set_state(HubState::Connected);
                info!(attempt = attempt + 1, "hub reconnected");
                return Some(established);
            }
            Err(err) => warn!(attempt = attempt + 1, error = %err, "hub reconnect attempt failed"),
        }
    }

    warn!(
        attempts = policy.max_attempts(),
        "hub reconnect attempts exhausted"
    );
    None
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
