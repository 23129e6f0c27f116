use domain::models::{ChatMessage, ChatRequest, ChatResponse};
use domain::ports::{ChatApi, PushChannel};
use domain::session::ChatSession;
use shared::telemetry::Telemetry;
use shared::types::Result;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

pub const WELCOME_MESSAGE: &str = "Hello! I am the Resume Chat assistant. Ask me anything about my background, experience, projects, or skills!\n\nTry asking:\n• \"What are your technical skills?\"\n• \"Tell me about your experience with Azure\"\n• \"What projects have you worked on?\"\n• \"What is your educational background?\"\n• \"Describe your leadership experience\"";

pub const SEND_FAILURE_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Something that finished in the background and now has to be applied to
/// the conversation.
#[derive(Debug)]
pub enum ChatEvent {
    SessionCreated {
        generation: u64,
        result: Result<String>,
    },
    ReplySettled(Result<ChatResponse>),
    Pushed(ChatMessage),
}

enum Wake {
    Task(std::result::Result<ChatEvent, JoinError>),
    Push(std::result::Result<ChatMessage, RecvError>),
}

/// Owns the conversation and drives both chat clients.
///
/// All state lives here and is only touched through `&mut self`; network calls
/// run as tasks whose outcomes come back through [`ChatController::next_event`].
pub struct ChatController<A: ChatApi, P: PushChannel> {
    api: Arc<A>,
    push: Arc<P>,
    session: ChatSession,
    input: String,
    loading: bool,
    session_generation: u64,
    tasks: JoinSet<ChatEvent>,
    push_rx: Option<broadcast::Receiver<ChatMessage>>,
    torn_down: bool,
}

impl<A: ChatApi, P: PushChannel> ChatController<A, P> {
    /// Requests a session, subscribes to pushed messages and seeds the welcome
    /// message. Must be called inside a tokio runtime.
    pub fn new(api: Arc<A>, push: Arc<P>) -> Self {
        let push_rx = Some(push.subscribe());
        let mut controller = Self {
            api,
            push,
            session: ChatSession::new(),
            input: String::new(),
            loading: false,
            session_generation: 0,
            tasks: JoinSet::new(),
            push_rx,
            torn_down: false,
        };
        controller.request_session();
        controller.add_welcome_message();
        controller
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.session.messages()
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// True while a session request or a send is still running.
    pub fn has_pending_work(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Sends the current input. Blank input, a send already in flight, or a torn
    /// down controller make this a no-op returning `false`.
    pub fn send_message(&mut self) -> bool {
        if self.torn_down || self.loading || self.input.trim().is_empty() {
            return false;
        }

        let content = std::mem::take(&mut self.input);
        let request = ChatRequest::new(content.clone(), self.session.id());
        self.session.push(ChatMessage::user(content));
        self.loading = true;

        let api = Arc::clone(&self.api);
        self.tasks.spawn(async move {
            let telemetry = Telemetry::new();
            let result = api.send_message(request).await;
            debug!(elapsed_ms = telemetry.elapsed_ms(), ok = result.is_ok(), "chat reply settled");
            ChatEvent::ReplySettled(result)
        });
        true
    }

    /// Starts over with only the welcome message and a freshly requested session.
    /// The previous session is simply forgotten. Does nothing after teardown.
    pub fn clear_chat(&mut self) {
        if self.torn_down {
            return;
        }
        self.session.reset();
        self.add_welcome_message();
        self.request_session();
    }

    /// Waits for the next background outcome or pushed message. `None` once
    /// nothing more can arrive.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        loop {
            if self.tasks.is_empty() && self.push_rx.is_none() {
                return None;
            }

            let wake = tokio::select! {
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => Wake::Task(joined),
                received = recv_push(&mut self.push_rx), if self.push_rx.is_some() => Wake::Push(received),
            };

            match wake {
                Wake::Task(Ok(event)) => return Some(event),
                Wake::Task(Err(err)) => {
                    if !err.is_cancelled() {
                        error!(error = %err, "chat task failed");
                    }
                }
                Wake::Push(Ok(message)) => return Some(ChatEvent::Pushed(message)),
                Wake::Push(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "push stream lagged; messages were dropped");
                }
                Wake::Push(Err(RecvError::Closed)) => {
                    debug!("push stream closed");
                    self.push_rx = None;
                }
            }
        }
    }

    /// Applies an event and returns the message it appended, if any.
    pub fn handle_event(&mut self, event: ChatEvent) -> Option<&ChatMessage> {
        match event {
            ChatEvent::SessionCreated { generation, result } => {
                if generation != self.session_generation {
                    debug!(generation, "ignoring session from before the last clear");
                    return None;
                }
                match result {
                    Ok(session_id) => {
                        info!(%session_id, "chat session created");
                        self.session.set_id(session_id);
                    }
                    Err(err) => error!(error = %format!("{:#}", err), "error creating session"),
                }
                None
            }
            ChatEvent::ReplySettled(result) => {
                self.loading = false;
                let reply = match result {
                    Ok(response) => ChatMessage::assistant_with_sources(response.message, response.sources),
                    Err(err) => {
                        error!(error = %format!("{:#}", err), "error sending message");
                        ChatMessage::assistant(SEND_FAILURE_MESSAGE)
                    }
                };
                Some(self.session.push(reply))
            }
            ChatEvent::Pushed(message) => Some(self.session.push(message)),
        }
    }

    /// Cancels outstanding requests, drops the push subscription and closes the
    /// real-time connection. Only the first call does anything.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.tasks.shutdown().await;
        self.push_rx = None;
        self.loading = false;
        self.push.disconnect().await;
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn add_welcome_message(&mut self) {
        self.session.push(ChatMessage::assistant(WELCOME_MESSAGE));
    }

    fn request_session(&mut self) {
        self.session_generation += 1;
        let generation = self.session_generation;
        let api = Arc::clone(&self.api);
        self.tasks.spawn(async move {
            ChatEvent::SessionCreated {
                generation,
                result: api.create_session().await,
            }
        });
    }
}

async fn recv_push(
    rx: &mut Option<broadcast::Receiver<ChatMessage>>,
) -> std::result::Result<ChatMessage, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
