use application::ChatController;
use clap::Parser;
use colored::Colorize;
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use domain::ports::{ChatApi, PushChannel};
use infrastructure::chat_client::ChatClient;
use infrastructure::config::Config;
use infrastructure::hub::{HubError, HubOptions, HubState};
use infrastructure::realtime::RealtimeClient;
use shared::types::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::warn;

use crate::render;

#[derive(Parser, Debug)]
#[command(name = "resume-chat")]
#[command(about = "Terminal client for the Resume Chat assistant")]
pub struct Cli {
    /// Base URL of the chat HTTP API (overrides RESUME_CHAT_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// URL of the real-time hub (overrides RESUME_CHAT_HUB_URL)
    #[arg(long)]
    pub hub_url: Option<String>,

    /// Open the hub WebSocket directly, without the negotiate request
    #[arg(long)]
    pub skip_negotiation: bool,

    /// Print the recorded exchanges of a session and exit
    #[arg(long, value_name = "SESSION_ID")]
    pub history: Option<String>,

    /// Send one message, print the reply and exit
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,
}

/// A line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Exit,
    Clear,
    Help,
    Session,
    Push(&'a str),
    Message(&'a str),
}

impl<'a> ChatCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "/exit" | "/quit" => ChatCommand::Exit,
            "/clear" => ChatCommand::Clear,
            "/help" => ChatCommand::Help,
            "/session" => ChatCommand::Session,
            _ => match trimmed.strip_prefix("/push ") {
                Some(text) => ChatCommand::Push(text.trim()),
                None => ChatCommand::Message(line),
            },
        }
    }
}

pub struct CliApp {
    config: Config,
}

impl CliApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&mut self, cli: Cli) -> Result<()> {
        if let Some(url) = cli.api_url {
            self.config.api_url = url;
        }
        if let Some(url) = cli.hub_url {
            self.config.hub_url = url;
        }
        if cli.skip_negotiation {
            self.config.skip_negotiation = true;
        }

        let args_str = cli.args.join(" ");
        if let Some(session_id) = cli.history {
            self.handle_history(&session_id).await
        } else if !args_str.trim().is_empty() {
            self.handle_one_shot(&args_str).await
        } else {
            self.handle_chat().await
        }
    }

    fn hub_options(&self) -> HubOptions {
        HubOptions::new(self.config.hub_url.clone())
            .with_reconnect(self.config.reconnect.clone())
            .skip_negotiation(self.config.skip_negotiation)
    }

    async fn handle_chat(&self) -> Result<()> {
        let api = Arc::new(ChatClient::new(&self.config.api_url));
        let realtime = Arc::new(RealtimeClient::connect(self.hub_options()).await);
        let mut controller = ChatController::new(api, Arc::clone(&realtime));

        println!("{}", "Resume Chat. Type /help for commands.".bold());
        if realtime.state() != HubState::Connected {
            println!("{}", render::hub_state(realtime.state()));
        }
        print_all(&controller);

        let stdin = BufReader::new(tokio::io::stdin());
        let outcome = chat_loop(&mut controller, &realtime, stdin).await;
        controller.teardown().await;
        outcome
    }

    async fn handle_one_shot(&self, text: &str) -> Result<()> {
        let api = Arc::new(ChatClient::new(&self.config.api_url));
        // Never started: one-shot mode does not listen for pushes.
        let realtime = Arc::new(RealtimeClient::new(self.hub_options()));
        let mut controller = ChatController::new(api, realtime);

        settle(&mut controller).await;
        controller.set_input(text);
        if controller.send_message() {
            eprintln!("{}", "Thinking...".dimmed());
        }
        settle(&mut controller).await;

        if let Some(reply) = controller.messages().last().filter(|m| !m.is_user) {
            println!("{}", render::message(reply));
        }
        controller.teardown().await;
        Ok(())
    }

    async fn handle_history(&self, session_id: &str) -> Result<()> {
        let client = ChatClient::new(&self.config.api_url);
        let history = client.session_history(session_id).await?;
        if history.is_empty() {
            println!("{}", format!("No history recorded for session {}", session_id).yellow());
            return Ok(());
        }
        for (index, exchange) in history.iter().enumerate() {
            println!("{}\n", render::exchange(index, exchange));
        }
        Ok(())
    }
}

/// Reads commands from `input` until `/exit`, end of input or Ctrl-C. Hub
/// sends run as tasks so a slow acknowledgement never stalls the loop.
pub async fn chat_loop<A: ChatApi, R: AsyncBufRead + Unpin>(
    controller: &mut ChatController<A, RealtimeClient>,
    realtime: &Arc<RealtimeClient>,
    input: R,
) -> Result<()> {
    let mut lines = input.lines();
    let mut hub_states = realtime.state_changes();
    let mut hub_sends: JoinSet<std::result::Result<(), HubError>> = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match ChatCommand::parse(&line) {
                    ChatCommand::Exit => break,
                    ChatCommand::Help => println!("{}", render::help()),
                    ChatCommand::Session => {
                        let id = controller.session_id();
                        if id.is_empty() {
                            println!("{}", "(no session yet)".dimmed());
                        } else {
                            println!("{}", id);
                        }
                    }
                    ChatCommand::Clear => {
                        controller.clear_chat();
                        execute!(std::io::stdout(), Clear(ClearType::All), MoveTo(0, 0))?;
                        print_all(controller);
                    }
                    ChatCommand::Push(text) => {
                        let realtime = Arc::clone(realtime);
                        let text = text.to_string();
                        let session_id = controller.session_id().to_string();
                        hub_sends.spawn(async move { realtime.send_message(&text, &session_id).await });
                    }
                    ChatCommand::Message(text) => {
                        controller.set_input(text);
                        if controller.send_message() {
                            eprintln!("{}", "Thinking...".dimmed());
                        } else if controller.is_loading() {
                            eprintln!("{}", "Still waiting for the previous reply.".dimmed());
                        }
                    }
                }
            }
            Some(event) = controller.next_event() => {
                if let Some(message) = controller.handle_event(event) {
                    println!("{}\n", render::message(message));
                }
            }
            Some(sent) = hub_sends.join_next(), if !hub_sends.is_empty() => match sent {
                Ok(Ok(())) => println!("{}", "(sent over the live connection)".dimmed()),
                Ok(Err(err)) => {
                    warn!(error = %err, "hub send failed");
                    println!("{}", format!("Live send failed: {}", err).red());
                }
                Err(err) => warn!(error = %err, "hub send task failed"),
            },
            Ok(()) = hub_states.changed() => {
                let state = *hub_states.borrow_and_update();
                println!("{}", render::hub_state(state));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Applies events until no request is outstanding.
async fn settle<A: ChatApi, P: PushChannel>(controller: &mut ChatController<A, P>) {
    while controller.has_pending_work() {
        match controller.next_event().await {
            Some(event) => {
                controller.handle_event(event);
            }
            None => break,
        }
    }
}

fn print_all<A: ChatApi, P: PushChannel>(controller: &ChatController<A, P>) {
    for message in controller.messages() {
        println!("{}\n", render::message(message));
    }
}
