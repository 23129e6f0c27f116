use colored::Colorize;
use domain::models::{ChatMessage, ChatResponse, DocumentSource};
use infrastructure::hub::HubState;
use shared::utils::truncate_chars;

const SNIPPET_CHARS: usize = 120;

pub fn message(message: &ChatMessage) -> String {
    let author = if message.is_user {
        "You".cyan().bold()
    } else {
        "Assistant".green().bold()
    };
    let mut out = format!(
        "{} {}\n{}",
        author,
        message.timestamp.format("%H:%M").to_string().dimmed(),
        message.content
    );
    for source in message.sources() {
        out.push('\n');
        out.push_str(&self::source(source));
    }
    out
}

pub fn source(source: &DocumentSource) -> String {
    let snippet = truncate_chars(&source.content.replace('\n', " "), SNIPPET_CHARS);
    format!(
        "  {} {} {}",
        format!("[{}]", source.file_name).blue(),
        format!("(score {:.2})", source.relevance_score).dimmed(),
        snippet
    )
}

pub fn exchange(index: usize, response: &ChatResponse) -> String {
    let mut out = format!("{} {}", format!("#{}", index + 1).yellow(), response.message);
    for source in &response.sources {
        out.push('\n');
        out.push_str(&self::source(source));
    }
    out
}

pub fn hub_state(state: HubState) -> String {
    let label = match state {
        HubState::Disconnected => "live updates disconnected".red(),
        HubState::Connecting => "connecting to live updates...".yellow(),
        HubState::Connected => "live updates connected".green(),
        HubState::Reconnecting => "live updates lost, reconnecting...".yellow(),
    };
    format!("-- {} --", label)
}

pub fn help() -> String {
    [
        "/clear          start a new conversation",
        "/push <text>    send through the live connection",
        "/session        show the current session id",
        "/help           show this help",
        "/exit, /quit    leave",
    ]
    .join("\n")
}
