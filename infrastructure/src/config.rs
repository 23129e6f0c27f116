use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::hub::ReconnectPolicy;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_HUB_URL: &str = "http://localhost:5000/chathub";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub hub_url: String,
    pub reconnect: ReconnectPolicy,
    pub skip_negotiation: bool,
}

impl Config {
    pub fn load() -> Self {
        dotenv().ok();
        Self {
            api_url: env::var("RESUME_CHAT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            hub_url: env::var("RESUME_CHAT_HUB_URL").unwrap_or_else(|_| DEFAULT_HUB_URL.to_string()),
            reconnect: env::var("RESUME_CHAT_RECONNECT_DELAYS_MS")
                .ok()
                .and_then(|raw| parse_delays(&raw))
                .map(ReconnectPolicy::new)
                .unwrap_or_default(),
            skip_negotiation: env::var("RESUME_CHAT_SKIP_NEGOTIATION")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            hub_url: DEFAULT_HUB_URL.to_string(),
            reconnect: ReconnectPolicy::default(),
            skip_negotiation: false,
        }
    }
}

/// `"0,2000,10000"` -> delays in milliseconds. Any bad entry rejects the list.
fn parse_delays(raw: &str) -> Option<Vec<Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().ok().map(Duration::from_millis))
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
