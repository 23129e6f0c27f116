use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use super::error::HubError;

const MAX_REDIRECTS: usize = 100;
const WEBSOCKETS: &str = "WebSockets";

/// Where to open the WebSocket once negotiation is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    connection_id: Option<String>,
    connection_token: Option<String>,
    #[serde(default)]
    negotiate_version: u32,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableTransport {
    transport: String,
}

/// Negotiates with the hub at `hub_url`, following redirects, and returns the
/// WebSocket endpoint to connect to.
pub async fn negotiate(http: &Client, hub_url: &str) -> Result<Endpoint, HubError> {
    let mut url = hub_url.to_string();
    let mut access_token: Option<String> = None;

    for _ in 0..MAX_REDIRECTS {
        let mut request = http.post(negotiate_url(&url)?);
        if let Some(token) = &access_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(HubError::Negotiate(format!("{}: {}", status, text)));
        }
        let negotiated: NegotiateResponse = response.json().await?;

        if let Some(error) = negotiated.error {
            return Err(HubError::Negotiate(error));
        }
        if let Some(redirect) = negotiated.url {
            debug!(%redirect, "hub negotiation redirected");
            url = redirect;
            access_token = negotiated.access_token;
            continue;
        }
        if !negotiated
            .available_transports
            .iter()
            .any(|t| t.transport == WEBSOCKETS)
        {
            return Err(HubError::Negotiate(
                "server does not offer the WebSockets transport".into(),
            ));
        }

        let id = if negotiated.negotiate_version >= 1 {
            negotiated.connection_token
        } else {
            negotiated.connection_id
        };
        return Ok(Endpoint {
            url: websocket_url(&url, id.as_deref(), access_token.as_deref())?,
        });
    }

    Err(HubError::Negotiate(format!(
        "more than {} negotiation redirects",
        MAX_REDIRECTS
    )))
}

fn negotiate_url(hub_url: &str) -> Result<Url, HubError> {
    let mut url = parse(hub_url)?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    Ok(url)
}

/// `http(s)` becomes `ws(s)`; the connection id and token ride in the query.
pub(crate) fn websocket_url(
    hub_url: &str,
    connection_id: Option<&str>,
    access_token: Option<&str>,
) -> Result<String, HubError> {
    let mut url = parse(hub_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(HubError::InvalidUrl(format!("unsupported scheme {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| HubError::InvalidUrl(hub_url.to_string()))?;
    if let Some(id) = connection_id {
        url.query_pairs_mut().append_pair("id", id);
    }
    if let Some(token) = access_token {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url.to_string())
}

fn parse(raw: &str) -> Result<Url, HubError> {
    Url::parse(raw).map_err(|e| HubError::InvalidUrl(format!("{}: {}", raw, e)))
}
