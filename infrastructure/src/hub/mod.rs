//! Client side of the JSON hub protocol over WebSockets.
//!
//! A [`HubConnection`] negotiates, performs the protocol handshake, dispatches
//! server invocations to registered handlers and correlates client invocations
//! with their completions. Lost connections are re-established according to a
//! [`ReconnectPolicy`].

mod connection;
mod error;
mod negotiate;
pub mod protocol;
mod retry;

pub use connection::{HubConnection, HubOptions, HubState};
pub use error::HubError;
pub use negotiate::{negotiate, Endpoint};
pub use retry::ReconnectPolicy;
