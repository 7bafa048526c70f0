//! JSON-RPC client for Kodi over a WebSocket.
//!
//! Calls are correlated with their responses by id and resolve as futures;
//! server notifications are fanned out to subscribers by method name.
//!
//! # Architecture
//!
//! - [`protocol`]: envelope types and protocol constants
//! - [`dispatcher`]: call correlation, notification dispatch, lifecycle state
//! - [`registry`]: subscriber registry and listener handles
//! - [`capabilities`]: methods discovered through `JSONRPC.Introspect`
//! - [`transport`]: WebSocket connection and endpoint URL
//! - [`client`]: [`KodiClient`], the high-level entry point
//! - [`config`]: client configuration file
//! - [`error`]: error type and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use kodi_rpc::{ClientConfig, KodiClient, Listener};
//!
//! # async fn example() -> Result<(), kodi_rpc::Error> {
//! let client = KodiClient::open(&ClientConfig::new("kodi.local", 9090)).await?;
//!
//! client.on("Player.OnPlay", &Listener::new(|params| {
//!     println!("playing: {params:?}");
//! }))?;
//!
//! if let Some(play_pause) = client.method("Player", "PlayPause") {
//!     play_pause.call(Some(serde_json::json!({"playerid": 1})))?.await?;
//! }
//!
//! let movies = client.execute("VideoLibrary.GetMovies", None).await?;
//! println!("{movies}");
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use capabilities::{Capabilities, MethodHandle, split_method};
pub use client::KodiClient;
pub use config::{ClientConfig, DEFAULT_HOST, DEFAULT_PORT, default_config_path};
pub use dispatcher::{ConnectionState, Dispatcher, PendingCall};
pub use error::{Error, Result};
pub use protocol::{
    CallId, EVENT_CLOSE, EVENT_ERROR, EVENT_OPEN, INTROSPECT_METHOD, JSONRPC_VERSION,
    RemoteError, Request,
};
pub use registry::{Listener, ListenerRegistry};
pub use transport::kodi_url;
