//! WebSocket transport for the Kodi JSON-RPC endpoint.
//!
//! One complete envelope per text frame. The socket is split into a writer
//! task that drains the dispatcher's outbound channel and a reader task that
//! hands every inbound frame to [`Dispatcher::handle_frame`] in arrival order.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const URL_SCHEME: &str = "ws";

/// Fixed path of the JSON-RPC endpoint on the Kodi web server.
pub const JSONRPC_PATH: &str = "jsonrpc";

/// Build the endpoint address for `host` and `port`.
///
/// Returns `None` when there is nothing to connect to (empty host or port 0).
#[must_use]
pub fn kodi_url(host: &str, port: u16) -> Option<String> {
    let host = host.trim();
    if host.is_empty() || port == 0 {
        return None;
    }
    Some(format!("{URL_SCHEME}://{host}:{port}/{JSONRPC_PATH}"))
}

/// Open the WebSocket connection.
///
/// # Errors
///
/// Returns `Error::WebSocket` if the TCP connection or handshake fails.
pub async fn open(url: &str) -> Result<WsStream> {
    debug!("Opening {}", url);
    let (ws, _response) = connect_async(url).await?;
    Ok(ws)
}

/// Attach an open socket to `dispatcher`.
///
/// Signals `open` before the first inbound frame is read and signals `close`
/// once the reader stops. Returns the reader task handle.
pub fn attach(ws: WsStream, dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::text(frame)).await {
                warn!("Failed to send frame: {}", e);
                break;
            }
        }
        // Outbound channel released: start the close handshake.
        if let Err(e) = sink.close().await {
            trace!("Close handshake failed: {}", e);
        }
    });

    dispatcher.handle_open(outbound_tx);

    tokio::spawn(async move {
        let mut close_code = None;
        let mut close_reason = String::new();

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => dispatcher.handle_frame(text.as_str()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => dispatcher.handle_frame(text),
                    Err(_) => warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len()),
                },
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.as_str().to_owned();
                    }
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    dispatcher.handle_error(e.to_string());
                    break;
                }
            }
        }

        dispatcher.handle_close(close_code, &close_reason);
    })
}
