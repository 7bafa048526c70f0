//! High-level client for a Kodi instance.
//!
//! Wraps a [`Dispatcher`] with address handling, the WebSocket transport and
//! optional request timeouts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::capabilities::{Capabilities, MethodHandle};
use crate::config::ClientConfig;
use crate::dispatcher::{ConnectionState, Dispatcher, PendingCall};
use crate::error::{Error, Result};
use crate::registry::Listener;
use crate::transport::{self, kodi_url};

#[derive(Debug, Clone)]
struct Address {
    host: String,
    port: u16,
}

/// Client for the Kodi JSON-RPC API and its notifications
#[derive(Debug)]
pub struct KodiClient {
    address: Mutex<Address>,
    request_timeout: Option<Duration>,
    dispatcher: Arc<Dispatcher>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl KodiClient {
    /// Create a client without connecting.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            address: Mutex::new(Address {
                host: config.host.clone(),
                port: config.port,
            }),
            request_timeout: config.request_timeout(),
            dispatcher: Dispatcher::new(),
            reader: Mutex::new(None),
        }
    }

    /// Create a client and connect right away if the config asks for it.
    ///
    /// A failed discovery is logged and the connected client is still
    /// returned, with an empty [`KodiClient::api`].
    ///
    /// # Errors
    ///
    /// Returns `Error::NoAddress` or `Error::WebSocket` from
    /// [`KodiClient::connect`].
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let client = Self::new(config);
        if config.connect_immediately {
            match client.connect().await {
                Ok(()) | Err(Error::Discovery(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(client)
    }

    #[must_use]
    pub fn host(&self) -> String {
        self.address().host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.address().port
    }

    /// Endpoint address, or `None` if host or port are unset.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        let address = self.address();
        kodi_url(&address.host, address.port)
    }

    /// Change host and/or port. Takes effect on the next [`KodiClient::connect`].
    pub fn set_url(&self, host: Option<&str>, port: Option<u16>) -> &Self {
        let mut address = self.address.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(host) = host {
            address.host = host.to_string();
        }
        if let Some(port) = port {
            address.port = port;
        }
        self
    }

    /// Connect, then discover the remote method listing.
    ///
    /// Any existing capability table is cleared first. Subscribers to `open`
    /// are notified before discovery runs.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoAddress` before touching any state if there is no
    /// address, `Error::WebSocket` if the socket cannot be opened, and
    /// `Error::Discovery` if introspection fails or outlasts the request
    /// timeout (the connection stays open).
    pub async fn connect(&self) -> Result<()> {
        let url = self.url().ok_or(Error::NoAddress)?;

        self.dispatcher.begin_connect();
        let ws = match transport::open(&url).await {
            Ok(ws) => ws,
            Err(e) => {
                self.dispatcher.handle_error(e.to_string());
                return Err(e);
            }
        };

        let reader = transport::attach(ws, self.dispatcher.clone());
        if let Some(previous) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(reader)
        {
            previous.abort();
        }
        info!("Connected to {}", url);

        self.dispatcher.discover(self.request_timeout).await?;
        Ok(())
    }

    /// Close the connection. `close` subscribers are notified once the
    /// socket has shut down.
    pub fn disconnect(&self) {
        debug!("Disconnecting");
        self.dispatcher.begin_close();
    }

    /// Wait until the current connection's reader has stopped.
    pub async fn closed(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            let _ = reader.await;
        }
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.dispatcher.is_open()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.dispatcher.last_error()
    }

    /// Send a call and return its pending outcome without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the connection is not open.
    pub fn invoke(&self, method: &str, params: Option<Value>) -> Result<PendingCall> {
        self.dispatcher.invoke(method, params)
    }

    /// Call `method` and wait for its result, honoring the request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected`, `Error::Remote` with the server's error
    /// value, `Error::Disconnected`, or `Error::Timeout`.
    pub async fn execute(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let call = self.dispatcher.invoke(method, params)?;
        self.dispatcher.wait(call, self.request_timeout).await
    }

    /// Call `method` and deserialize its result.
    ///
    /// # Errors
    ///
    /// Returns any error from [`KodiClient::execute`], or `Error::Json` if the
    /// result does not match `T`.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self.execute(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Subscribe to a notification or to `open`, `error`, `close`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn on(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.dispatcher.subscribe(event, listener)?;
        Ok(self)
    }

    /// Subscribe for a single delivery of `event`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn once(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.dispatcher.subscribe_once(event, listener)?;
        Ok(self)
    }

    /// Remove one subscription of `listener` to `event`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn off(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.dispatcher.unsubscribe(event, listener)?;
        Ok(self)
    }

    /// Methods discovered on the current connection.
    #[must_use]
    pub fn api(&self) -> Capabilities {
        self.dispatcher.capabilities()
    }

    #[must_use]
    pub fn method(&self, namespace: &str, name: &str) -> Option<MethodHandle> {
        self.dispatcher.method(namespace, name)
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn address(&self) -> Address {
        self.address
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for KodiClient {
    fn drop(&mut self) {
        self.dispatcher.begin_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_does_not_connect() {
        let client = KodiClient::new(&ClientConfig::default());
        assert!(!client.connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.api().is_empty());
    }

    #[test]
    fn test_set_url_keeps_omitted_parts() {
        let client = KodiClient::new(&ClientConfig::default());

        client.set_url(Some("htpc"), None);
        assert_eq!(client.host(), "htpc");
        assert_eq!(client.port(), 9999);

        client.set_url(None, Some(9090));
        assert_eq!(client.url().as_deref(), Some("ws://htpc:9090/jsonrpc"));
    }

    #[test]
    fn test_invoke_not_connected() {
        let client = KodiClient::new(&ClientConfig::default());
        assert!(matches!(
            client.invoke("Foo.Bar", None),
            Err(Error::NotConnected)
        ));
        assert_eq!(client.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_not_connected() {
        let client = KodiClient::new(&ClientConfig::default());
        assert!(matches!(
            client.execute("Foo.Bar", None).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_without_address_changes_nothing() {
        let client = KodiClient::new(&ClientConfig::new("", 9090));
        assert!(matches!(client.connect().await, Err(Error::NoAddress)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.last_error().is_none());
    }

    #[tokio::test]
    async fn test_open_without_connect_immediately() {
        let config = ClientConfig::default().with_connect_immediately(false);
        let client = KodiClient::open(&config).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_records_error() {
        let client = KodiClient::new(&ClientConfig::new("127.0.0.1", 1));
        let errors = Arc::new(Mutex::new(0));
        let counter = errors.clone();
        client
            .on(
                crate::EVENT_ERROR,
                &Listener::new(move |_| *counter.lock().unwrap() += 1),
            )
            .unwrap();

        assert!(matches!(client.connect().await, Err(Error::WebSocket(_))));
        assert_eq!(client.state(), ConnectionState::Errored);
        assert!(client.last_error().is_some());
        assert_eq!(*errors.lock().unwrap(), 1);
    }

    fn attach_channel(client: &KodiClient) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        client.dispatcher().begin_connect();
        client.dispatcher().handle_open(tx);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_timeout_abandons_call() {
        let config = ClientConfig::default().with_request_timeout(Duration::from_millis(50));
        let client = KodiClient::new(&config);
        let _rx = attach_channel(&client);

        assert!(matches!(
            client.execute("VideoLibrary.Scan", None).await,
            Err(Error::Timeout)
        ));
        assert_eq!(client.dispatcher().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_deserializes_result() {
        let client = KodiClient::new(&ClientConfig::default());
        let mut rx = attach_channel(&client);
        let dispatcher = client.dispatcher().clone();

        tokio::spawn(async move {
            let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["method"], "Application.GetProperties");
            dispatcher.handle_frame(
                &serde_json::json!({"id": frame["id"], "result": {"volume": 80, "muted": false}})
                    .to_string(),
            );
        });

        let props: std::collections::HashMap<String, Value> = client
            .request(
                "Application.GetProperties",
                Some(serde_json::json!({"properties": ["volume", "muted"]})),
            )
            .await
            .unwrap();
        assert_eq!(props["volume"], 80);
        assert_eq!(props["muted"], false);
    }

    #[test]
    fn test_subscription_chaining() {
        let client = KodiClient::new(&ClientConfig::default());
        let listener = Listener::new(|_| {});

        client
            .on("Player.OnPlay", &listener)
            .unwrap()
            .once("Player.OnStop", &listener)
            .unwrap()
            .off("Player.OnPlay", &listener)
            .unwrap();

        assert_eq!(client.dispatcher().listener_count("Player.OnPlay"), 0);
        assert_eq!(client.dispatcher().listener_count("Player.OnStop"), 1);
        assert!(matches!(
            client.on("", &listener),
            Err(Error::InvalidArgument(_))
        ));
    }
}
