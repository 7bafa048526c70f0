//! Connection dispatcher: call correlation and notification fan-out.
//!
//! The dispatcher owns everything tied to one connection: the outbound frame
//! channel, the call counter, the pending-call map, the subscriber registry
//! and the capability table. The transport feeds it lifecycle signals and
//! raw inbound frames; callers get [`PendingCall`] futures back from
//! [`Dispatcher::invoke`].
//!
//! Lock order is `link` before `pending`. Listeners are always invoked with
//! no dispatcher lock held, so a listener may subscribe, unsubscribe or
//! invoke.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::capabilities::{Capabilities, MethodHandle};
use crate::error::{Error, Result};
use crate::protocol::{
    CallId, EVENT_CLOSE, EVENT_ERROR, EVENT_OPEN, INTROSPECT_METHOD, Inbound, RemoteError,
    Request,
};
use crate::registry::{Listener, ListenerRegistry};

/// Outbound half of the connection: one serialized envelope per frame.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// Outcome delivered to a pending call: `Ok(result)` or `Err(remote error value)`.
type Settlement = std::result::Result<Value, Value>;

/// Connection lifecycle as observed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

#[derive(Debug)]
struct Link {
    state: ConnectionState,
    outbound: Option<FrameSender>,
}

/// Deferred outcome of one [`Dispatcher::invoke`].
///
/// Resolves to the remote `result` value, to `Error::Remote` with the remote
/// `error` value, or to `Error::Disconnected` if the connection went away
/// first.
#[derive(Debug)]
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    id: CallId,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingCall {
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|settled| match settled {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(Error::Remote(RemoteError(error))),
            Err(_) => Err(Error::Disconnected),
        })
    }
}

/// Correlates calls with responses and routes notifications to subscribers.
#[derive(Debug)]
pub struct Dispatcher {
    link: Mutex<Link>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<CallId, oneshot::Sender<Settlement>>>,
    listeners: ListenerRegistry,
    capabilities: RwLock<Capabilities>,
    last_error: Mutex<Option<String>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                outbound: None,
            }),
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            listeners: ListenerRegistry::new(),
            capabilities: RwLock::new(Capabilities::default()),
            last_error: Mutex::new(None),
        }
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ----- calls -----

    /// Send `method` with `params` and register a pending call for its response.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the connection is not open; nothing is
    /// sent and no pending record is created.
    pub fn invoke(&self, method: &str, params: Option<Value>) -> Result<PendingCall> {
        let link = lock(&self.link);
        let outbound = match (&link.state, &link.outbound) {
            (ConnectionState::Open, Some(outbound)) => outbound,
            _ => return Err(Error::NotConnected),
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = Request::new(id, method, params).to_frame()?;

        // Registered before sending so a fast response always finds its record.
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if outbound.send(frame).is_err() {
            lock(&self.pending).remove(&id);
            return Err(Error::NotConnected);
        }

        trace!("-> #{} {}", id, method);
        Ok(PendingCall { id, rx })
    }

    /// Drop the pending record for `id` without settling it.
    ///
    /// Returns whether a record was removed.
    pub fn abandon(&self, id: CallId) -> bool {
        lock(&self.pending).remove(&id).is_some()
    }

    /// Await `call`, abandoning it if `timeout` expires first.
    ///
    /// # Errors
    ///
    /// Returns the call's own error, or `Error::Timeout` on expiry.
    pub async fn wait(&self, call: PendingCall, timeout: Option<Duration>) -> Result<Value> {
        let Some(limit) = timeout else {
            return call.await;
        };

        let id = call.id();
        if let Ok(outcome) = tokio::time::timeout(limit, call).await {
            outcome
        } else {
            self.abandon(id);
            Err(Error::Timeout)
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    #[must_use]
    pub fn is_pending(&self, id: CallId) -> bool {
        lock(&self.pending).contains_key(&id)
    }

    // ----- subscriptions -----

    /// Register `listener` for every delivery of `event`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn subscribe(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.listeners.add(event, listener, false)?;
        Ok(self)
    }

    /// Register `listener` for the next delivery of `event` only.
    ///
    /// The listener is called without params. It can be removed beforehand
    /// with [`Dispatcher::unsubscribe`] using the same handle.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn subscribe_once(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.listeners.add(event, listener, true)?;
        Ok(self)
    }

    /// Remove one registration of `listener` under `event`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn unsubscribe(&self, event: &str, listener: &Listener) -> Result<&Self> {
        self.listeners.remove(event, listener)?;
        Ok(self)
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    fn emit(&self, event: &str, params: Option<&Value>) {
        for delivery in self.listeners.take_deliveries(event) {
            delivery.deliver(params);
        }
    }

    // ----- inbound -----

    /// Route one inbound text frame.
    ///
    /// A frame carrying `result` and the id of a pending call settles that
    /// call: as a failure if `error` is also present, otherwise as a success.
    /// Any other frame with a `method` is delivered to that method's
    /// subscribers. Everything else is dropped.
    pub fn handle_frame(&self, frame: &str) {
        let Some(inbound) = Inbound::parse(frame) else {
            warn!("Received invalid JSON frame, dropping: {:.120}", frame);
            return;
        };

        let call_id = inbound.call_id();
        let Inbound {
            id,
            result,
            error,
            method,
            params,
        } = inbound;

        if let (Some(result), Some(id)) = (result, call_id) {
            let waiter = lock(&self.pending).remove(&id);
            if let Some(tx) = waiter {
                trace!("<- #{} settled", id);
                let settlement = match error {
                    Some(error) => Err(error),
                    None => Ok(result),
                };
                // Receiver may have been dropped by the caller; nothing to do then.
                let _ = tx.send(settlement);
                return;
            }
        } else if error.is_some() && id.is_some() {
            debug!("Dropping error response without result field (id {:?})", id);
        }

        if let Some(method) = method {
            trace!("<- notification {}", method);
            self.emit(&method, params.as_ref());
        }
    }

    // ----- lifecycle -----

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Start a new connection attempt.
    ///
    /// Resets the call counter, empties the capability table and fails any
    /// calls still pending from a previous connection.
    pub fn begin_connect(&self) {
        {
            let mut link = lock(&self.link);
            link.state = ConnectionState::Connecting;
            link.outbound = None;
            self.next_id.store(0, Ordering::SeqCst);
        }
        self.fail_pending();
        *write(&self.capabilities) = Capabilities::default();
        debug!("Connecting");
    }

    /// The transport is ready; `outbound` carries frames to the socket.
    pub fn handle_open(&self, outbound: FrameSender) {
        {
            let mut link = lock(&self.link);
            link.state = ConnectionState::Open;
            link.outbound = Some(outbound);
        }
        debug!("Connection open");
        self.emit(EVENT_OPEN, None);
    }

    /// Record a transport error and notify `error` subscribers.
    ///
    /// Does not close the connection or touch pending calls.
    pub fn handle_error(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut link = lock(&self.link);
            if link.state == ConnectionState::Connecting {
                link.state = ConnectionState::Errored;
            }
        }
        warn!("Connection error: {}", message);
        *lock(&self.last_error) = Some(message.clone());
        self.emit(EVENT_ERROR, Some(&json!({ "message": message })));
    }

    /// Stop accepting calls and release the outbound channel so the writer
    /// can close the socket.
    pub fn begin_close(&self) {
        let mut link = lock(&self.link);
        if link.state == ConnectionState::Open {
            link.state = ConnectionState::Closing;
        }
        link.outbound = None;
    }

    /// The transport closed. Clears the connection handle, fails pending
    /// calls with `Error::Disconnected`, then notifies `close` subscribers.
    pub fn handle_close(&self, code: Option<u16>, reason: &str) {
        {
            let mut link = lock(&self.link);
            link.state = ConnectionState::Closed;
            link.outbound = None;
        }
        self.fail_pending();
        debug!("Connection closed (code {:?})", code);
        self.emit(EVENT_CLOSE, Some(&json!({ "code": code, "reason": reason })));
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn fail_pending(&self) {
        let abandoned: Vec<_> = lock(&self.pending).drain().collect();
        if !abandoned.is_empty() {
            debug!("Failing {} pending call(s)", abandoned.len());
        }
        // Dropping the senders resolves each PendingCall to Error::Disconnected.
        drop(abandoned);
    }

    // ----- capability discovery -----

    /// Run introspection and replace the capability table with its listing.
    ///
    /// With a `timeout`, an unanswered introspection call is abandoned once
    /// it expires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Discovery` if the call cannot be made, the server
    /// rejects it, no answer arrives in time, or the listing is malformed.
    /// The connection and other pending calls are unaffected.
    pub async fn discover(self: &Arc<Self>, timeout: Option<Duration>) -> Result<usize> {
        let outcome = match self.invoke(INTROSPECT_METHOD, None) {
            Ok(call) => self.wait(call, timeout).await,
            Err(e) => Err(e),
        };

        let table = outcome
            .and_then(|listing| Capabilities::from_introspection(&listing, &Arc::downgrade(self)))
            .map_err(|e| {
                error!("Error retrieving JSON-RPC definition from Kodi: {}", e);
                match e {
                    Error::Discovery(message) => Error::Discovery(message),
                    other => Error::Discovery(other.to_string()),
                }
            })?;

        let count = table.len();
        *write(&self.capabilities) = table;
        debug!("Discovered {} method(s)", count);
        Ok(count)
    }

    /// Snapshot of the capability table.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        read(&self.capabilities).clone()
    }

    #[must_use]
    pub fn method(&self, namespace: &str, name: &str) -> Option<MethodHandle> {
        read(&self.capabilities).get(namespace, name).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
