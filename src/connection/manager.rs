//! Connection manager owning at most one live real-time link
//!
//! `connect` and `disconnect` return immediately. Each connect cycle gets a
//! generation number and a driver task; the driver's status reports and
//! inbound events only take effect while its generation is still current, so
//! a superseded or cancelled link can never move the status or reach handlers.

use super::handlers::{EventHandlers, Handler};
use super::status::{StatusChange, StatusSubscription};
use crate::config::ManagerConfig;
use crate::transport::{LinkEvent, TransportConnector, TransportLink};
use seller_socket_shared::{
    state_machine::{ConnectionStatus, LifecycleEvent, StatusMachine, TransitionResult},
    DirectMessage, EventFrame, InboundEvent, OutboundCommand, Role, RoleBroadcast, UserId,
};
use std::cell::Cell;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

/// Caller errors. Network conditions never surface here.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Connection manager must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("Credential must not be empty")]
    EmptyToken,

    #[error("Invalid endpoint '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Arguments for [`ConnectionManager::connect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Credential attached to the transport handshake
    pub token: String,
    /// Endpoint for this connection; falls back to the configured default
    pub url: Option<String>,
}

impl ConnectOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// What happened to an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    /// Handed to the live link
    Sent,
    /// Not connected (or the link is saturated); nothing was queued
    Dropped,
}

/// The manager's handle on one link driver
struct LinkHandle {
    generation: u64,
    outbound: mpsc::Sender<EventFrame>,
    close: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct Lifecycle {
    generation: u64,
    machine: StatusMachine,
    link: Option<LinkHandle>,
}

thread_local! {
    /// The `Shared` whose handler is running on this thread, if any
    static DISPATCHING: Cell<*const Shared> = const { Cell::new(ptr::null()) };
}

/// Marks the current thread as running a handler until dropped
struct DispatchScope {
    previous: *const Shared,
}

impl DispatchScope {
    fn enter(shared: &Shared) -> Self {
        let previous = DISPATCHING.with(|current| current.replace(shared));
        Self { previous }
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|current| current.set(self.previous));
    }
}

/// State shared between the manager and its link drivers.
///
/// Lock order is `delivery` before `lifecycle`.
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    /// Held while a handler runs, so teardown waits out an in-flight delivery
    delivery: Mutex<()>,
    changes: broadcast::Sender<StatusChange>,
    latest: watch::Sender<ConnectionStatus>,
    handlers: RwLock<EventHandlers>,
}

impl Shared {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the delivery gate, unless a handler of this manager is already
    /// running on this thread and therefore holds it
    fn delivery(&self) -> Option<MutexGuard<'_, ()>> {
        if DISPATCHING.with(|current| ptr::eq(current.get(), self)) {
            return None;
        }
        Some(self.delivery.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn handlers_mut(&self) -> RwLockWriteGuard<'_, EventHandlers> {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one event through the state machine and publish any change
    fn apply(&self, lifecycle: &mut Lifecycle, event: LifecycleEvent) {
        match lifecycle.machine.process_event(event) {
            TransitionResult::Changed { from, to } => {
                debug!(generation = lifecycle.generation, %from, %to, "Status changed");
                self.latest.send_replace(to);
                // Having no subscribers is fine
                let _ = self.changes.send(StatusChange {
                    generation: lifecycle.generation,
                    from,
                    to,
                });
            }
            TransitionResult::Unchanged(_) => {}
            TransitionResult::Invalid { from, event } => {
                warn!(?event, %from, "Ignoring invalid status transition");
            }
        }
    }

    /// Tear down the current cycle and open a new generation.
    fn retire(&self, lifecycle: &mut Lifecycle) -> Option<JoinHandle<()>> {
        self.apply(lifecycle, LifecycleEvent::DisconnectRequested);
        lifecycle.generation += 1;

        let mut link = lifecycle.link.take()?;
        debug!(generation = link.generation, "Closing link");
        if let Some(close) = link.close.take() {
            // The driver may already have exited on its own
            let _ = close.send(());
        }
        Some(link.task)
    }

    /// Transport notification from the driver of `generation`.
    ///
    /// Returns false when the generation is stale and the report was discarded.
    fn report(&self, generation: u64, event: LifecycleEvent) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation != generation {
            debug!(generation, current = lifecycle.generation, ?event, "Discarding stale transport notification");
            return false;
        }
        if event == LifecycleEvent::LinkLost {
            lifecycle.link = None;
        }
        self.apply(&mut lifecycle, event);
        true
    }

    /// Hand an inbound event to its handler, if `generation` is still current
    fn dispatch(&self, generation: u64, event: InboundEvent) {
        let _gate = self.delivery();
        let current = self.lifecycle().generation;
        if current != generation {
            debug!(generation, current, event = event.event_name(), "Discarding stale inbound event");
            return;
        }

        let name = event.event_name();
        let route = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .route(event);
        match route {
            Some(route) => {
                let _scope = DispatchScope::enter(self);
                route.deliver();
            }
            None => debug!(event = name, "No handler registered"),
        }
    }
}

/// Manages one authenticated real-time connection.
///
/// Handlers run on the link driver task and may call back into the manager,
/// `connect` and `disconnect` included. Events already read from the old link
/// are discarded once a handler disconnects.
pub struct ConnectionManager<C: TransportConnector> {
    config: ManagerConfig,
    connector: Arc<C>,
    runtime: Handle,
    shared: Arc<Shared>,
}

impl<C: TransportConnector> ConnectionManager<C> {
    /// Create a manager. No network activity happens until `connect`.
    pub fn new(config: ManagerConfig, connector: C) -> Result<Self, ManagerError> {
        let runtime = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        let (changes, _) = broadcast::channel(config.status_buffer.max(1));
        let (latest, _) = watch::channel(ConnectionStatus::Disconnected);

        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(Lifecycle {
                generation: 0,
                machine: StatusMachine::new(),
                link: None,
            }),
            delivery: Mutex::new(()),
            changes,
            latest,
            handlers: RwLock::new(EventHandlers::default()),
        });

        Ok(Self {
            config,
            connector: Arc::new(connector),
            runtime,
            shared,
        })
    }

    /// Start a new connection, tearing down any existing one first.
    ///
    /// Returns once the attempt is started; progress is observable through
    /// [`subscribe`](Self::subscribe) and [`status`](Self::status).
    pub fn connect(&self, options: ConnectOptions) -> Result<(), ManagerError> {
        if options.token.is_empty() {
            return Err(ManagerError::EmptyToken);
        }
        let endpoint = self.resolve_endpoint(options.url.as_deref())?;

        let _gate = self.shared.delivery();
        let mut lifecycle = self.shared.lifecycle();

        if self.shared.retire(&mut lifecycle).is_some() {
            debug!("Superseded previous connection");
        }
        let generation = lifecycle.generation;
        self.shared.apply(&mut lifecycle, LifecycleEvent::ConnectRequested);

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let (close_tx, close_rx) = oneshot::channel();

        info!(generation, %endpoint, transport = self.connector.name(), "Connecting");
        let task = self.runtime.spawn(run_link(
            self.connector.clone(),
            self.shared.clone(),
            generation,
            endpoint,
            options.token,
            self.config.connect_timeout,
            outbound_rx,
            close_rx,
        ));

        lifecycle.link = Some(LinkHandle {
            generation,
            outbound: outbound_tx,
            close: Some(close_tx),
            task,
        });
        Ok(())
    }

    /// Close the connection. Status is `Disconnected` when this returns.
    ///
    /// Safe to call in any status; a no-op when already disconnected.
    pub fn disconnect(&self) {
        let _ = self.teardown();
    }

    /// Disconnect and wait for the link to finish closing
    pub async fn shutdown(self) {
        if let Some(task) = self.teardown() {
            if let Err(e) = task.await {
                warn!("Link driver ended abnormally: {}", e);
            }
        }
    }

    fn teardown(&self) -> Option<JoinHandle<()>> {
        let _gate = self.shared.delivery();
        let mut lifecycle = self.shared.lifecycle();

        if lifecycle.link.is_none() && lifecycle.machine.status() == ConnectionStatus::Disconnected {
            return None;
        }
        info!(generation = lifecycle.generation, "Disconnecting");
        self.shared.retire(&mut lifecycle)
    }

    fn resolve_endpoint(&self, url: Option<&str>) -> Result<Url, ManagerError> {
        let raw = url
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.config.default_url);
        Url::parse(raw).map_err(|source| ManagerError::InvalidEndpoint {
            url: raw.to_string(),
            source,
        })
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.latest.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Current connect cycle
    pub fn generation(&self) -> u64 {
        self.shared.lifecycle().generation
    }

    /// Ordered stream of status transitions from now on
    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription::new(self.shared.changes.subscribe())
    }

    /// Latest-value view of the status
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.latest.subscribe()
    }

    /// Send a command over the live link. Dropped unless `Connected`.
    pub fn send(&self, command: &OutboundCommand) -> Delivery {
        let frame = match command.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {}: {}", command.event_name(), e);
                return Delivery::Dropped;
            }
        };

        let lifecycle = self.shared.lifecycle();
        let link = match &lifecycle.link {
            Some(link) if lifecycle.machine.status().is_connected() => link,
            _ => {
                debug!(event = command.event_name(), "Not connected, dropping command");
                return Delivery::Dropped;
            }
        };

        match link.outbound.try_send(frame) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(generation = link.generation, event = command.event_name(), "Outbound buffer full, dropping command");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Dropped,
        }
    }

    /// Send a direct message to one user
    pub fn send_message(&self, to_user_id: impl Into<UserId>, message: impl Into<String>) -> Delivery {
        self.send(&OutboundCommand::direct(to_user_id, message))
    }

    /// Broadcast to every user of `role`
    pub fn send_to_role(&self, role: Role, message: impl Into<String>) -> Delivery {
        self.send(&OutboundCommand::to_role(role, message))
    }

    /// Register the handler for direct messages, replacing any previous one
    pub fn on_direct_message<F>(&self, handler: F)
    where
        F: Fn(DirectMessage) + Send + Sync + 'static,
    {
        let handler: Handler<DirectMessage> = Arc::new(handler);
        self.shared.handlers_mut().set_direct(Some(handler));
    }

    pub fn off_direct_message(&self) {
        self.shared.handlers_mut().set_direct(None);
    }

    /// Register the handler for broadcasts addressed to `role`, replacing any previous one
    pub fn on_role_broadcast<F>(&self, role: Role, handler: F)
    where
        F: Fn(RoleBroadcast) + Send + Sync + 'static,
    {
        let handler: Handler<RoleBroadcast> = Arc::new(handler);
        self.shared.handlers_mut().set_broadcast(role, Some(handler));
    }

    pub fn off_role_broadcast(&self, role: Role) {
        self.shared.handlers_mut().set_broadcast(role, None);
    }

    pub fn on_admin_message<F>(&self, handler: F)
    where
        F: Fn(RoleBroadcast) + Send + Sync + 'static,
    {
        self.on_role_broadcast(Role::Admin, handler);
    }

    pub fn on_customer_message<F>(&self, handler: F)
    where
        F: Fn(RoleBroadcast) + Send + Sync + 'static,
    {
        self.on_role_broadcast(Role::Customer, handler);
    }

    pub fn on_seller_message<F>(&self, handler: F)
    where
        F: Fn(RoleBroadcast) + Send + Sync + 'static,
    {
        self.on_role_broadcast(Role::Seller, handler);
    }

    /// Remove every registered handler
    pub fn clear_handlers(&self) {
        self.shared.handlers_mut().clear();
    }
}

impl<C: TransportConnector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Drive one connect cycle: handshake, then pump frames until closed
#[allow(clippy::too_many_arguments)]
async fn run_link<C: TransportConnector>(
    connector: Arc<C>,
    shared: Arc<Shared>,
    generation: u64,
    endpoint: Url,
    token: String,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::Receiver<EventFrame>,
    mut close_rx: oneshot::Receiver<()>,
) {
    let attempt = timeout(connect_timeout, connector.connect(&endpoint, &token));

    let mut link = tokio::select! {
        biased;

        _ = &mut close_rx => {
            debug!(generation, "Connect attempt cancelled");
            return;
        }

        result = attempt => match result {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(generation, "Connection failed: {:#}", e);
                shared.report(generation, LifecycleEvent::LinkLost);
                return;
            }
            Err(_) => {
                warn!(generation, timeout = ?connect_timeout, "Connection timed out");
                shared.report(generation, LifecycleEvent::LinkLost);
                return;
            }
        }
    };

    if !shared.report(generation, LifecycleEvent::Acknowledged) {
        // Superseded while the handshake was in flight
        close_link(&mut link, generation).await;
        return;
    }
    info!(generation, transport = connector.name(), "Connected");

    loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => {
                // Commands accepted before the disconnect still go out
                while let Ok(frame) = outbound_rx.try_recv() {
                    if let Err(e) = link.send(frame).await {
                        debug!(generation, "Failed to flush outbound frame: {:#}", e);
                        break;
                    }
                }
                close_link(&mut link, generation).await;
                return;
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = link.send(frame).await {
                    warn!(generation, "Send failed: {:#}", e);
                    shared.report(generation, LifecycleEvent::LinkLost);
                    return;
                }
            }

            event = link.next_event() => match event {
                LinkEvent::Frame(frame) => handle_frame(&shared, generation, frame),
                LinkEvent::Closed { reason } => {
                    info!(generation, %reason, "Disconnected");
                    shared.report(generation, LifecycleEvent::LinkLost);
                    return;
                }
            }
        }
    }
}

fn handle_frame(shared: &Shared, generation: u64, frame: EventFrame) {
    match InboundEvent::decode(&frame) {
        Ok(Some(event)) => shared.dispatch(generation, event),
        Ok(None) => debug!(generation, event = %frame.name, "Ignoring unknown event"),
        Err(e) => warn!(generation, "Dropping inbound event: {}", e),
    }
}

async fn close_link<L: TransportLink>(link: &mut L, generation: u64) {
    if let Err(e) = link.close().await {
        debug!(generation, "Error while closing link: {:#}", e);
    }
    info!(generation, "Link closed");
}
