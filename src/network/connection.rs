use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, FixedBackoff};
use crate::core::{ConnectionConfig, DeviceAlert, Error, Result};
use crate::protocol::{decode_frame, ConnectionState, FrameCodec, LinkEvent, RawFrame};

/// Idle time before TCP keepalive probes start
const KEEPALIVE_IDLE: Duration = Duration::from_secs(15);

type AlertHandler = Arc<dyn Fn(DeviceAlert) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Handlers notified by a [`DeviceLink`]. Handlers left unset do nothing.
#[derive(Clone)]
pub struct Callbacks {
    on_alert: AlertHandler,
    on_status_change: StatusHandler,
    on_error: ErrorHandler,
}

impl Default for Callbacks {
    fn default() -> Self {
        Callbacks {
            on_alert: Arc::new(|_: DeviceAlert| {}),
            on_status_change: Arc::new(|_: ConnectionState| {}),
            on_error: Arc::new(|_: &Error| {}),
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

impl Callbacks {
    /// Creates a set of no-op handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with every alert decoded from the device
    pub fn on_alert(mut self, handler: impl Fn(DeviceAlert) + Send + Sync + 'static) -> Self {
        self.on_alert = Arc::new(handler);
        self
    }

    /// Called on every connection state transition
    pub fn on_status_change(
        mut self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        self.on_status_change = Arc::new(handler);
        self
    }

    /// Called with transport failures and undecodable frames
    pub fn on_error(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }
}

/// Background task owning the transport and the reconnection timer
struct Driver {
    task: JoinHandle<()>,
    /// Cuts a pending reconnection delay short
    wake: Arc<Notify>,
}

/// A handler call queued under the lock, run after it is released
enum Emit {
    Status(StatusHandler, ConnectionState),
    Alert(AlertHandler, DeviceAlert),
    Failure(ErrorHandler, Error),
}

impl Emit {
    fn run(self) {
        match self {
            Emit::Status(handler, state) => handler(state),
            Emit::Alert(handler, alert) => handler(alert),
            Emit::Failure(handler, err) => handler(&err),
        }
    }
}

/// Mutable link state, guarded by a single lock
struct Inner {
    state: ConnectionState,
    /// Bumped by `connect()` and `disconnect()`; events from older drivers are dropped
    generation: u64,
    attempts: u32,
    callbacks: Callbacks,
    outbound: Option<mpsc::Sender<String>>,
    driver: Option<Driver>,
    /// Handler calls in the order their events were applied
    pending: VecDeque<Emit>,
    /// Set while some caller is draining `pending`
    emitting: bool,
}

impl Inner {
    fn push_status(&mut self, state: ConnectionState) {
        let handler = Arc::clone(&self.callbacks.on_status_change);
        self.pending.push_back(Emit::Status(handler, state));
    }
}

/// State shared between the link handle and its driver task
struct Shared {
    config: ConnectionConfig,
    backoff: Box<dyn Backoff>,
    inner: Mutex<Inner>,
}

/// Releases the drain role even if a handler panics
struct DrainGuard<'a>(&'a Shared);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().emitting = false;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // handlers run outside the lock, so a poisoned guard still holds consistent data
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs queued handler calls one at a time, in queue order.
    ///
    /// Only one caller drains at a time. A call made while another caller
    /// drains, including one made from inside a handler, only queues.
    fn flush(&self, mut inner: MutexGuard<'_, Inner>) {
        if inner.emitting || inner.pending.is_empty() {
            return;
        }
        inner.emitting = true;
        drop(inner);

        let guard = DrainGuard(self);
        loop {
            let Some(emit) = self.lock().pending.pop_front() else {
                break;
            };
            emit.run();
        }
        drop(guard);

        // a call may have queued between the last pop and releasing the role
        let inner = self.lock();
        if !inner.pending.is_empty() {
            self.flush(inner);
        }
    }

    /// Applies `event` on behalf of driver `generation`.
    ///
    /// Returns false when that driver has been superseded and must stop.
    fn apply(&self, generation: u64, event: LinkEvent) -> bool {
        self.apply_with(generation, event, |_| {})
    }

    fn apply_with(&self, generation: u64, event: LinkEvent, update: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        update(&mut inner);
        if let Some(next) = inner.state.on_event(event) {
            debug!(state = %next, ?event, "Device link state changed");
            inner.state = next;
            inner.push_status(next);
        }
        self.flush(inner);
        true
    }

    fn record_attempt(&self, generation: u64, attempt: u32) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.attempts = attempt;
        true
    }

    fn deliver_alert(&self, generation: u64, alert: DeviceAlert) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if alert.is_seizure() {
            info!(confidence = alert.confidence, "Seizure alert received");
        }
        let handler = Arc::clone(&inner.callbacks.on_alert);
        inner.pending.push_back(Emit::Alert(handler, alert));
        self.flush(inner);
    }

    fn report_error(&self, generation: u64, err: Error) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if err.is_transport() {
            warn!("Device link error: {}", err);
        } else {
            debug!("Undecodable device frame: {}", err);
        }
        let handler = Arc::clone(&inner.callbacks.on_error);
        inner.pending.push_back(Emit::Failure(handler, err));
        self.flush(inner);
    }

    /// Detaches the current driver after it exhausted its attempts
    fn give_up(&self, generation: u64, err: Error) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.driver = None;
        }
        self.report_error(generation, err);
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        debug!(bytes = text.len(), "Received device frame");
        match decode_frame(text, Utc::now()) {
            Ok(alert) => self.deliver_alert(generation, alert),
            Err(err) => self.report_error(generation, err),
        }
    }
}

/// Client for a single device endpoint.
///
/// Keeps one transport open on a best-effort basis, decodes inbound frames
/// into [`DeviceAlert`]s and reconnects after every close or failure until
/// [`DeviceLink::disconnect`] is called. All methods return without waiting
/// on the network; the transport is driven by a task on the tokio runtime
/// that was current when [`DeviceLink::connect`] was called.
pub struct DeviceLink {
    shared: Arc<Shared>,
}

impl DeviceLink {
    /// Creates a link that reconnects at the configured fixed interval
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        let backoff = FixedBackoff::new(config.reconnect_interval);
        Self::with_backoff(config, backoff)
    }

    /// Creates a link with a custom reconnection strategy
    pub fn with_backoff(config: ConnectionConfig, backoff: impl Backoff) -> Result<Self> {
        config.validate()?;
        let inner = Inner {
            state: ConnectionState::Disconnected,
            generation: 0,
            attempts: 0,
            callbacks: Callbacks::default(),
            outbound: None,
            driver: None,
            pending: VecDeque::new(),
            emitting: false,
        };
        Ok(DeviceLink {
            shared: Arc::new(Shared {
                config,
                backoff: Box::new(backoff),
                inner: Mutex::new(inner),
            }),
        })
    }

    /// Returns the link configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Replaces all registered handlers
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        self.shared.lock().callbacks = callbacks;
    }

    /// Starts connecting to the device.
    ///
    /// Does nothing while connected or while an attempt is in flight. While a
    /// reconnection delay is pending the delay is cut short. Fails only when
    /// called outside a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| Error::invalid_state(format!("no tokio runtime to drive the link: {}", e)))?;

        let mut inner = self.shared.lock();
        if let Some(driver) = &inner.driver {
            if !inner.state.is_active() {
                debug!("Reconnection requested before the delay elapsed");
                // stores no permit, so repeated calls cannot skip a later delay
                driver.wake.notify_waiters();
            }
            return Ok(());
        }
        let Some(next) = inner.state.on_event(LinkEvent::ConnectRequested) else {
            return Ok(());
        };

        inner.generation += 1;
        inner.attempts = 0;
        inner.state = next;
        inner.push_status(next);
        let generation = inner.generation;

        info!(
            host = %self.shared.config.host,
            port = self.shared.config.port,
            offset = self.shared.config.port_offset,
            "Connecting to device"
        );
        self.shared.flush(inner);

        let mut inner = self.shared.lock();
        if inner.generation != generation {
            // disconnected from inside the status handler
            return Ok(());
        }
        let wake = Arc::new(Notify::new());
        let task = handle.spawn(drive(Arc::clone(&self.shared), generation, Arc::clone(&wake)));
        inner.driver = Some(Driver { task, wake });
        Ok(())
    }

    /// Stops the link: cancels any pending reconnection, closes the
    /// transport and reports `disconnected`. Alerts and errors of the old
    /// connection that no handler has seen yet are dropped.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        inner.generation += 1;
        inner.attempts = 0;
        inner.outbound = None;
        // earlier status changes still go out so observers see every transition
        inner.pending.retain(|emit| matches!(emit, Emit::Status(..)));
        if let Some(driver) = inner.driver.take() {
            driver.task.abort();
        }
        if let Some(next) = inner.state.on_event(LinkEvent::DisconnectRequested) {
            info!("Disconnected from device");
            inner.state = next;
            inner.push_status(next);
        }
        self.shared.flush(inner);
    }

    /// Serializes `payload` as JSON and hands it to the open transport.
    ///
    /// Returns false, dropping the payload, when the link is not connected.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let line = match serde_json::to_string(payload).map_err(Error::from) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize outbound message: {}", e);
                return false;
            }
        };

        let inner = self.shared.lock();
        if inner.state != ConnectionState::Connected {
            debug!(state = %inner.state, "Dropping outbound message, link not connected");
            return false;
        }
        match &inner.outbound {
            Some(tx) => match tx.try_send(line) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to queue outbound message: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Current connection state
    pub fn get_connection_status(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Failed attempts since the last successful connection
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        let driver = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.driver.take()
        };
        if let Some(driver) = driver {
            driver.task.abort();
        }
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("config", &self.shared.config)
            .field("state", &self.get_connection_status())
            .finish()
    }
}

/// Opens a single connection to the device and closes it again.
///
/// Returns the address that answered.
pub async fn test_connection(config: &ConnectionConfig) -> Result<SocketAddr> {
    let stream = open(config).await?;
    let peer = stream.peer_addr()?;
    info!(%peer, "Device reachable");
    Ok(peer)
}

async fn open(config: &ConnectionConfig) -> Result<TcpStream> {
    let endpoint = config.endpoint()?;
    let stream = timeout(config.connect_timeout, TcpStream::connect(&endpoint))
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "connecting to {} took longer than {:?}",
                endpoint, config.connect_timeout
            ))
        })?
        .map_err(|e| Error::network(format!("failed to connect to {}: {}", endpoint, e)))?;

    configure_socket(&stream);
    Ok(stream)
}

fn configure_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", e);
    }
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        debug!("Failed to enable TCP keepalive: {}", e);
    }
}

/// Connect, serve, wait, repeat, until superseded or out of attempts
async fn drive(shared: Arc<Shared>, generation: u64, wake: Arc<Notify>) {
    let config = &shared.config;
    let mut attempt: u32 = 0;

    loop {
        // created before any state change this round, so a `connect()` made
        // while the delay below is pending is never missed
        let wakeup = wake.notified();
        tokio::pin!(wakeup);

        match open(config).await {
            Ok(stream) => {
                attempt = 0;
                let closed = serve(&shared, generation, stream).await;
                let clear = |inner: &mut Inner| inner.outbound = None;
                match closed {
                    Ok(()) => {
                        info!("Device closed the connection");
                        if !shared.apply_with(generation, LinkEvent::RemoteClosed, clear) {
                            return;
                        }
                    }
                    Err(err) => {
                        if !shared.apply_with(generation, LinkEvent::TransportFailed, clear) {
                            return;
                        }
                        shared.report_error(generation, err);
                    }
                }
            }
            Err(err) => {
                if !shared.apply(generation, LinkEvent::OpenFailed) {
                    return;
                }
                shared.report_error(generation, err);
            }
        }

        attempt = attempt.saturating_add(1);
        if !shared.record_attempt(generation, attempt) {
            return;
        }
        if let Some(max) = config.max_reconnect_attempts {
            if attempt > max {
                shared.give_up(
                    generation,
                    Error::network(format!("giving up after {} reconnection attempts", max)),
                );
                return;
            }
        }

        let delay = shared.backoff.next_delay(attempt);
        debug!(attempt, ?delay, "Scheduling device reconnection");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = &mut wakeup => {}
        }

        info!(attempt, "Reconnecting to device");
        if !shared.apply(generation, LinkEvent::ReconnectDue) {
            return;
        }
    }
}

/// Runs one open connection until the peer closes it (`Ok`) or it fails
async fn serve(shared: &Shared, generation: u64, stream: TcpStream) -> Result<()> {
    let config = &shared.config;
    let (tx, mut rx) = mpsc::channel::<String>(config.outbound_capacity);
    let opened = shared.apply_with(generation, LinkEvent::Opened, |inner| {
        inner.outbound = Some(tx);
        inner.attempts = 0;
    });
    if !opened {
        return Ok(());
    }
    info!(peer = ?stream.peer_addr().ok(), "Connected to device");

    let mut frames = Framed::new(stream, FrameCodec::new(config.max_frame_length));
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(RawFrame::Text(text))) => shared.handle_frame(generation, &text),
                Some(Ok(RawFrame::Oversized)) => shared.report_error(
                    generation,
                    Error::protocol(format!(
                        "device frame exceeds {} bytes",
                        frames.codec().max_length()
                    )),
                ),
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            },
            Some(line) = rx.recv() => {
                frames.send(line).await?;
            }
        }
    }
}
