//! Connection and protocol engine for one device.
//!
//! A [`DeviceEngine`] owns at most one link session to its device. It
//! connects with bounded retries, pushes every decoded information element
//! into the device's [`PointCache`](crate::cache::PointCache), builds
//! command units for writes and drives periodic interrogation and session
//! recycling through the shared [`Scheduler`].
//!
//! ```text
//!          connect()            session up
//!   Idle ───────────► Connecting ──────────► Connected
//!    ▲                    │                      │ link closed
//!    └── retries spent ───┘                      ▼
//!                       ◄── auto-reconnect ── Disconnected
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::client::{ClientHandle, Connector, Iec104Event};
use crate::config::DeviceEndpoint;
use crate::error::{Iec104Error, Result};
use crate::mapping::validate_ioa;
use crate::parser::parse_asdu;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::types::{Asdu, Cot, Cp56Time2a, DataPoint, Ioa, TypeId, QCC_GENERAL, QOI_STATION};
use crate::value::command_element;

/// Broadcast common address; accepted from any device.
const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// Connection state of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected and not trying
    Idle,
    /// A connect call is in progress
    Connecting,
    /// Session established
    Connected,
    /// Session lost; a reconnect may be scheduled
    Disconnected,
}

impl ConnectionState {
    /// Lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications raised by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Connection state changed
    StateChanged {
        /// Device key
        device: String,
        /// New state
        state: ConnectionState,
    },
    /// A point was decoded and cached
    DataChanged {
        /// Device key
        device: String,
        /// The decoded point
        point: DataPoint,
    },
    /// The device confirmed, terminated or rejected a command
    CommandConfirmed {
        /// Device key
        device: String,
        /// Command type
        type_id: TypeId,
        /// Object address of the command
        ioa: Option<u32>,
        /// Cause carried by the reply
        cot: Cot,
        /// False for negative confirmations and rejections
        positive: bool,
    },
    /// An interrogation finished (ACT_TERM)
    InterrogationComplete {
        /// Device key
        device: String,
        /// `C_IC_NA_1` or `C_CI_NA_1`
        type_id: TypeId,
    },
    /// One element of a unit could not be decoded or stored
    ElementError {
        /// Device key
        device: String,
        /// Type of the unit
        type_id: TypeId,
        /// Address of the element, if known
        ioa: Option<u32>,
        /// Error code
        code: u16,
        /// Error message
        message: String,
    },
}

/// Shared collaborators of all engines of one driver.
#[derive(Clone)]
pub struct EngineContext {
    /// Opens link sessions
    pub connector: Arc<dyn Connector>,
    /// Point caches by device key
    pub caches: Arc<CacheManager>,
    /// Background task scheduler
    pub scheduler: Scheduler,
    /// Event sink, if anyone listens
    pub events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("caches", &self.caches.len())
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

struct ActiveSession {
    handle: ClientHandle,
    dispatch: JoinHandle<()>,
    connected_at: Instant,
}

struct LinkState {
    state: ConnectionState,
    session: Option<ActiveSession>,
    generation: u64,
    /// Set by `disconnect` while a connect sequence runs
    stop_requested: bool,
}

struct Inner {
    key: String,
    endpoint: DeviceEndpoint,
    ctx: EngineContext,
    link: Mutex<LinkState>,
    last_frame: Mutex<Instant>,
    disposed: AtomicBool,
    connect_attempts: AtomicU64,
    tasks: Mutex<Vec<ScheduledTask>>,
}

/// Connection/protocol engine of one device.
#[derive(Clone)]
pub struct DeviceEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DeviceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEngine")
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceEngine {
    /// Create an idle engine. Nothing runs until [`connect`](Self::connect)
    /// or [`start`](Self::start).
    pub fn new(key: impl Into<String>, endpoint: DeviceEndpoint, ctx: EngineContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                key: key.into(),
                endpoint,
                ctx,
                link: Mutex::new(LinkState {
                    state: ConnectionState::Idle,
                    session: None,
                    generation: 0,
                    stop_requested: false,
                }),
                last_frame: Mutex::new(Instant::now()),
                disposed: AtomicBool::new(false),
                connect_attempts: AtomicU64::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Device key.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Endpoint configuration.
    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.inner.endpoint
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Whether a session is up.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Transport open attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::Relaxed)
    }

    /// Whether [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.inner.ctx.events {
            let _ = events.send(event);
        }
    }

    fn set_state(&self, link: &mut LinkState, state: ConnectionState) {
        if link.state != state {
            debug!(device = %self.inner.key, from = %link.state, to = %state, "State change");
            link.state = state;
            self.emit(EngineEvent::StateChanged {
                device: self.inner.key.clone(),
                state,
            });
        }
    }

    /// Why a running connect sequence must stop, if it must.
    fn interrupted(&self) -> Option<Iec104Error> {
        if self.is_disposed() {
            return Some(Iec104Error::Disposed);
        }
        self.inner
            .link
            .lock()
            .stop_requested
            .then_some(Iec104Error::ConnectCancelled)
    }

    fn connected_handle(&self) -> Option<ClientHandle> {
        let link = self.inner.link.lock();
        match (&link.state, &link.session) {
            (ConnectionState::Connected, Some(session)) => Some(session.handle.clone()),
            _ => None,
        }
    }

    // ==================== Connection ====================

    /// Connect to the device.
    ///
    /// Returns immediately when already connected, and fails with
    /// [`Iec104Error::AlreadyConnecting`] while another call is in flight.
    /// Otherwise tries up to `connect_retries` times with `retry_delay`
    /// between attempts; if every attempt fails the engine is left `Idle`
    /// and the last error is returned. A [`disconnect`](Self::disconnect)
    /// or [`dispose`](Self::dispose) during the sequence ends it with
    /// [`Iec104Error::ConnectCancelled`] or [`Iec104Error::Disposed`].
    pub async fn connect(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Iec104Error::Disposed);
        }
        {
            let mut link = self.inner.link.lock();
            match link.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(Iec104Error::AlreadyConnecting),
                ConnectionState::Idle | ConnectionState::Disconnected => {
                    link.stop_requested = false;
                    self.set_state(&mut link, ConnectionState::Connecting);
                }
            }
        }

        let policy = &self.inner.endpoint.reconnect;
        let attempts = policy.connect_retries.max(1);
        let mut last_error = Iec104Error::ConnectionFailed(self.inner.endpoint.address());

        for attempt in 1..=attempts {
            if let Some(e) = self.interrupted() {
                self.set_state(&mut self.inner.link.lock(), ConnectionState::Idle);
                return Err(e);
            }

            match self.open_session().await {
                Ok(()) => {
                    info!(
                        device = %self.inner.key,
                        address = %self.inner.endpoint.address(),
                        attempt,
                        "Connected"
                    );
                    self.after_connect().await;
                    return Ok(());
                }
                Err(e @ (Iec104Error::Disposed | Iec104Error::ConnectCancelled)) => {
                    info!(device = %self.inner.key, error = %e, "Connect stopped");
                    self.set_state(&mut self.inner.link.lock(), ConnectionState::Idle);
                    return Err(e);
                }
                Err(e) => {
                    warn!(device = %self.inner.key, attempt, attempts, error = %e, "Connection attempt failed");
                    last_error = e;
                    if attempt < attempts {
                        sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        error!(device = %self.inner.key, attempts, error = %last_error, "Giving up connecting");
        self.set_state(&mut self.inner.link.lock(), ConnectionState::Idle);
        Err(last_error)
    }

    async fn open_session(&self) -> Result<()> {
        self.inner.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let crate::client::Link { handle, events } = self
            .inner
            .ctx
            .connector
            .open(&self.inner.endpoint.client_config())
            .await?;
        let closer = handle.clone();

        let refused = {
            let mut link = self.inner.link.lock();
            if self.is_disposed() {
                Some(Iec104Error::Disposed)
            } else if link.stop_requested {
                Some(Iec104Error::ConnectCancelled)
            } else {
                link.generation += 1;
                let dispatch = tokio::spawn(dispatch(self.clone(), events, link.generation));
                link.session = Some(ActiveSession {
                    handle,
                    dispatch,
                    connected_at: Instant::now(),
                });
                *self.inner.last_frame.lock() = Instant::now();
                self.set_state(&mut link, ConnectionState::Connected);
                None
            }
        };
        match refused {
            Some(e) => {
                closer.close().await;
                Err(e)
            }
            None => Ok(()),
        }
    }

    async fn after_connect(&self) {
        let policy = &self.inner.endpoint.interrogation;
        if !policy.auto_interrogation {
            return;
        }
        sleep(policy.settle_delay).await;
        if let Err(e) = self.general_interrogation().await {
            warn!(device = %self.inner.key, error = %e, "Initial interrogation failed");
        }
    }

    /// Close the session, if any, and go `Idle`. No reconnect follows.
    ///
    /// A connect sequence in flight is told to stop: it goes `Idle` at its
    /// next step and closes any session it opened meanwhile.
    pub async fn disconnect(&self) {
        let session = {
            let mut link = self.inner.link.lock();
            let session = link.session.take();
            if link.state == ConnectionState::Connecting {
                link.stop_requested = true;
            } else {
                self.set_state(&mut link, ConnectionState::Idle);
            }
            session
        };
        if let Some(session) = session {
            session.dispatch.abort();
            session.handle.close().await;
            info!(device = %self.inner.key, "Disconnected");
        }
    }

    fn on_closed(&self, generation: u64, reason: &str) {
        {
            let mut link = self.inner.link.lock();
            if link.generation != generation || link.session.is_none() {
                return;
            }
            link.session = None;
            self.set_state(&mut link, ConnectionState::Disconnected);
        }
        warn!(device = %self.inner.key, reason, "Link closed");

        if self.inner.endpoint.reconnect.auto_reconnect && !self.is_disposed() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&self) {
        let delay = self.inner.endpoint.reconnect.reconnect_interval;
        debug!(device = %self.inner.key, ?delay, "Reconnect scheduled");
        let weak = self.downgrade();
        self.inner
            .ctx
            .scheduler
            .after(delay, async move {
                if let Some(engine) = DeviceEngine::from_weak(&weak) {
                    engine.reconnect().await;
                }
            })
            .detach();
    }

    async fn reconnect(&self) {
        if self.is_disposed() || self.state() == ConnectionState::Connected {
            return;
        }
        match self.connect().await {
            Ok(()) => {}
            Err(e) => self.connect_failed_unattended(&e),
        }
    }

    /// After a background connect failed, go `Disconnected` and schedule
    /// the next attempt. Cancellation and disposal end the retries.
    fn connect_failed_unattended(&self, error: &Iec104Error) {
        if matches!(
            error,
            Iec104Error::AlreadyConnecting | Iec104Error::ConnectCancelled | Iec104Error::Disposed
        ) {
            return;
        }
        warn!(device = %self.inner.key, error = %error, "Reconnect failed");
        if !self.inner.endpoint.reconnect.auto_reconnect || self.is_disposed() {
            return;
        }
        {
            let mut link = self.inner.link.lock();
            if link.state != ConnectionState::Idle {
                return;
            }
            self.set_state(&mut link, ConnectionState::Disconnected);
        }
        self.schedule_reconnect();
    }

    /// Recycle the session when it outlived the configured lifetime or has
    /// been silent longer than the idle timeout.
    ///
    /// Returns whether the session was recycled. The new connection is only
    /// made when auto-reconnect is enabled; if it fails the engine goes
    /// `Disconnected` and a reconnect is scheduled.
    pub async fn check_lifetime(&self) -> Result<bool> {
        let connected_at = {
            let link = self.inner.link.lock();
            match (&link.state, &link.session) {
                (ConnectionState::Connected, Some(session)) => session.connected_at,
                _ => return Ok(false),
            }
        };
        let policy = &self.inner.endpoint.reconnect;
        let aged = policy.lifetime.is_some_and(|lifetime| connected_at.elapsed() >= lifetime);
        let silent = policy
            .idle_timeout
            .is_some_and(|idle| self.inner.last_frame.lock().elapsed() >= idle);
        if !aged && !silent {
            return Ok(false);
        }

        let reason = if aged { "lifetime" } else { "idle" };
        info!(device = %self.inner.key, reason, "Recycling session");
        self.disconnect().await;
        if policy.auto_reconnect {
            if let Err(e) = self.connect().await {
                self.connect_failed_unattended(&e);
                return Err(e);
            }
        }
        Ok(true)
    }

    // ==================== Commands ====================

    /// Send a general interrogation (QOI 20). Does nothing when not connected.
    pub async fn general_interrogation(&self) -> Result<()> {
        let asdu = Asdu::interrogation(self.inner.endpoint.common_address, QOI_STATION);
        self.send_system(asdu, "general interrogation").await
    }

    /// Send a counter interrogation (QCC 5). Does nothing when not connected.
    pub async fn counter_interrogation(&self) -> Result<()> {
        let asdu = Asdu::counter_interrogation(self.inner.endpoint.common_address, QCC_GENERAL);
        self.send_system(asdu, "counter interrogation").await
    }

    /// Synchronise the device clock to the current UTC time.
    pub async fn clock_sync(&self) -> Result<()> {
        let asdu = Asdu::clock_sync(self.inner.endpoint.common_address, Cp56Time2a::now());
        self.send_system(asdu, "clock synchronisation").await
    }

    async fn send_system(&self, asdu: Asdu, what: &str) -> Result<()> {
        let Some(handle) = self.connected_handle() else {
            debug!(device = %self.inner.key, what, "Not connected, skipped");
            return Ok(());
        };
        handle
            .send_asdu(asdu)
            .await
            .map_err(|e| Iec104Error::protocol(format!("{what} failed: {e}")))?;
        debug!(device = %self.inner.key, what, "Sent");
        Ok(())
    }

    /// Write `value` to the object at `ioa` with a command of `type_id`.
    ///
    /// Monitoring types are read-only and non-command types are
    /// unsupported; both fail without retry, as do values the command
    /// cannot encode. Transport failures are retried `write_retries` times.
    pub async fn write(
        &self,
        ioa: u32,
        type_id: TypeId,
        value: &str,
        qualifier: u8,
        select: bool,
    ) -> Result<()> {
        validate_ioa(ioa)?;
        if type_id.is_monitoring() {
            return Err(Iec104Error::ReadOnly(format!("{type_id} at IOA {ioa}")));
        }
        let element = command_element(type_id, value, qualifier, select)?;
        let asdu = Asdu::activation(
            type_id,
            self.inner.endpoint.common_address,
            Ioa::new(ioa),
            &element,
        );

        let policy = &self.inner.endpoint.reconnect;
        let attempts = policy.write_retries.max(1);
        let mut last_error = Iec104Error::NotConnected;
        for attempt in 1..=attempts {
            if self.is_disposed() {
                return Err(Iec104Error::Disposed);
            }
            let sent = match self.connected_handle() {
                Some(handle) => handle.send_asdu(asdu.clone()).await,
                None => Err(Iec104Error::NotConnected),
            };
            match sent {
                Ok(()) => {
                    info!(device = %self.inner.key, ioa, type_id = %type_id, value, "Command sent");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(device = %self.inner.key, ioa, attempt, attempts, error = %e, "Write attempt failed");
                    last_error = e;
                    if attempt < attempts {
                        sleep(policy.write_retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    // ==================== Inbound ====================

    fn handle_asdu(&self, asdu: Asdu) {
        *self.inner.last_frame.lock() = Instant::now();
        let header = asdu.header;
        let device = &self.inner.key;

        let expected = self.inner.endpoint.common_address;
        if header.common_address != expected && header.common_address != BROADCAST_ADDRESS {
            let e = Iec104Error::CommonAddressMismatch {
                expected,
                actual: header.common_address,
            };
            warn!(device = %device, error = %e, "Unit ignored");
            return;
        }

        if header.type_id.is_control() {
            self.handle_confirmation(&asdu);
            return;
        }
        if header.type_id == TypeId::EndOfInit {
            info!(device = %device, "Device reports end of initialisation");
            return;
        }

        let parsed = parse_asdu(&asdu);
        let rejected = self
            .inner
            .ctx
            .caches
            .update_batch(device, parsed.points.iter().cloned());

        for point in parsed.points {
            if rejected.iter().any(|(ioa, _)| *ioa == point.ioa) {
                continue;
            }
            self.emit(EngineEvent::DataChanged {
                device: device.clone(),
                point,
            });
        }
        let failures = parsed
            .failures
            .into_iter()
            .map(|f| (f.ioa, f.error))
            .chain(rejected.into_iter().map(|(ioa, e)| (Some(ioa), e)));
        for (ioa, e) in failures {
            warn!(device = %device, type_id = %header.type_id, ?ioa, error = %e, "Element dropped");
            self.emit(EngineEvent::ElementError {
                device: device.clone(),
                type_id: header.type_id,
                ioa,
                code: e.code(),
                message: e.to_string(),
            });
        }
    }

    fn handle_confirmation(&self, asdu: &Asdu) {
        let header = asdu.header;
        let device = &self.inner.key;
        let interrogation = matches!(
            header.type_id,
            TypeId::InterrogationCommand | TypeId::CounterInterrogation
        );

        if interrogation && header.cot == Cot::ActivationTermination {
            info!(device = %device, type_id = %header.type_id, "Interrogation complete");
            self.emit(EngineEvent::InterrogationComplete {
                device: device.clone(),
                type_id: header.type_id,
            });
            return;
        }

        if !header.cot.is_confirmation() && !header.cot.is_rejection() {
            debug!(device = %device, type_id = %header.type_id, cot = %header.cot, "Unexpected control unit");
            return;
        }
        let positive = !header.negative && !header.cot.is_rejection();
        let ioa = Ioa::from_bytes(&asdu.body).ok().map(|ioa| ioa.value());
        if positive {
            debug!(device = %device, type_id = %header.type_id, ?ioa, cot = %header.cot, "Command confirmed");
        } else {
            warn!(device = %device, type_id = %header.type_id, ?ioa, cot = %header.cot, "Command rejected");
        }
        self.emit(EngineEvent::CommandConfirmed {
            device: device.clone(),
            type_id: header.type_id,
            ioa,
            cot: header.cot,
            positive,
        });
    }

    // ==================== Lifecycle ====================

    /// Register the periodic interrogation and session-recycling tasks.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() || self.is_disposed() {
            return;
        }
        let scheduler = &self.inner.ctx.scheduler;
        let interrogation = &self.inner.endpoint.interrogation;

        if interrogation.auto_interrogation {
            let weak = self.downgrade();
            tasks.push(scheduler.every("interrogation", interrogation.interval, move || {
                let engine = DeviceEngine::from_weak(&weak);
                async move {
                    if let Some(engine) = engine {
                        if let Err(e) = engine.general_interrogation().await {
                            warn!(device = %engine.key(), error = %e, "Periodic interrogation failed");
                        }
                    }
                }
            }));
        }

        let reconnect = &self.inner.endpoint.reconnect;
        let check_period = [reconnect.lifetime, reconnect.idle_timeout]
            .into_iter()
            .flatten()
            .min()
            .map(|shortest| (shortest / 4).max(std::time::Duration::from_secs(1)));
        if let Some(period) = check_period {
            let weak = self.downgrade();
            tasks.push(scheduler.every("lifetime", period, move || {
                let engine = DeviceEngine::from_weak(&weak);
                async move {
                    if let Some(engine) = engine {
                        if let Err(e) = engine.check_lifetime().await {
                            warn!(device = %engine.key(), error = %e, "Session recycle failed");
                        }
                    }
                }
            }));
        }
    }

    /// Stop background tasks, close the session and drop the device cache.
    ///
    /// Retry loops in flight notice and return [`Iec104Error::Disposed`].
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.tasks.lock().clear();
        self.disconnect().await;
        self.inner.ctx.caches.remove_device(&self.inner.key);
        info!(device = %self.inner.key, "Engine disposed");
    }
}

async fn dispatch(engine: DeviceEngine, mut events: mpsc::Receiver<Iec104Event>, generation: u64) {
    while let Some(event) = events.recv().await {
        match event {
            Iec104Event::Asdu(asdu) => engine.handle_asdu(asdu),
            Iec104Event::Closed { reason } => {
                engine.on_closed(generation, &reason);
                return;
            }
        }
    }
    engine.on_closed(generation, "event stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManagerConfig;
    use crate::client::{ClientConfig, Link as ClientLink, LinkRequest};
    use crate::types::{AsduHeader, DataValue, Vsq};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    /// Connector whose sessions are served in-process.
    struct Loopback {
        peers: mpsc::UnboundedSender<(mpsc::Receiver<LinkRequest>, mpsc::Sender<Iec104Event>)>,
    }

    #[async_trait]
    impl Connector for Loopback {
        async fn open(&self, config: &ClientConfig) -> Result<ClientLink> {
            let (handle, requests) = ClientHandle::channel(config.request_timeout);
            let (events_tx, events) = mpsc::channel(16);
            self.peers
                .send((requests, events_tx))
                .map_err(|_| Iec104Error::ConnectionRefused(config.address.clone()))?;
            Ok(ClientLink { handle, events })
        }
    }

    type Peers = mpsc::UnboundedReceiver<(mpsc::Receiver<LinkRequest>, mpsc::Sender<Iec104Event>)>;

    fn engine(endpoint: DeviceEndpoint) -> (DeviceEngine, Peers, mpsc::UnboundedReceiver<EngineEvent>) {
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let ctx = EngineContext {
            connector: Arc::new(Loopback { peers: peers_tx }),
            caches: Arc::new(CacheManager::new(CacheManagerConfig::default())),
            scheduler: Scheduler::new(),
            events: Some(events_tx),
        };
        (DeviceEngine::new("dev", endpoint, ctx), peers, events)
    }

    fn quiet_endpoint() -> DeviceEndpoint {
        let mut endpoint = DeviceEndpoint::new("127.0.0.1", 2404, 1, Duration::from_secs(1));
        endpoint.interrogation.auto_interrogation = false;
        endpoint
    }

    fn spontaneous(type_id: TypeId, count: u8, body: &[u8]) -> Asdu {
        let mut header = AsduHeader::new(type_id, Cot::Spontaneous, 1);
        header.vsq = Vsq::new(count, false);
        Asdu::new(header, Bytes::copy_from_slice(body))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    // ==================== Inbound ====================

    #[tokio::test]
    async fn test_inbound_unit_updates_cache() {
        let (engine, mut peers, mut events) = engine(quiet_endpoint());
        engine.connect().await.unwrap();
        let (_requests, peer) = peers.recv().await.unwrap();

        peer.send(Iec104Event::Asdu(spontaneous(TypeId::SinglePoint, 1, &[0x0A, 0x00, 0x00, 0x01])))
            .await
            .unwrap();
        settle().await;

        let cache = engine.inner.ctx.caches.cache_for("dev");
        assert_eq!(cache.get(10).unwrap().value, DataValue::Single(true));

        let mut changed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::DataChanged { point, .. } = event {
                changed.push(point.ioa);
            }
        }
        assert_eq!(changed, [10]);
    }

    #[tokio::test]
    async fn test_foreign_common_address_ignored() {
        let (engine, mut peers, _events) = engine(quiet_endpoint());
        engine.connect().await.unwrap();
        let (_requests, peer) = peers.recv().await.unwrap();

        let mut asdu = spontaneous(TypeId::SinglePoint, 1, &[0x0A, 0x00, 0x00, 0x01]);
        asdu.header.common_address = 7;
        peer.send(Iec104Event::Asdu(asdu)).await.unwrap();
        settle().await;

        assert!(engine.inner.ctx.caches.cache_for("dev").is_empty());
    }

    #[tokio::test]
    async fn test_interrogation_termination_event() {
        let (engine, mut peers, mut events) = engine(quiet_endpoint());
        engine.connect().await.unwrap();
        let (_requests, peer) = peers.recv().await.unwrap();

        let mut asdu = Asdu::interrogation(1, QOI_STATION);
        asdu.header.cot = Cot::ActivationTermination;
        peer.send(Iec104Event::Asdu(asdu)).await.unwrap();
        settle().await;

        let complete = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, EngineEvent::InterrogationComplete { type_id: TypeId::InterrogationCommand, .. }));
        assert!(complete);
    }

    // ==================== Link loss ====================

    #[tokio::test(start_paused = true)]
    async fn test_closed_link_reconnects_after_interval() {
        let mut endpoint = quiet_endpoint();
        endpoint.reconnect.reconnect_interval = Duration::from_secs(5);
        let (engine, mut peers, _events) = engine(endpoint);
        engine.connect().await.unwrap();
        let (_requests, peer) = peers.recv().await.unwrap();

        peer.send(Iec104Event::Closed { reason: "peer reset".into() }).await.unwrap();
        settle().await;
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert_eq!(engine.connect_attempts(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(engine.state(), ConnectionState::Connected);
        assert_eq!(engine.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_does_not_reconnect() {
        let (engine, mut peers, _events) = engine(quiet_endpoint());
        engine.connect().await.unwrap();
        let (mut requests, _peer) = peers.recv().await.unwrap();

        engine.disconnect().await;
        assert_eq!(engine.state(), ConnectionState::Idle);
        assert!(matches!(requests.recv().await, Some(LinkRequest::Close)));
    }

    // ==================== Lifetime ====================

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_recycles_session() {
        let mut endpoint = quiet_endpoint();
        endpoint.reconnect.lifetime = Some(Duration::from_secs(60));
        let (engine, mut peers, _events) = engine(endpoint);
        engine.connect().await.unwrap();
        let _first = peers.recv().await.unwrap();

        assert!(!engine.check_lifetime().await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(engine.check_lifetime().await.unwrap());
        assert!(engine.is_connected());
        assert_eq!(engine.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_recycled_without_reconnect() {
        let mut endpoint = quiet_endpoint();
        endpoint.reconnect.idle_timeout = Some(Duration::from_secs(30));
        endpoint.reconnect.auto_reconnect = false;
        let (engine, mut peers, _events) = engine(endpoint);
        engine.connect().await.unwrap();
        let _first = peers.recv().await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(engine.check_lifetime().await.unwrap());
        assert_eq!(engine.state(), ConnectionState::Idle);
    }

    // ==================== Dispose ====================

    #[tokio::test]
    async fn test_dispose_blocks_further_use() {
        let (engine, _peers, _events) = engine(quiet_endpoint());
        engine.dispose().await;
        assert!(matches!(engine.connect().await, Err(Iec104Error::Disposed)));
        assert!(matches!(
            engine.write(1, TypeId::SingleCommand, "1", 0, false).await,
            Err(Iec104Error::Disposed)
        ));
    }
}
