//! Connection lifecycle for the broker client
//!
//! The [`ConnectionManager`] owns the transport session, drives the
//! `Disconnected -> Connecting -> Ready -> Reconnecting` state machine, and
//! exposes the ready gate every publish and consume goes through.
//!
//! Faults arrive asynchronously on a per-session fault channel. A fault on the
//! current session drops it and arms a single fixed-delay retry timer; retries
//! continue until a connect succeeds or [`ConnectionManager::disconnect`]
//! cancels the timer.

use super::connection::{AmqpError, BrokerEndpoint, ConnectionState, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor};
use super::topology::{BoundTopology, TopologyBinder};
use crate::config::BrokerSection;
use crate::transport::{BrokerConnector, BrokerFault, BrokerSession, FaultReceiver};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A live session together with the topology declared on it
pub struct Link {
    /// Increases with every successful connect
    pub generation: u64,
    pub session: Arc<dyn BrokerSession>,
    pub topology: BoundTopology,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("generation", &self.generation)
            .field("topology", &self.topology)
            .field("open", &self.session.is_open())
            .finish()
    }
}

/// Who asked for a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOrigin {
    Caller,
    Timer,
}

#[derive(Debug, Default)]
struct ConnectionStats {
    connect_time: Option<Instant>,
    connected_once: bool,
    reconnect_count: u32,
    last_fault: Option<String>,
}

struct ManagerInner {
    connector: Arc<dyn BrokerConnector>,
    endpoint: BrokerEndpoint,
    reconnect_config: ReconnectConfig,
    state_tx: watch::Sender<ConnectionState>,
    link: RwLock<Option<Arc<Link>>>,
    /// Serializes connect, fault handling and disconnect
    connect_lock: tokio::sync::Mutex<()>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    fault_watcher: Mutex<Option<JoinHandle<()>>>,
    /// Set by disconnect; suppresses timer-driven reconnects
    closed: AtomicBool,
    generation: AtomicU64,
    attempts: AtomicU32,
    stats: Mutex<ConnectionStats>,
}

/// Owns the broker session and its reconnection policy
///
/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        endpoint: BrokerEndpoint,
        reconnect_config: ReconnectConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ManagerInner {
                connector,
                endpoint,
                reconnect_config,
                state_tx,
                link: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                reconnect_timer: Mutex::new(None),
                fault_watcher: Mutex::new(None),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                stats: Mutex::new(ConnectionStats::default()),
            }),
        }
    }

    pub fn from_config(connector: Arc<dyn BrokerConnector>, section: &BrokerSection) -> Self {
        Self::new(
            connector,
            BrokerEndpoint::from_section(section),
            ReconnectConfig::from_section(section),
        )
    }

    /// Establish transport, channel and topology
    ///
    /// No-op when already ready. On failure the error is returned and a retry
    /// is scheduled after the fixed reconnect delay.
    pub async fn connect(&self) -> Result<(), AmqpError> {
        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.connect_with(ConnectOrigin::Caller).await
    }

    /// Cancel any pending reconnect and close the session
    pub async fn disconnect(&self) -> Result<(), AmqpError> {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.cancel_reconnect_timer();
        inner.abort_fault_watcher();

        // Let an in-flight connect settle before tearing down what it built
        let _guard = inner.connect_lock.lock().await;
        inner.cancel_reconnect_timer();
        inner.abort_fault_watcher();

        let link = inner.link.write().take();
        // A session whose channel alone failed still holds an open connection
        let result = match link {
            Some(link) => link.session.close().await,
            None => Ok(()),
        };

        inner.apply(ConnectionEvent::ClientDisconnected);
        match &result {
            Ok(()) => info!("Disconnected from broker"),
            Err(e) => warn!("Broker session did not close cleanly: {}", e),
        }
        result
    }

    /// Ready gate: the current link, connecting first if necessary
    ///
    /// Waits for an in-flight connect to settle. If the manager is still not
    /// ready afterwards, one connect attempt is made before giving up.
    pub async fn ready_link(&self) -> Result<Arc<Link>, AmqpError> {
        let mut state_rx = self.inner.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| !HealthMonitor::is_settling(state))
            .await;

        if let Some(link) = self.inner.current_link() {
            return Ok(link);
        }

        debug!("Connection not ready, attempting reconnect before proceeding");
        self.connect().await?;

        self.inner
            .current_link()
            .ok_or_else(|| AmqpError::NotConnected {
                state: self.state(),
            })
    }

    /// Wait, without triggering a connect, for a link newer than `after_generation`
    ///
    /// Returns `None` only if the manager is being torn down.
    pub async fn next_link(&self, after_generation: u64) -> Option<Arc<Link>> {
        let mut state_rx = self.inner.state_tx.subscribe();
        loop {
            if let Some(link) = self.inner.current_link() {
                if link.generation > after_generation {
                    return Some(link);
                }
            }
            if state_rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Report a fault observed outside the transport (e.g. a consumer stream ending)
    ///
    /// Ignored unless `generation` is the current link.
    pub async fn report_fault(&self, generation: u64, fault: BrokerFault) {
        self.inner.handle_fault(generation, fault).await;
    }

    /// Wait until the manager is ready, up to `timeout`
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut state_rx = self.inner.state_tx.subscribe();
        tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| HealthMonitor::can_use_channel(state)),
        )
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.current_link().is_some()
    }

    /// Broker-assigned name of the private reply queue, while connected
    pub fn private_queue(&self) -> Option<String> {
        self.inner
            .current_link()
            .map(|link| link.topology.private_queue.clone())
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.inner.endpoint
    }

    pub fn health_metrics(&self) -> HealthMetrics {
        let stats = self.inner.stats.lock();
        HealthMonitor::calculate_health_metrics(
            stats.connect_time,
            stats.reconnect_count,
            stats.last_fault.clone(),
            &self.state(),
        )
    }
}

impl ManagerInner {
    fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let current = self.state_tx.borrow().clone();
        let next = HealthMonitor::determine_next_state(&current, &event);
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
        next
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        if !HealthMonitor::can_use_channel(&self.state_tx.borrow()) {
            return None;
        }
        self.link
            .read()
            .as_ref()
            .filter(|link| link.session.is_open())
            .cloned()
    }

    async fn connect_with(self: &Arc<Self>, origin: ConnectOrigin) -> Result<(), AmqpError> {
        let _guard = self.connect_lock.lock().await;

        if origin == ConnectOrigin::Timer && self.closed.load(Ordering::SeqCst) {
            debug!("Skipping scheduled reconnect, client disconnected");
            return Ok(());
        }

        if self.current_link().is_some() {
            debug!("Already connected, skipping connect");
            return Ok(());
        }

        if origin == ConnectOrigin::Caller {
            self.cancel_reconnect_timer();
        }

        self.apply(ConnectionEvent::ConnectStarted);

        match self.establish().await {
            Ok(link) => {
                {
                    let mut stats = self.stats.lock();
                    if stats.connected_once {
                        stats.reconnect_count += 1;
                    }
                    stats.connected_once = true;
                    stats.connect_time = Some(Instant::now());
                }
                self.attempts.store(0, Ordering::SeqCst);
                info!(
                    generation = link.generation,
                    private_queue = %link.topology.private_queue,
                    "Broker topology ready"
                );
                *self.link.write() = Some(link);
                self.apply(ConnectionEvent::TopologyReady);
                Ok(())
            }
            Err(e) => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let reason = e.to_string();
                error!("Failed to connect to broker: {}", reason);
                self.stats.lock().last_fault = Some(reason.clone());
                self.apply(ConnectionEvent::ConnectFailed { attempt, reason });
                self.schedule_reconnect(attempt);
                Err(e)
            }
        }
    }

    /// Open a session and declare the topology; the half-open session is closed on failure
    async fn establish(self: &Arc<Self>) -> Result<Arc<Link>, AmqpError> {
        let stale = self.link.write().take();
        if let Some(stale) = stale {
            self.abort_fault_watcher();
            if let Err(e) = stale.session.close().await {
                debug!("Closing stale session failed: {}", e);
            }
        }

        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let session = self.connector.open(&self.endpoint, fault_tx).await?;

        let topology = match TopologyBinder::declare(session.as_ref()).await {
            Ok(topology) => topology,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!("Closing half-open session failed: {}", close_err);
                }
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.spawn_fault_watcher(generation, fault_rx);

        Ok(Arc::new(Link {
            generation,
            session,
            topology,
        }))
    }

    fn spawn_fault_watcher(self: &Arc<Self>, generation: u64, mut fault_rx: FaultReceiver) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            if let Some(fault) = fault_rx.recv().await {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_fault(generation, fault).await;
                }
            }
        });

        if let Some(previous) = self.fault_watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn handle_fault(self: &Arc<Self>, generation: u64, fault: BrokerFault) {
        let _guard = self.connect_lock.lock().await;

        let current_generation = self.link.read().as_ref().map(|link| link.generation);
        if current_generation != Some(generation) {
            debug!(generation, "Ignoring fault from stale session: {}", fault);
            return;
        }

        let broken = self.link.write().take();
        if let Some(link) = broken {
            if let Err(e) = link.session.close().await {
                debug!("Closing faulted session failed: {}", e);
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let reason = fault.to_string();
        warn!(generation, "Broker {}", reason);
        self.stats.lock().last_fault = Some(reason.clone());
        self.apply(ConnectionEvent::FaultReported { attempt, reason });
        self.schedule_reconnect(attempt);
    }

    /// Arm the retry timer unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>, attempt: u32) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut timer = self.reconnect_timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Reconnect already scheduled");
            return;
        }

        let delay = self.reconnect_config.delay_for(attempt);
        info!("Attempting reconnection {} after {:?}", attempt, delay);

        let weak: Weak<Self> = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Fired: detach so the connect below can arm the next timer
            inner.reconnect_timer.lock().take();
            if let Err(e) = inner.connect_with(ConnectOrigin::Timer).await {
                debug!("Scheduled reconnect failed: {}", e);
            }
        }));
    }

    fn cancel_reconnect_timer(&self) {
        if let Some(handle) = self.reconnect_timer.lock().take() {
            handle.abort();
            debug!("Pending reconnect cancelled");
        }
    }

    fn abort_fault_watcher(&self) {
        if let Some(handle) = self.fault_watcher.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        // Background tasks only hold weak references; stop them with the manager.
        // The session itself is not closed here, call disconnect() for that.
        if let Some(handle) = self.reconnect_timer.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.fault_watcher.get_mut().take() {
            handle.abort();
        }
    }
}
