//! Connection supervisor
//!
//! Owns the single runtime client of the process. A background task pings
//! the client on a fixed interval; a failed ping marks the connection
//! `Degraded`, closes the client and, after a backoff, dials a replacement.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connected -(check fails)-> Degraded -(reconnect ok)-> Connected
//! Degraded -(reconnect fails)-> Degraded
//! any -(stop)-> Disconnected (terminal)
//! ```
//!
//! All state lives behind one lock. Network I/O never happens while it is
//! held, so [`ConnectionSupervisor::acquire`] only ever waits for a pointer
//! swap.

use crate::error::{ConnectionError, Result};
use crate::state::{ConnectionHealth, ConnectionState, SupervisorConfig};
use chrono::{DateTime, Utc};
use envsched_runtime::{RuntimeClient, RuntimeConnector, RuntimeError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// A runtime client handed out by the supervisor
///
/// Handles must not be cached across long suspension points: once the
/// supervisor swaps the client, calls through an old handle fail with
/// `RuntimeError::Closed`, and [`ConnectionSupervisor::is_current`] reports
/// `false`.
#[derive(Clone)]
pub struct RuntimeHandle {
    client: Arc<dyn RuntimeClient>,
    generation: u64,
}

impl RuntimeHandle {
    pub fn client(&self) -> &Arc<dyn RuntimeClient> {
        &self.client
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for RuntimeHandle {
    type Target = dyn RuntimeClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Running,
    Stopped,
}

struct Inner {
    lifecycle: Lifecycle,
    state: ConnectionState,
    client: Option<Arc<dyn RuntimeClient>>,
    generation: u64,
    last_healthy_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Keeps one healthy runtime connection alive
pub struct ConnectionSupervisor {
    connector: Arc<dyn RuntimeConnector>,
    config: SupervisorConfig,
    inner: RwLock<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,

    /// Serializes health-check ticks from the loop and `check_now`
    tick_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionSupervisor")
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn RuntimeConnector>, config: SupervisorConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            connector,
            config,
            inner: RwLock::new(Inner {
                lifecycle: Lifecycle::Idle,
                state: ConnectionState::Disconnected,
                client: None,
                generation: 0,
                last_healthy_at: None,
                consecutive_failures: 0,
            }),
            state_tx,
            shutdown_tx,
            task: Mutex::new(None),
            tick_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Establish the first connection and start the health-check loop.
    ///
    /// Fails with [`ConnectionError::Connect`] if the initial dial or ping
    /// does not succeed; the supervisor may then be started again.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.write();
            match inner.lifecycle {
                Lifecycle::Idle => inner.lifecycle = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Running => {
                    return Err(ConnectionError::AlreadyStarted)
                }
                Lifecycle::Stopped => return Err(ConnectionError::Stopped),
            }
            inner.state = ConnectionState::Connecting;
        }
        self.publish(ConnectionState::Connecting);

        let client = match self.dial().await {
            Ok(client) => client,
            Err(e) => {
                {
                    let mut inner = self.inner.write();
                    if inner.lifecycle == Lifecycle::Starting {
                        inner.lifecycle = Lifecycle::Idle;
                        inner.state = ConnectionState::Disconnected;
                    }
                }
                self.publish(ConnectionState::Disconnected);
                error!(error = %e, "Initial runtime connection failed");
                return Err(ConnectionError::Connect(e));
            }
        };

        // Subscribed before going live so a concurrent stop is never missed
        let shutdown_rx = self.shutdown_tx.subscribe();
        if !self.install(client).await {
            return Err(ConnectionError::Stopped);
        }

        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move { supervisor.run(shutdown_rx).await });
        *self.task.lock() = Some(handle);

        info!(
            interval_secs = self.config.health_check_interval_secs,
            "Connection supervisor started"
        );
        Ok(())
    }

    /// Stop the health-check loop and release the client. Idempotent.
    pub async fn stop(&self) {
        let client = {
            let mut inner = self.inner.write();
            if inner.lifecycle == Lifecycle::Stopped {
                return;
            }
            inner.lifecycle = Lifecycle::Stopped;
            inner.state = ConnectionState::Disconnected;
            inner.client.take()
        };

        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Health-check task ended abnormally");
            }
        }

        if let Some(client) = client {
            client.close().await;
        }
        self.publish(ConnectionState::Disconnected);
        info!("Connection supervisor stopped");
    }

    /// Current client, if the connection is healthy.
    pub fn acquire(&self) -> Result<RuntimeHandle> {
        let inner = self.inner.read();
        match (inner.state, &inner.client) {
            (ConnectionState::Connected, Some(client)) => Ok(RuntimeHandle {
                client: Arc::clone(client),
                generation: inner.generation,
            }),
            (state, _) => Err(ConnectionError::NotConnected(state)),
        }
    }

    /// Whether the last health check succeeded.
    pub fn is_healthy(&self) -> bool {
        self.inner.read().state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Whether `handle` still refers to the installed client.
    pub fn is_current(&self, handle: &RuntimeHandle) -> bool {
        let inner = self.inner.read();
        inner.state == ConnectionState::Connected && inner.generation == handle.generation
    }

    pub fn health(&self) -> ConnectionHealth {
        let inner = self.inner.read();
        ConnectionHealth {
            state: inner.state,
            healthy: inner.state == ConnectionState::Connected,
            last_healthy_at: inner.last_healthy_at,
            generation: inner.generation,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run one health-check tick now and return the resulting state.
    pub async fn check_now(&self) -> ConnectionState {
        if self.inner.read().lifecycle != Lifecycle::Running {
            return self.state();
        }
        self.tick().await
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.health_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the connection was just checked
        ticker.tick().await;
        if *shutdown.borrow() {
            return;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                state = self.tick() => {
                    debug!(state = %state, "Health-check tick complete");
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Health-check loop exited");
    }

    async fn tick(&self) -> ConnectionState {
        let _serial = self.tick_lock.lock().await;

        let (lifecycle, state, client) = {
            let inner = self.inner.read();
            (inner.lifecycle, inner.state, inner.client.clone())
        };
        if lifecycle != Lifecycle::Running {
            return state;
        }

        match (state, client) {
            (ConnectionState::Connected, Some(client)) => {
                let failure = match timeout(self.config.health_check_timeout(), client.ping()).await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!(
                        "ping timed out after {}s",
                        self.config.health_check_timeout_secs
                    )),
                };

                match failure {
                    None => {
                        let mut inner = self.inner.write();
                        inner.last_healthy_at = Some(Utc::now());
                        inner.consecutive_failures = 0;
                        ConnectionState::Connected
                    }
                    Some(reason) => {
                        warn!(reason = %reason, "Runtime health check failed");
                        self.degrade().await;
                        sleep(self.config.reconnect_backoff()).await;
                        self.reconnect().await
                    }
                }
            }
            // Still degraded from an earlier tick: try again right away
            _ => self.reconnect().await,
        }
    }

    async fn degrade(&self) {
        let stale = {
            let mut inner = self.inner.write();
            if inner.lifecycle != Lifecycle::Running {
                return;
            }
            inner.state = ConnectionState::Degraded;
            inner.consecutive_failures += 1;
            inner.client.take()
        };
        self.publish(ConnectionState::Degraded);

        if let Some(client) = stale {
            client.close().await;
        }
    }

    async fn reconnect(&self) -> ConnectionState {
        match self.dial().await {
            Ok(client) => {
                if self.install(client).await {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                }
            }
            Err(e) => {
                let failures = {
                    let mut inner = self.inner.write();
                    inner.consecutive_failures += 1;
                    inner.consecutive_failures
                };
                error!(error = %e, consecutive_failures = failures, "Runtime reconnect failed");
                self.state()
            }
        }
    }

    /// Dial and ping a fresh client within the dial timeout.
    async fn dial(&self) -> std::result::Result<Arc<dyn RuntimeClient>, RuntimeError> {
        let attempt = async {
            let client = self.connector.connect().await?;
            if let Err(e) = client.ping().await {
                client.close().await;
                return Err(e);
            }
            Ok(client)
        };

        match timeout(self.config.dial_timeout(), attempt).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Timeout(format!(
                "dial exceeded {}s",
                self.config.dial_timeout_secs
            ))),
        }
    }

    /// Swap in a fresh client, completing a pending start. Returns `false`
    /// if the supervisor was stopped meanwhile, in which case the client is
    /// closed instead.
    async fn install(&self, client: Arc<dyn RuntimeClient>) -> bool {
        let (installed, previous, generation) = {
            let mut inner = self.inner.write();
            if inner.lifecycle == Lifecycle::Stopped {
                (false, None, inner.generation)
            } else {
                if inner.lifecycle == Lifecycle::Starting {
                    inner.lifecycle = Lifecycle::Running;
                }
                let previous = inner.client.replace(Arc::clone(&client));
                inner.generation += 1;
                inner.state = ConnectionState::Connected;
                inner.last_healthy_at = Some(Utc::now());
                inner.consecutive_failures = 0;
                (true, previous, inner.generation)
            }
        };

        if !installed {
            client.close().await;
            return false;
        }
        if let Some(previous) = previous {
            previous.close().await;
        }

        self.publish(ConnectionState::Connected);
        debug!(generation, "Runtime client installed");
        true
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Runtime connection state changed");
        }
    }
}
