//! In-process runtime
//!
//! [`InMemoryRuntime`] plays the role of a container runtime daemon. Every
//! connection it hands out shares the same daemon state, so containers
//! survive reconnects the way they survive a client reconnect to a real
//! daemon. It is also the test double for everything above the adapter: it
//! journals each call and can inject failures, outages, latency, health
//! probe results and log output.

use crate::client::{
    ContainerOptions, LogLine, LogOptions, LogStream, RuntimeClient, RuntimeConnector, StopMode,
};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use envsched_types::{ContainerId, ContainerStatus};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Exit code reported for killed tasks.
pub const KILLED_EXIT_CODE: i32 = 137;

const LOG_CHANNEL_CAPACITY: usize = 256;

/// Kind of runtime call, as recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Connect,
    Ping,
    HasImage,
    PullImage,
    Create,
    Start,
    StopGraceful,
    Kill,
    Delete,
    Status,
    List,
    SetLabels,
    Probe,
    Logs,
}

/// A journaled call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub op: RuntimeOp,

    /// Logical container name for container calls, image for image calls,
    /// empty otherwise
    pub target: String,

    /// Connection the call came through
    pub connection: u64,
}

#[derive(Debug)]
struct Fault {
    op: RuntimeOp,
    target: Option<String>,
    remaining: Option<u32>,
    error: RuntimeError,
}

#[derive(Debug)]
struct ContainerEntry {
    options: ContainerOptions,
    labels: BTreeMap<String, String>,
    status: ContainerStatus,
}

#[derive(Debug)]
struct LogBuffer {
    lines: Vec<LogLine>,
    tx: broadcast::Sender<LogLine>,
}

impl LogBuffer {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            lines: Vec::new(),
            tx,
        }
    }
}

#[derive(Debug)]
struct ProbeScript {
    results: VecDeque<bool>,
    fallback: bool,
}

#[derive(Debug, Default)]
struct DaemonState {
    images: DashMap<String, ()>,
    containers: DashMap<ContainerId, ContainerEntry>,
    logs: DashMap<String, LogBuffer>,
    probes: DashMap<String, ProbeScript>,
    ignore_graceful: DashMap<String, ()>,
    journal: Mutex<Vec<RuntimeCall>>,
    faults: Mutex<Vec<Fault>>,
    outage: AtomicBool,
    latency: Mutex<Duration>,
    connections: AtomicU64,
}

impl DaemonState {
    fn record(&self, op: RuntimeOp, target: &str, connection: u64) {
        self.journal.lock().push(RuntimeCall {
            op,
            target: target.to_string(),
            connection,
        });
    }

    fn take_fault(&self, op: RuntimeOp, target: &str) -> Option<RuntimeError> {
        let mut faults = self.faults.lock();
        let index = faults
            .iter()
            .position(|f| f.op == op && f.target.as_deref().map_or(true, |t| t == target))?;

        let exhausted = match faults[index].remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        let error = faults[index].error.clone();
        if exhausted {
            faults.remove(index);
        }
        Some(error)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn find_by_name(&self, name: &str) -> Option<ContainerId> {
        self.containers
            .iter()
            .find(|entry| entry.value().options.name == name)
            .map(|entry| entry.key().clone())
    }
}

/// In-process runtime daemon
#[derive(Clone, Default)]
pub struct InMemoryRuntime {
    state: Arc<DaemonState>,
}

impl fmt::Debug for InMemoryRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRuntime")
            .field("containers", &self.state.containers.len())
            .field("images", &self.state.images.len())
            .field("outage", &self.state.outage.load(Ordering::SeqCst))
            .finish()
    }
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an image available without a pull.
    pub fn preload_image(&self, image: impl Into<String>) {
        self.state.images.insert(image.into(), ());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.images.contains_key(image)
    }

    /// Simulate the daemon going away (`true`) or coming back (`false`).
    pub fn set_outage(&self, outage: bool) {
        debug!(outage, "In-memory runtime outage toggled");
        self.state.outage.store(outage, Ordering::SeqCst);
    }

    /// Delay applied to every call and dial.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Fail calls of `op` on `target` (any target when `None`) with `error`,
    /// `times` times or forever.
    pub fn fail(
        &self,
        op: RuntimeOp,
        target: Option<&str>,
        error: RuntimeError,
        times: Option<u32>,
    ) {
        self.state.faults.lock().push(Fault {
            op,
            target: target.map(str::to_string),
            remaining: times,
            error,
        });
    }

    /// Fail the next call of `op` on `target`.
    pub fn fail_next(&self, op: RuntimeOp, target: &str) {
        self.fail(
            op,
            Some(target),
            RuntimeError::Operation(format!("injected {:?} failure", op)),
            Some(1),
        );
    }

    /// Fail every call of `op` on `target` until faults are cleared.
    pub fn fail_always(&self, op: RuntimeOp, target: &str) {
        self.fail(
            op,
            Some(target),
            RuntimeError::Operation(format!("injected {:?} failure", op)),
            None,
        );
    }

    pub fn clear_faults(&self) {
        self.state.faults.lock().clear();
    }

    /// Script health probe results for a container; the last result repeats.
    pub fn script_probe(&self, container_name: &str, results: impl IntoIterator<Item = bool>) {
        let results: VecDeque<bool> = results.into_iter().collect();
        let fallback = results.back().copied().unwrap_or(true);
        self.state
            .probes
            .insert(container_name.to_string(), ProbeScript { results, fallback });
    }

    /// Make graceful stops of a container never complete.
    pub fn ignore_graceful_stop(&self, container_name: &str) {
        self.state
            .ignore_graceful
            .insert(container_name.to_string(), ());
    }

    pub fn push_log(&self, container_name: &str, message: impl Into<String>) {
        self.push_log_at(container_name, Utc::now(), message);
    }

    pub fn push_log_at(
        &self,
        container_name: &str,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) {
        let line = LogLine {
            timestamp,
            message: message.into(),
        };
        let mut buffer = self
            .state
            .logs
            .entry(container_name.to_string())
            .or_insert_with(LogBuffer::new);
        buffer.lines.push(line.clone());
        // No followers is fine
        let _ = buffer.tx.send(line);
    }

    /// Make a running container's task exit on its own.
    pub fn crash(&self, container_name: &str, code: i32) {
        if let Some(id) = self.state.find_by_name(container_name) {
            if let Some(mut entry) = self.state.containers.get_mut(&id) {
                entry.status = ContainerStatus::Exited { code };
            }
        }
    }

    /// Remove a container behind the controller's back.
    pub fn lose_container(&self, container_name: &str) {
        if let Some(id) = self.state.find_by_name(container_name) {
            self.state.containers.remove(&id);
        }
    }

    /// Runtime ID of the container currently carrying `container_name`.
    pub fn container_id(&self, container_name: &str) -> Option<ContainerId> {
        self.state.find_by_name(container_name)
    }

    pub fn status_of(&self, container_name: &str) -> Option<ContainerStatus> {
        let id = self.state.find_by_name(container_name)?;
        self.state.containers.get(&id).map(|e| e.status)
    }

    pub fn labels_of(&self, container_name: &str) -> Option<BTreeMap<String, String>> {
        let id = self.state.find_by_name(container_name)?;
        self.state.containers.get(&id).map(|e| e.labels.clone())
    }

    pub fn options_of(&self, container_name: &str) -> Option<ContainerOptions> {
        let id = self.state.find_by_name(container_name)?;
        self.state.containers.get(&id).map(|e| e.options.clone())
    }

    pub fn container_count(&self) -> usize {
        self.state.containers.len()
    }

    /// Number of connections handed out so far.
    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<RuntimeCall> {
        self.state.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.state.journal.lock().clear();
    }

    /// Journal entries of one kind.
    pub fn calls(&self, op: RuntimeOp) -> Vec<RuntimeCall> {
        self.state
            .journal
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Journal index of the first call of `op` on `target`.
    pub fn first_position(&self, op: RuntimeOp, target: &str) -> Option<usize> {
        self.state
            .journal
            .lock()
            .iter()
            .position(|c| c.op == op && c.target == target)
    }

    /// Journal index of the last call of `op` on `target`.
    pub fn last_position(&self, op: RuntimeOp, target: &str) -> Option<usize> {
        self.state
            .journal
            .lock()
            .iter()
            .rposition(|c| c.op == op && c.target == target)
    }

    /// Journal index of the first call of any kind on `target`.
    pub fn first_call_on(&self, target: &str) -> Option<usize> {
        self.state
            .journal
            .lock()
            .iter()
            .position(|c| c.target == target)
    }
}

#[async_trait]
impl RuntimeConnector for InMemoryRuntime {
    async fn connect(&self) -> Result<Arc<dyn RuntimeClient>> {
        self.state.simulate_latency().await;
        if self.state.outage.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable(
                "cannot dial runtime daemon".to_string(),
            ));
        }

        let connection = self.state.connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.record(RuntimeOp::Connect, "", connection);
        if let Some(error) = self.state.take_fault(RuntimeOp::Connect, "") {
            return Err(error);
        }

        debug!(connection, "In-memory runtime connection opened");
        Ok(Arc::new(InMemoryClient {
            state: Arc::clone(&self.state),
            connection,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One connection to an [`InMemoryRuntime`]
#[derive(Debug)]
pub struct InMemoryClient {
    state: Arc<DaemonState>,
    connection: u64,
    closed: AtomicBool,
}

impl InMemoryClient {
    async fn enter(&self, op: RuntimeOp, target: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        self.state.simulate_latency().await;
        if self.state.outage.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable(
                "runtime daemon is not responding".to_string(),
            ));
        }

        self.state.record(op, target, self.connection);
        match self.state.take_fault(op, target) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn target_of(&self, id: &ContainerId) -> String {
        self.state
            .containers
            .get(id)
            .map(|e| e.options.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn not_found(id: &ContainerId) -> RuntimeError {
        RuntimeError::NotFound(format!("container {}", id))
    }
}

#[async_trait]
impl RuntimeClient for InMemoryClient {
    async fn ping(&self) -> Result<()> {
        self.enter(RuntimeOp::Ping, "").await
    }

    async fn has_image(&self, image: &str) -> Result<bool> {
        self.enter(RuntimeOp::HasImage, image).await?;
        Ok(self.state.images.contains_key(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.enter(RuntimeOp::PullImage, image).await?;
        self.state.images.insert(image.to_string(), ());
        Ok(())
    }

    async fn create_container(&self, id: &ContainerId, options: &ContainerOptions) -> Result<()> {
        self.enter(RuntimeOp::Create, &options.name).await?;

        if !self.state.images.contains_key(&options.image) {
            return Err(RuntimeError::NotFound(format!("image {}", options.image)));
        }

        match self.state.containers.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(RuntimeError::AlreadyExists(format!("container {}", id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(ContainerEntry {
                    options: options.clone(),
                    labels: options.labels.clone(),
                    status: ContainerStatus::Created,
                });
            }
        }

        self.state
            .logs
            .entry(options.name.clone())
            .or_insert_with(LogBuffer::new);
        Ok(())
    }

    async fn start_task(&self, id: &ContainerId) -> Result<()> {
        self.enter(RuntimeOp::Start, &self.target_of(id)).await?;
        let mut entry = self
            .state
            .containers
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        entry.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop_task(&self, id: &ContainerId, mode: StopMode) -> Result<()> {
        let target = self.target_of(id);
        let op = match mode {
            StopMode::Graceful => RuntimeOp::StopGraceful,
            StopMode::Kill => RuntimeOp::Kill,
        };
        self.enter(op, &target).await?;

        let running = self
            .state
            .containers
            .get(id)
            .map(|e| e.status.is_running())
            .ok_or_else(|| Self::not_found(id))?;
        if !running {
            return Ok(());
        }

        if mode == StopMode::Graceful && self.state.ignore_graceful.contains_key(&target) {
            // The process ignores SIGTERM; only a kill ends it
            std::future::pending::<()>().await;
        }

        let mut entry = self
            .state
            .containers
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        entry.status = match mode {
            StopMode::Graceful => ContainerStatus::Stopped,
            StopMode::Kill => ContainerStatus::Exited {
                code: KILLED_EXIT_CODE,
            },
        };
        Ok(())
    }

    async fn delete_container(&self, id: &ContainerId) -> Result<()> {
        self.enter(RuntimeOp::Delete, &self.target_of(id)).await?;
        let (_, entry) = self
            .state
            .containers
            .remove(id)
            .ok_or_else(|| Self::not_found(id))?;

        // Ends any follower of this container's logs
        self.state.logs.remove(&entry.options.name);
        Ok(())
    }

    async fn container_status(&self, id: &ContainerId) -> Result<ContainerStatus> {
        self.enter(RuntimeOp::Status, &self.target_of(id)).await?;
        self.state
            .containers
            .get(id)
            .map(|e| e.status)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerId>> {
        self.enter(RuntimeOp::List, "").await?;
        let mut ids: Vec<ContainerId> = self
            .state
            .containers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_labels(&self, id: &ContainerId, labels: &BTreeMap<String, String>) -> Result<()> {
        self.enter(RuntimeOp::SetLabels, &self.target_of(id)).await?;
        let mut entry = self
            .state
            .containers
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        entry.labels = labels.clone();
        entry.options.labels = labels.clone();
        Ok(())
    }

    async fn exec_probe(
        &self,
        id: &ContainerId,
        _command: &[String],
        _timeout: Duration,
    ) -> Result<bool> {
        let target = self.target_of(id);
        self.enter(RuntimeOp::Probe, &target).await?;

        let running = self
            .state
            .containers
            .get(id)
            .map(|e| e.status.is_running())
            .ok_or_else(|| Self::not_found(id))?;
        if !running {
            return Ok(false);
        }

        Ok(match self.state.probes.get_mut(&target) {
            Some(mut script) => {
                let fallback = script.fallback;
                script.results.pop_front().unwrap_or(fallback)
            }
            None => true,
        })
    }

    async fn stream_logs(&self, id: &ContainerId, options: LogOptions) -> Result<LogStream> {
        let target = self.target_of(id);
        self.enter(RuntimeOp::Logs, &target).await?;
        if !self.state.containers.contains_key(id) {
            return Err(Self::not_found(id));
        }

        let (history, live) = {
            let buffer = self
                .state
                .logs
                .entry(target)
                .or_insert_with(LogBuffer::new);
            // Subscribe before the snapshot so no line falls in between
            let live = options.follow.then(|| buffer.tx.subscribe());

            let mut history: Vec<LogLine> = buffer
                .lines
                .iter()
                .filter(|l| options.since.map_or(true, |since| l.timestamp >= since))
                .cloned()
                .collect();
            if let Some(tail) = options.tail {
                let skip = history.len().saturating_sub(tail);
                history.drain(..skip);
            }
            (history, live)
        };

        let history = stream::iter(history.into_iter().map(Ok));
        match live {
            None => Ok(history.boxed()),
            Some(rx) => {
                let live = stream::unfold(rx, |mut rx| async move {
                    loop {
                        match rx.recv().await {
                            Ok(line) => return Some((Ok(line), rx)),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(skipped, "Log follower lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                });
                Ok(history.chain(live).boxed())
            }
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(connection = self.connection, "In-memory runtime connection closed");
        }
    }
}
