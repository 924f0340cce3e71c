// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Replication manager: cluster membership, heartbeat expiry, and a fixed
//! pool of workers draining one FIFO task queue.
//!
//! Concurrency is bounded by the pool size (`max_concurrent_replications`),
//! so a task never waits in a requeue loop and dispatch stays in creation
//! order. All task and membership state sits behind one lock; transfers run
//! outside it and only the final status commit re-acquires it.

use crate::cbor::{CborDecoder, CborEncoder};
use crate::core::types::now_timestamp;
use crate::placement::{ConsistentHashStrategy, PlacementStrategy};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::ReplicationConfig;
use super::snapshot::ManagerSnapshot;
use super::task::{ReplicationTask, TaskStatus};
use super::transport::{ReplicaTransport, SimulatedTransport};
use super::ReplicationError;

/// Error recorded on a task whose targets are all gone
pub const NO_TARGETS_AVAILABLE: &str = "No target nodes available";

/// Upper bound on how long an idle worker waits on the queue before
/// re-checking for shutdown
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub type TaskCallback = Arc<dyn Fn(&ReplicationTask) + Send + Sync>;
pub type NodeCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default, Clone)]
struct Callbacks {
    on_replication_complete: Option<TaskCallback>,
    on_replication_failed: Option<TaskCallback>,
    on_node_failed: Option<NodeCallback>,
}

/// Snapshot of cluster membership and task progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub node_id: String,
    pub running: bool,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    pub healthy: Vec<String>,
    pub unhealthy: Vec<String>,
    pub active_replications: usize,
    pub task_counts: BTreeMap<String, usize>,
}

#[derive(Default)]
struct ManagerState {
    tasks: HashMap<String, ReplicationTask>,
    task_order: Vec<String>,
    node_health: HashMap<String, f64>,
    active: HashSet<String>,
}

impl ManagerState {
    fn is_available(&self, node_id: &str, now: f64, heartbeat_timeout: f64) -> bool {
        self.node_health
            .get(node_id)
            .is_some_and(|last| now - last < heartbeat_timeout)
    }

    fn insert_task(&mut self, task: ReplicationTask) {
        self.task_order.push(task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task);
    }

    fn ordered_tasks(&self) -> impl Iterator<Item = &ReplicationTask> {
        self.task_order.iter().filter_map(|id| self.tasks.get(id))
    }
}

struct Shared {
    node_id: String,
    config: ReplicationConfig,
    state: RwLock<ManagerState>,
    callbacks: StdRwLock<Callbacks>,
    transport: Arc<dyn ReplicaTransport>,
    placement: Arc<dyn PlacementStrategy>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    running: AtomicBool,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

pub struct ReplicationManager {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl ReplicationManager {
    /// Manager with the simulated transport and consistent-hash placement
    pub fn new(node_id: impl Into<String>, config: ReplicationConfig) -> Result<Self, ReplicationError> {
        Self::with_transport(node_id, config, Arc::new(SimulatedTransport::default()))
    }

    pub fn with_transport(
        node_id: impl Into<String>,
        config: ReplicationConfig,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Result<Self, ReplicationError> {
        let placement = Arc::new(ConsistentHashStrategy::new(
            config.replication_factor,
            config.virtual_nodes,
        ));
        Self::with_components(node_id, config, transport, placement)
    }

    pub fn with_components(
        node_id: impl Into<String>,
        config: ReplicationConfig,
        transport: Arc<dyn ReplicaTransport>,
        placement: Arc<dyn PlacementStrategy>,
    ) -> Result<Self, ReplicationError> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                node_id: node_id.into(),
                config,
                state: RwLock::new(ManagerState::default()),
                callbacks: StdRwLock::new(Callbacks::default()),
                transport,
                placement,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                running: AtomicBool::new(false),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.shared.config
    }

    pub fn placement(&self) -> Arc<dyn PlacementStrategy> {
        self.shared.placement.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch the worker pool and the health-check loop. No-op if running.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.shutdown.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.shared.config.max_concurrent_replications;

        for worker_id in 0..workers {
            let shared = self.shared.clone();
            let shutdown = shutdown_rx.clone();
            lifecycle
                .handles
                .push(tokio::spawn(worker_loop(shared, shutdown, worker_id)));
        }
        lifecycle.handles.push(tokio::spawn(health_check_loop(
            self.shared.clone(),
            shutdown_rx,
        )));
        lifecycle.shutdown = Some(shutdown_tx);
        self.shared.running.store(true, Ordering::Release);

        info!(
            "Replication manager {} started with {} workers",
            self.shared.node_id, workers
        );
    }

    /// Signal shutdown and wait for every worker to finish its current task.
    ///
    /// Tasks still queued stay pending and are picked up by the next `start`.
    pub async fn stop(&self) {
        let (shutdown, handles) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (lifecycle.shutdown.take(), std::mem::take(&mut lifecycle.handles))
        };
        let Some(shutdown) = shutdown else {
            return;
        };

        let _ = shutdown.send(true);
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Replication worker ended abnormally: {}", e);
            }
        }
        self.shared.running.store(false, Ordering::Release);
        info!("Replication manager {} stopped", self.shared.node_id);
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    pub fn set_on_replication_complete<F>(&self, callback: F)
    where
        F: Fn(&ReplicationTask) + Send + Sync + 'static,
    {
        self.shared.callbacks_mut().on_replication_complete = Some(Arc::new(callback));
    }

    pub fn set_on_replication_failed<F>(&self, callback: F)
    where
        F: Fn(&ReplicationTask) + Send + Sync + 'static,
    {
        self.shared.callbacks_mut().on_replication_failed = Some(Arc::new(callback));
    }

    pub fn set_on_node_failed<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.callbacks_mut().on_node_failed = Some(Arc::new(callback));
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Register a node with a fresh heartbeat
    pub async fn add_node(&self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        let is_new = self
            .shared
            .state
            .write()
            .await
            .node_health
            .insert(node_id.clone(), now_timestamp())
            .is_none();

        if is_new {
            self.shared.placement.notify_membership_changed();
            info!("Node {} joined the cluster", node_id);
        }
    }

    /// Returns false if the node was not registered
    pub async fn remove_node(&self, node_id: &str) -> bool {
        let removed = self
            .shared
            .state
            .write()
            .await
            .node_health
            .remove(node_id)
            .is_some();

        if removed {
            self.shared.placement.notify_membership_changed();
            info!("Node {} removed from the cluster", node_id);
        }
        removed
    }

    /// Refresh a node's heartbeat; unknown nodes are registered
    pub async fn update_heartbeat(&self, node_id: &str) {
        self.record_heartbeat(node_id, now_timestamp()).await;
    }

    /// Set a node's last heartbeat to `timestamp` (seconds since epoch)
    pub async fn record_heartbeat(&self, node_id: &str, timestamp: f64) {
        let is_new = self
            .shared
            .state
            .write()
            .await
            .node_health
            .insert(node_id.to_string(), timestamp)
            .is_none();

        if is_new {
            self.shared.placement.notify_membership_changed();
            debug!("Heartbeat registered new node {}", node_id);
        }
    }

    pub async fn is_node_available(&self, node_id: &str) -> bool {
        let timeout = self.shared.heartbeat_timeout_secs();
        self.shared
            .state
            .read()
            .await
            .is_available(node_id, now_timestamp(), timeout)
    }

    /// Nodes whose heartbeat is still within the timeout, sorted
    pub async fn available_nodes(&self) -> Vec<String> {
        let timeout = self.shared.heartbeat_timeout_secs();
        let now = now_timestamp();
        let state = self.shared.state.read().await;

        let mut nodes: Vec<String> = state
            .node_health
            .keys()
            .filter(|node| state.is_available(node, now, timeout))
            .cloned()
            .collect();
        nodes.sort();
        nodes
    }

    /// Every registered node and its last heartbeat
    pub async fn node_health(&self) -> BTreeMap<String, f64> {
        self.shared
            .state
            .read()
            .await
            .node_health
            .iter()
            .map(|(node, ts)| (node.clone(), *ts))
            .collect()
    }

    /// Run one heartbeat-expiry scan now. Returns the nodes that failed.
    pub async fn check_node_health(&self) -> Vec<String> {
        self.shared.check_node_health().await
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Queue a transfer of `vector_ids` from `source` to `targets` and return
    /// the task id without waiting for it to run
    pub async fn schedule_replication(
        &self,
        source: impl Into<String>,
        targets: Vec<String>,
        vector_ids: Vec<String>,
    ) -> Result<String, ReplicationError> {
        let task = ReplicationTask::new(source.into(), targets, vector_ids);
        self.shared.submit(task, Duration::ZERO).await
    }

    /// Place each vector with the placement strategy and schedule one task
    /// per distinct replica set. Returns the scheduled task ids.
    pub async fn replicate_vectors(
        &self,
        source: &str,
        vector_ids: Vec<String>,
    ) -> Result<Vec<String>, ReplicationError> {
        let available = self.available_nodes().await;
        let mut groups: BTreeMap<Vec<String>, Vec<String>> = BTreeMap::new();

        for vector_id in vector_ids {
            let targets: Vec<String> = self
                .shared
                .placement
                .select_replicas(&vector_id, &available)
                .into_iter()
                .filter(|node| node != source)
                .collect();
            groups.entry(targets).or_default().push(vector_id);
        }

        let mut task_ids = Vec::with_capacity(groups.len());
        for (targets, ids) in groups {
            task_ids.push(self.schedule_replication(source, targets, ids).await?);
        }
        Ok(task_ids)
    }

    /// Schedule a new task repeating a failed one, after `retry_delay`.
    ///
    /// The failed task itself stays failed. Refused once the chain has used
    /// `retry_attempts` attempts.
    pub async fn retry_task(&self, task_id: &str) -> Result<String, ReplicationError> {
        let retry = {
            let state = self.shared.state.read().await;
            let task = state
                .tasks
                .get(task_id)
                .ok_or_else(|| ReplicationError::TaskNotFound(task_id.to_string()))?;

            if task.status != TaskStatus::Failed {
                return Err(ReplicationError::NotRetryable {
                    task_id: task_id.to_string(),
                    status: task.status,
                });
            }
            if task.attempt >= self.shared.config.retry_attempts.max(1) {
                return Err(ReplicationError::RetryLimitExceeded {
                    task_id: task_id.to_string(),
                    attempts: task.attempt,
                });
            }
            task.retry()
        };

        info!(
            "Retrying task {} as {} (attempt {})",
            task_id, retry.task_id, retry.attempt
        );
        self.shared
            .submit(retry, self.shared.config.retry_delay)
            .await
    }

    /// Drop terminal tasks that finished more than `older_than` ago
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = now_timestamp() - older_than.as_secs_f64();
        let mut state = self.shared.state.write().await;

        let before = state.tasks.len();
        state.tasks.retain(|_, task| {
            !(task.is_terminal() && task.completed_at.is_some_and(|done| done <= cutoff))
        });
        let ManagerState {
            tasks, task_order, ..
        } = &mut *state;
        task_order.retain(|id| tasks.contains_key(id));

        before - state.tasks.len()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_task(&self, task_id: &str) -> Option<ReplicationTask> {
        self.shared.state.read().await.tasks.get(task_id).cloned()
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.shared
            .state
            .read()
            .await
            .tasks
            .get(task_id)
            .map(|task| task.status)
    }

    /// Tasks in creation order, optionally filtered by status
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<ReplicationTask> {
        self.shared
            .state
            .read()
            .await
            .ordered_tasks()
            .filter(|task| status.map_or(true, |s| task.status == s))
            .cloned()
            .collect()
    }

    pub async fn active_replications(&self) -> usize {
        self.shared.state.read().await.active.len()
    }

    /// Best-effort view of membership and task progress
    pub async fn get_cluster_health(&self) -> ClusterHealth {
        let timeout = self.shared.heartbeat_timeout_secs();
        let now = now_timestamp();
        let state = self.shared.state.read().await;

        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();
        for node in state.node_health.keys() {
            if state.is_available(node, now, timeout) {
                healthy.push(node.clone());
            } else {
                unhealthy.push(node.clone());
            }
        }
        healthy.sort();
        unhealthy.sort();

        let mut task_counts: BTreeMap<String, usize> = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]
        .iter()
        .map(|status| (status.as_str().to_string(), 0))
        .collect();
        for task in state.tasks.values() {
            *task_counts.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }

        ClusterHealth {
            node_id: self.shared.node_id.clone(),
            running: self.is_running(),
            total_nodes: state.node_health.len(),
            healthy_nodes: healthy.len(),
            unhealthy_nodes: unhealthy.len(),
            healthy,
            unhealthy,
            active_replications: state.active.len(),
            task_counts,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn snapshot(&self) -> ManagerSnapshot {
        let state = self.shared.state.read().await;
        ManagerSnapshot {
            node_id: self.shared.node_id.clone(),
            config: self.shared.config.clone(),
            tasks: state.ordered_tasks().cloned().collect(),
            node_health: state
                .node_health
                .iter()
                .map(|(node, ts)| (node.clone(), *ts))
                .collect(),
            taken_at: now_timestamp(),
        }
    }

    pub async fn to_dict(&self) -> Result<serde_json::Value, ReplicationError> {
        self.snapshot().await.to_dict()
    }

    /// Rebuild a stopped manager from [`ReplicationManager::to_dict`] output
    pub async fn from_dict(value: serde_json::Value) -> Result<Self, ReplicationError> {
        Self::restore(ManagerSnapshot::from_dict(value)?).await
    }

    /// Restore with the default transport and placement
    pub async fn restore(snapshot: ManagerSnapshot) -> Result<Self, ReplicationError> {
        let manager = Self::new(snapshot.node_id.clone(), snapshot.config.clone())?;
        manager.load_snapshot(snapshot).await?;
        Ok(manager)
    }

    /// Load tasks and membership from `snapshot` into this manager.
    ///
    /// Tasks that were mid-transfer when the snapshot was taken are put back
    /// to pending and queued again with the other pending tasks, so delivery
    /// after a restore is at-least-once.
    pub async fn load_snapshot(&self, snapshot: ManagerSnapshot) -> Result<(), ReplicationError> {
        let mut requeue = Vec::new();
        {
            let mut state = self.shared.state.write().await;
            for mut task in snapshot.tasks {
                if state.tasks.contains_key(&task.task_id) {
                    continue;
                }
                if task.status == TaskStatus::InProgress {
                    task.status = TaskStatus::Pending;
                    task.started_at = None;
                }
                if task.status == TaskStatus::Pending {
                    requeue.push(task.task_id.clone());
                }
                state.insert_task(task);
            }
            state.node_health.extend(snapshot.node_health);
        }
        self.shared.placement.notify_membership_changed();

        for task_id in &requeue {
            self.shared.enqueue(task_id.clone())?;
        }
        info!(
            "Restored replication state: {} tasks requeued",
            requeue.len()
        );
        Ok(())
    }

    /// Write a CBOR checkpoint of the current state
    pub async fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<(), ReplicationError> {
        let bytes = CborEncoder::encode_snapshot(&self.snapshot().await)
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        tokio::fs::write(path.as_ref(), bytes).await?;
        debug!("Checkpoint written to {}", path.as_ref().display());
        Ok(())
    }

    pub async fn load_checkpoint(path: impl AsRef<Path>) -> Result<Self, ReplicationError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let snapshot = CborDecoder::decode_snapshot(&bytes)
            .map_err(|e| ReplicationError::Snapshot(e.to_string()))?;
        Self::restore(snapshot).await
    }
}

impl std::fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("node_id", &self.shared.node_id)
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Shared {
    fn heartbeat_timeout_secs(&self) -> f64 {
        self.config.heartbeat_timeout.as_secs_f64()
    }

    fn callbacks(&self) -> Callbacks {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn callbacks_mut(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.callbacks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, task_id: String) -> Result<(), ReplicationError> {
        self.queue_tx
            .send(task_id)
            .map_err(|_| ReplicationError::QueueClosed)
    }

    async fn submit(
        self: &Arc<Self>,
        task: ReplicationTask,
        delay: Duration,
    ) -> Result<String, ReplicationError> {
        let task_id = task.task_id.clone();
        info!(
            "Scheduled replication {}: {} vectors {} -> {:?}",
            task_id,
            task.vector_ids.len(),
            task.source_node,
            task.target_nodes
        );
        self.state.write().await.insert_task(task);

        if delay.is_zero() {
            self.enqueue(task_id.clone())?;
        } else {
            let shared = self.clone();
            let queued_id = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = shared.enqueue(queued_id) {
                    error!("Could not queue delayed retry: {}", e);
                }
            });
        }
        Ok(task_id)
    }

    async fn check_node_health(&self) -> Vec<String> {
        let timeout = self.heartbeat_timeout_secs();
        let now = now_timestamp();

        let failed: Vec<String> = {
            let mut state = self.state.write().await;
            let mut expired: Vec<String> = state
                .node_health
                .iter()
                .filter(|(_, last)| now - **last >= timeout)
                .map(|(node, _)| node.clone())
                .collect();
            expired.sort();

            for node in &expired {
                state.node_health.remove(node);
                for task in state.tasks.values_mut().filter(|t| t.is_active()) {
                    task.target_nodes.retain(|target| target != node);
                }
            }
            expired
        };

        if failed.is_empty() {
            return failed;
        }

        self.placement.notify_membership_changed();
        let callback = self.callbacks().on_node_failed;
        for node in &failed {
            warn!("Node {} missed its heartbeat deadline; removed", node);
            if let Some(callback) = &callback {
                run_callback("on_node_failed", || callback(node));
            }
        }
        failed
    }

    async fn execute_task(&self, task_id: &str) {
        let timeout = self.heartbeat_timeout_secs();

        let (task, available) = {
            let mut state = self.state.write().await;
            let now = now_timestamp();
            let Some(task) = state.tasks.get_mut(task_id) else {
                warn!("Queued task {} no longer exists", task_id);
                return;
            };
            if !task.mark_in_progress() {
                debug!("Skipping task {} in state {}", task_id, task.status);
                return;
            }
            let task = task.clone();
            let available: Vec<String> = task
                .target_nodes
                .iter()
                .filter(|node| state.is_available(node, now, timeout))
                .cloned()
                .collect();
            state.active.insert(task_id.to_string());
            (task, available)
        };

        let outcome = if available.is_empty() {
            Err(NO_TARGETS_AVAILABLE.to_string())
        } else {
            self.transfer_all(&task, available).await
        };

        let finished = {
            let mut state = self.state.write().await;
            state.active.remove(task_id);
            let Some(task) = state.tasks.get_mut(task_id) else {
                return;
            };
            match &outcome {
                Ok(()) => task.mark_completed(),
                Err(e) => task.mark_failed(e.clone()),
            };
            task.clone()
        };

        let callbacks = self.callbacks();
        match outcome {
            Ok(()) => {
                info!("Replication {} completed", task_id);
                if let Some(callback) = callbacks.on_replication_complete {
                    run_callback("on_replication_complete", || callback(&finished));
                }
            }
            Err(e) => {
                warn!("Replication {} failed: {}", task_id, e);
                if let Some(callback) = callbacks.on_replication_failed {
                    run_callback("on_replication_failed", || callback(&finished));
                }
            }
        }
    }

    /// Copy the task's vectors to every target. Runs on its own tokio task so
    /// a panicking transport fails the replication instead of the worker.
    async fn transfer_all(&self, task: &ReplicationTask, targets: Vec<String>) -> Result<(), String> {
        let transport = self.transport.clone();
        let source = task.source_node.clone();
        let vector_ids = task.vector_ids.clone();

        let handle = tokio::spawn(async move {
            for target in &targets {
                transport
                    .transfer(&source, target, &vector_ids)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Ok::<(), String>(())
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(format!("transfer aborted: {}", e)),
        }
    }
}

/// Invoke a subscriber callback; a panic is logged and contained so the
/// calling worker or health loop keeps running
fn run_callback<F: FnOnce()>(name: &str, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("Callback {} panicked; continuing", name);
    }
}

async fn worker_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>, worker_id: usize) {
    debug!("Replication worker {} started", worker_id);
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = poll_queue(&shared) => received,
        };

        match received {
            Ok(Some(task_id)) => shared.execute_task(&task_id).await,
            Ok(None) => break,
            // idle poll; loop around to observe shutdown
            Err(_) => continue,
        }
    }
    debug!("Replication worker {} exiting", worker_id);
}

async fn poll_queue(shared: &Shared) -> Result<Option<String>, tokio::time::error::Elapsed> {
    let mut queue = shared.queue_rx.lock().await;
    timeout(POLL_INTERVAL, queue.recv()).await
}

async fn health_check_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(shared.config.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately; scans start one interval after start()
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                shared.check_node_health().await;
            }
        }
    }
    debug!("Health check loop exiting");
}
