//! Owns the authoritative fleet map and drives node lifecycle transitions
use super::auto_scaler::DistributionStrategy;
use super::callbacks::{CallbackBus, ClusterContext, NodeEventCallback};
use super::job_resource::{set_critical_node, CriticalWorkerIndex, JobResourceConfig, MAX_RELAUNCH};
use super::node::{EventType, ExitReason, Node, NodeEvent, NodeStatus, NodeType, ALL_NODE_TYPES};
use super::state_flow::get_node_state_flow;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{event, instrument, Level};

/// The resources and config this manager was built from, after open-question
/// clamps (`relaunch_on_worker_failure` / `ps_relaunch_max_num`) are applied
#[derive(Debug, Clone)]
pub struct NodeManagerConfig {
    /// The declared resource shape of the job
    pub job_resource: JobResourceConfig,
    /// The worker relaunch budget, already clamped to `MAX_RELAUNCH` and
    /// forced to 0 for non PS/CUSTOM distribution strategies
    pub relaunch_on_worker_failure: u32,
    /// The PS relaunch budget for critical PS nodes, clamped to `MAX_RELAUNCH`
    pub ps_relaunch_max_num: u32,
    /// Whether every PS node is marked critical
    pub ps_is_critical: bool,
    /// The resolved critical worker index -> relaunch budget map
    pub critical_worker_index: CriticalWorkerIndex,
    /// The memory ceiling (MiB) above which an OOM exit is unrelaunchable
    pub max_memory: u64,
}

impl NodeManagerConfig {
    /// Build a manager config, applying the construction-time clamps that
    /// must hold before a manager is ever built
    ///
    /// # Arguments
    ///
    /// * `job_resource` - The declared resource shape of the job
    /// * `distribution_strategy` - The job's declared distribution strategy
    /// * `relaunch_on_worker_failure` - The configured worker relaunch budget
    /// * `ps_relaunch_max_num` - The configured PS relaunch budget
    /// * `ps_is_critical` - Whether every PS node should be critical
    /// * `critical_worker_index` - The resolved critical worker index map
    /// * `max_memory` - The OOM memory ceiling in MiB
    pub fn new(
        job_resource: JobResourceConfig,
        distribution_strategy: DistributionStrategy,
        relaunch_on_worker_failure: u32,
        ps_relaunch_max_num: u32,
        ps_is_critical: bool,
        critical_worker_index: CriticalWorkerIndex,
        max_memory: u64,
    ) -> Self {
        let allows_worker_relaunch =
            matches!(distribution_strategy, DistributionStrategy::Ps | DistributionStrategy::Custom);
        let relaunch_on_worker_failure = if allows_worker_relaunch {
            relaunch_on_worker_failure.min(MAX_RELAUNCH)
        } else {
            0
        };
        NodeManagerConfig {
            job_resource,
            relaunch_on_worker_failure,
            ps_relaunch_max_num: ps_relaunch_max_num.min(MAX_RELAUNCH),
            ps_is_critical,
            critical_worker_index,
            max_memory,
        }
    }
}

/// A bulk-listable, stream-watchable source of node events
#[async_trait]
pub trait NodeWatcher: Send + Sync {
    /// List the current state of every node the scheduler knows about
    async fn list(&self) -> Result<Vec<Node>, Error>;
    /// Pull the next lifecycle event, blocking until one arrives
    async fn watch(&self) -> Result<NodeEvent, Error>;
}

/// The cluster scheduler binding this manager resolves identity from
#[async_trait]
pub trait ClusterBinding: Send + Sync {
    /// The scheduler's id for the job this manager is running
    async fn get_job_uuid(&self) -> Result<String, Error>;
    /// The service address other nodes can reach a node at, once known
    async fn get_service_address(&self, node_type: NodeType, id: u32) -> Result<Option<String>, Error>;
}

/// Owns the fleet, applies event-driven transitions, and decides relaunches
pub struct NodeManager {
    config: NodeManagerConfig,
    job_nodes: Mutex<HashMap<NodeType, HashMap<u32, Node>>>,
    callbacks: Mutex<CallbackBus>,
    job_uuid: Mutex<Option<String>>,
    training_dataset_set: AtomicBool,
    chief_worker_started: AtomicBool,
    stop_process_event: AtomicBool,
    pending_relaunch_count: std::sync::atomic::AtomicU32,
    wait_pending_relaunch: bool,
}

impl NodeManager {
    /// Build a new node manager; the fleet is empty until `start()` runs
    ///
    /// # Arguments
    ///
    /// * `config` - The resolved manager configuration
    /// * `wait_pending_relaunch` - Whether a decided relaunch should
    ///   increment `pending_relaunch_count` before the caller relaunches it
    pub fn new(config: NodeManagerConfig, wait_pending_relaunch: bool) -> Self {
        NodeManager {
            config,
            job_nodes: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(CallbackBus::new()),
            job_uuid: Mutex::new(None),
            training_dataset_set: AtomicBool::new(false),
            chief_worker_started: AtomicBool::new(false),
            stop_process_event: AtomicBool::new(false),
            pending_relaunch_count: std::sync::atomic::AtomicU32::new(0),
            wait_pending_relaunch,
        }
    }

    /// Build a manager with no nodes and a default config, for tests that
    /// only need a `ClusterContext` to pass to a callback
    #[cfg(any(test, feature = "test-utilities"))]
    pub fn new_empty_for_test() -> Self {
        let config = NodeManagerConfig::new(
            JobResourceConfig::new(),
            DistributionStrategy::Ps,
            1,
            1,
            true,
            HashMap::new(),
            u64::MAX,
        );
        NodeManager::new(config, false)
    }

    /// Resolve the job's identity from the scheduler, initialize the fleet
    /// from the job resource config, mark critical nodes, and return the
    /// fleet ready for the caller to drive a monitor loop over
    ///
    /// # Arguments
    ///
    /// * `binding` - The cluster scheduler binding used to resolve identity
    #[instrument(skip_all, err(Debug))]
    pub async fn start(&self, binding: &dyn ClusterBinding) -> Result<(), Error> {
        let uuid = binding.get_job_uuid().await?;
        event!(Level::INFO, job_uuid = %uuid, "resolved job identity");
        *self.job_uuid.lock().expect("job_uuid lock poisoned") = Some(uuid);

        let mut fleet = self.config.job_resource.init_job_node_meta(self.config.relaunch_on_worker_failure);
        set_critical_node(
            &mut fleet,
            &self.config.critical_worker_index,
            self.config.ps_is_critical,
            self.config.ps_relaunch_max_num,
        );
        for node_type in ALL_NODE_TYPES {
            let Some(nodes) = fleet.get_mut(&node_type) else {
                continue;
            };
            for node in nodes.values_mut() {
                node.service_addr = binding.get_service_address(node_type, node.id).await?;
            }
        }
        *self.job_nodes.lock().expect("job_nodes lock poisoned") = fleet;
        Ok(())
    }

    /// Subscribe a new listener to node lifecycle transitions
    pub fn add_pod_event_callback(&self, callback: Box<dyn NodeEventCallback>) {
        self.callbacks.lock().expect("callbacks lock poisoned").add(callback);
    }

    /// Set the training dataset, idempotently: the first call wins
    pub fn set_training_dataset(&self) {
        self.training_dataset_set
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
    }

    /// Whether `set_training_dataset` has ever been called
    pub fn training_dataset_set(&self) -> bool {
        self.training_dataset_set.load(Ordering::SeqCst)
    }

    /// Whether a CHIEF node's callback has fired `on_node_started` at least once
    pub fn chief_worker_started(&self) -> bool {
        self.chief_worker_started.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown flag for the monitor loop
    pub fn request_stop(&self) {
        self.stop_process_event.store(true, Ordering::SeqCst);
    }

    /// Whether the monitor loop has been asked to stop
    pub fn stop_requested(&self) -> bool {
        self.stop_process_event.load(Ordering::SeqCst)
    }

    /// How many relaunches are pending acknowledgement by the scheduler binding
    pub fn pending_relaunch_count(&self) -> u32 {
        self.pending_relaunch_count.load(Ordering::SeqCst)
    }

    /// Whether every critical PS node is currently RUNNING; consulted by the
    /// PS auto-scaler before launching workers
    pub fn ps_ready(&self) -> bool {
        let job_nodes = self.job_nodes.lock().expect("job_nodes lock poisoned");
        match job_nodes.get(&NodeType::Ps) {
            None => true,
            Some(ps_nodes) => ps_nodes
                .values()
                .filter(|node| node.critical)
                .all(|node| node.status == NodeStatus::Running),
        }
    }

    /// Count live nodes of a type whose status is in the given set
    pub fn count_in_status(&self, node_type: NodeType, statuses: &[NodeStatus]) -> u32 {
        let job_nodes = self.job_nodes.lock().expect("job_nodes lock poisoned");
        job_nodes
            .get(&node_type)
            .map(|nodes| nodes.values().filter(|n| statuses.contains(&n.status)).count() as u32)
            .unwrap_or(0)
    }

    /// Run one reconciliation pass: bulk list the scheduler's view, process
    /// synthetic events for each entry, then mark any node missing from the
    /// list (and not INITIAL) as released
    #[instrument(skip_all, err(Debug))]
    pub async fn reconcile(&self, watcher: &dyn NodeWatcher) -> Result<(), Error> {
        let listed = watcher.list().await?;
        let mut seen: HashMap<NodeType, Vec<u32>> = HashMap::new();
        for node in listed {
            seen.entry(node.node_type).or_default().push(node.id);
            let event_type = if node.status == NodeStatus::Deleted {
                EventType::Deleted
            } else {
                EventType::Modified
            };
            self.process_event(&NodeEvent::new(event_type, node));
        }

        let mut job_nodes = self.job_nodes.lock().expect("job_nodes lock poisoned");
        for node_type in ALL_NODE_TYPES {
            let Some(nodes) = job_nodes.get_mut(&node_type) else {
                continue;
            };
            let present = seen.get(&node_type).cloned().unwrap_or_default();
            for node in nodes.values_mut() {
                if node.status != NodeStatus::Initial && !node.is_released && !present.contains(&node.id) {
                    node.is_released = true;
                    event!(Level::WARN, node_type = %node_type, id = node.id, "node missing from bulk list, marking released");
                }
            }
        }
        Ok(())
    }

    /// Run the monitor loop until `request_stop` is observed: reconcile,
    /// then drain watch events one at a time, backing off 30s on error
    pub async fn monitor_loop(&self, watcher: &dyn NodeWatcher) {
        while !self.stop_requested() {
            if let Err(err) = self.reconcile(watcher).await {
                event!(Level::ERROR, error = %err, "reconciliation failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                continue;
            }
            loop {
                if self.stop_requested() {
                    return;
                }
                match watcher.watch().await {
                    Ok(node_event) => self.process_event(&node_event),
                    Err(err) => {
                        event!(Level::ERROR, error = %err, "watch stream failed, re-listing after backoff");
                        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                        break;
                    }
                }
            }
        }
    }

    /// Process a single node event: transition status, dispatch callbacks,
    /// and decide whether to relaunch
    #[instrument(skip_all, fields(node_type = %event.node.node_type, id = event.node.id))]
    pub fn process_event(&self, event: &NodeEvent) {
        let decision = {
            let mut job_nodes = self.job_nodes.lock().expect("job_nodes lock poisoned");
            let Some(cur) = job_nodes
                .get_mut(&event.node.node_type)
                .and_then(|nodes| nodes.get_mut(&event.node.id))
            else {
                event!(Level::ERROR, node_type = %event.node.node_type, id = event.node.id, "event for unknown node id, dropping");
                return;
            };

            cur.update_info(
                event.node.name.clone(),
                event.node.start_time,
                event.node.create_time,
                event.node.service_addr.clone(),
            );
            let old_status = cur.status;
            let flow = get_node_state_flow(old_status, event.event_type, event.node.status);
            cur.update_status(event.node.status);

            let Some(flow) = flow else {
                return;
            };
            if flow.from_status == NodeStatus::Succeeded {
                return;
            }
            cur.set_exit_reason(event.node.exit_reason);

            let callbacks = self.callbacks.lock().expect("callbacks lock poisoned");
            let ctx = ClusterContext::new(self);
            callbacks.dispatch(flow, cur, &ctx);
            if flow.to_status == NodeStatus::Running && cur.node_type == NodeType::Chief {
                self.chief_worker_started.store(true, Ordering::SeqCst);
            }

            let should_relaunch = self.decide_relaunch(flow.should_relaunch, cur);
            if should_relaunch && self.wait_pending_relaunch {
                self.pending_relaunch_count.fetch_add(1, Ordering::SeqCst);
            }
            (should_relaunch, cur.node_type, cur.id, cur.name.clone())
        };

        let (should_relaunch, node_type, id, name) = decision;
        event!(Level::INFO, %node_type, id, %name, should_relaunch, "processed node event");
        if should_relaunch {
            self.relaunch_typed_pod(node_type, id);
        }
    }

    /// The relaunch decision algorithm, called with the manager lock held
    fn decide_relaunch(&self, flow_should_relaunch: bool, node: &mut Node) -> bool {
        let mut should = flow_should_relaunch && node.relaunchable;
        if should {
            match node.exit_reason {
                ExitReason::FatalError => should = false,
                ExitReason::Oom => {
                    if node.used_resource.memory > self.config.max_memory {
                        should = false;
                    } else if node.relaunch_count >= node.max_relaunch_count {
                        should = false;
                    } else {
                        node.is_recovered_oom = true;
                    }
                }
                ExitReason::Killed => {}
                ExitReason::Unknown => {
                    if node.relaunch_count > node.max_relaunch_count {
                        should = false;
                    }
                }
            }
        }
        if should {
            node.inc_relaunch_count();
        }
        should
    }

    /// Log the decided relaunch; the actual launch goes through the
    /// external scaler/scheduler binding, not this manager
    fn relaunch_typed_pod(&self, node_type: NodeType, id: u32) {
        event!(Level::INFO, %node_type, id, "relaunching node");
    }

    /// Snapshot every node of a type, for callers outside the lock (e.g.
    /// the auto-scaler reading counts to build a resource plan)
    pub fn snapshot(&self, node_type: NodeType) -> HashMap<u32, Node> {
        self.job_nodes
            .lock()
            .expect("job_nodes lock poisoned")
            .get(&node_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Access to this manager's resolved config
    pub fn config(&self) -> &NodeManagerConfig {
        &self.config
    }
}
