//! The PS/worker auto-scaler strategy for async parameter-server training
use super::{log_execute_job_optimization_plan, AutoScalerState, JobAutoScaler};
use crate::libs::job_resource::{GroupResource, JobResourceConfig};
use crate::libs::node::NodeType;
use crate::libs::node_manager::NodeManager;
use crate::libs::optimizer::{JobOptimizer, PerfMonitor};
use crate::libs::plan::{ResourcePlan, ScalePlan};
use crate::libs::ps_manager::PsManager;
use crate::libs::scheduler::Scaler;
use crate::libs::worker_manager::WorkerManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{event, instrument, Level};

const SCALE_INTERVAL: Duration = Duration::from_secs(30);

/// The PS-training auto-scaler strategy: a pending-node reducer that runs
/// until the main loop starts, then a periodic optimization loop
pub struct PsAutoScaler {
    state: Arc<AutoScalerState>,
    node_manager: Arc<NodeManager>,
    job_resource: Mutex<JobResourceConfig>,
    ps_manager: Arc<PsManager>,
    worker_manager: Arc<WorkerManager>,
    optimizer: Arc<dyn JobOptimizer>,
    perf_monitor: Arc<dyn PerfMonitor>,
    scaler: Arc<dyn Scaler>,
    auto_ps_enabled: bool,
    auto_worker_enabled: bool,
    seconds_interval_to_optimize: i64,
    last_plan_time: AtomicI64,
    /// A worker group resource held back because the PS group wasn't ready
    /// yet; flushed the next time `ps_ready()` is observed true
    pending_worker_launches: Mutex<Option<GroupResource>>,
}

impl PsAutoScaler {
    /// Build a new PS auto-scaler; the caller is expected to `tokio::spawn`
    /// `run_pending_node_reducer` once at construction, so the reducer runs
    /// alongside the manager from the start
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_manager: Arc<NodeManager>,
        job_resource: JobResourceConfig,
        ps_manager: Arc<PsManager>,
        worker_manager: Arc<WorkerManager>,
        optimizer: Arc<dyn JobOptimizer>,
        perf_monitor: Arc<dyn PerfMonitor>,
        scaler: Arc<dyn Scaler>,
        auto_ps_enabled: bool,
        auto_worker_enabled: bool,
        seconds_interval_to_optimize: i64,
    ) -> Self {
        PsAutoScaler {
            state: Arc::new(AutoScalerState::new()),
            node_manager,
            job_resource: Mutex::new(job_resource),
            ps_manager,
            worker_manager,
            optimizer,
            perf_monitor,
            scaler,
            auto_ps_enabled,
            auto_worker_enabled,
            seconds_interval_to_optimize,
            last_plan_time: AtomicI64::new(0),
            pending_worker_launches: Mutex::new(None),
        }
    }

    /// Runs every `2 * scale_interval` until the main autoscaling loop has
    /// started, merging both managers' pending-node reductions into one
    /// scale call. Stops permanently the first time it observes
    /// `autoscaling_started() == true` and never restarts.
    pub async fn run_pending_node_reducer(&self) {
        loop {
            tokio::time::sleep(SCALE_INTERVAL * 2).await;
            if self.state.autoscaling_started() {
                event!(Level::INFO, "autoscaling loop has started, stopping pending-node reducer");
                return;
            }
            if self.state.stop_requested() {
                return;
            }
            let mut plan = self.ps_manager.reduce_pending_node_resource(&[]);
            plan.merge(self.worker_manager.reduce_pending_node_resource(&[]));
            if plan.is_empty() {
                continue;
            }
            plan.ps_addrs = self.ps_manager.get_ps_addrs();
            if let Err(err) = self.scaler.scale(plan).await {
                event!(Level::ERROR, error = %err, "pending-node reducer scaler call failed");
            }
        }
    }

    /// Runs every `scale_interval` once `start_auto_scaling` has flipped the
    /// started flag; the caller is expected to `tokio::spawn` this right
    /// after calling `start_auto_scaling`
    #[instrument(skip_all)]
    pub async fn run_optimization_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(SCALE_INTERVAL).await;
            if !self.state.autoscaling_started() {
                return;
            }

            let now = now_secs();
            let last = self.last_plan_time.load(Ordering::SeqCst);
            if !self.perf_monitor.worker_adjustment_finished()
                || now - last <= self.seconds_interval_to_optimize
                || self.ps_manager.exist_migrated_ps_nodes()
            {
                continue;
            }

            match self.optimizer.get_job_resource_plan().await {
                Some(plan) => {
                    self.last_plan_time.store(now, Ordering::SeqCst);
                    if let Err(err) = self.execute_job_optimization_plan(plan).await {
                        event!(Level::ERROR, error = %err.error, "optimization cycle failed, continuing");
                    }
                }
                None => continue,
            }
        }
    }

    /// Apply a resource plan: persist group resources, adjust PS/worker
    /// fleets, migrate named nodes, and hand the merged scale plan to the
    /// external scaler. On scaler failure, the attempted plan is returned
    /// alongside the error so a caller can retry it.
    #[instrument(skip_all, err(Debug))]
    pub async fn execute_job_optimization_plan(&self, plan: ResourcePlan) -> Result<(), super::ExecutionError> {
        if plan.is_empty() {
            return Ok(());
        }
        log_execute_job_optimization_plan(&plan);

        let mut scale_plan = ScalePlan::new();
        let ps_ready = self.node_manager.ps_ready();
        let mut flushed_pending = false;
        if ps_ready {
            if let Some(pending) = self.pending_worker_launches.lock().expect("pending_worker_launches lock poisoned").take() {
                event!(Level::INFO, "ps group ready, flushing held-back worker launch");
                scale_plan.merge(self.worker_manager.adjust_worker(&pending));
                flushed_pending = true;
            }
        }

        for (node_type, group) in &plan.node_group_resources {
            if group.count == 0 {
                continue;
            }
            let resolved = {
                let mut job_resource = self.job_resource.lock().expect("job_resource lock poisoned");
                job_resource.update_node_group_resource(*node_type, group.clone());
                job_resource.get_node_group_resource(*node_type).cloned().unwrap_or_else(|| group.clone())
            };

            match node_type {
                NodeType::Ps => {
                    scale_plan.merge(self.ps_manager.adjust_ps(&resolved));
                    self.perf_monitor.reset_running_window();
                }
                NodeType::Worker => {
                    let chief_num = self.job_resource.lock().expect("job_resource lock poisoned").chief_num();
                    let worker_num = chief_num + resolved.count;
                    self.perf_monitor.set_target_worker_num(worker_num);
                    if ps_ready {
                        if !flushed_pending {
                            scale_plan.merge(self.worker_manager.adjust_worker(&resolved));
                        }
                    } else {
                        event!(Level::INFO, "ps group not ready, holding back worker launch");
                        *self.pending_worker_launches.lock().expect("pending_worker_launches lock poisoned") = Some(resolved);
                    }
                }
                _ => {}
            }
        }

        if !plan.node_resources.is_empty() {
            scale_plan.merge(self.migrate_named_nodes(&plan).await);
        }

        scale_plan.ps_addrs = self.ps_manager.get_ps_addrs();
        if scale_plan.is_empty() {
            return Ok(());
        }
        self.scaler.scale(scale_plan.clone()).await.map_err(|error| super::ExecutionError {
            error,
            attempted: scale_plan,
        })
    }

    /// Partition `plan.node_resources` by the type tag embedded in each
    /// node's name (`name.split('-').rsplit_nth(1)`) and migrate PS/worker
    /// nodes accordingly
    async fn migrate_named_nodes(&self, plan: &ResourcePlan) -> ScalePlan {
        let mut ps_targets = std::collections::HashMap::new();
        let mut worker_targets = std::collections::HashMap::new();
        for (name, resource) in &plan.node_resources {
            match name_type_tag(name) {
                Some("ps") => {
                    ps_targets.insert(name.clone(), *resource);
                }
                Some("worker") => {
                    worker_targets.insert(name.clone(), *resource);
                }
                _ => event!(Level::WARN, %name, "unrecognized node type tag in migration target name"),
            }
        }

        let mut merged = ScalePlan::new();
        if !ps_targets.is_empty() {
            merged.merge(self.ps_manager.migrate_parameter_servers(&ps_targets));
            self.perf_monitor.reset_running_window();
        }
        if !worker_targets.is_empty() {
            merged.merge(self.worker_manager.migrate_workers(&worker_targets));
        }
        merged
    }
}

/// Extract the node-type tag embedded as the second-to-last `-`-separated
/// segment of a scheduler-assigned name, e.g. `"job-ps-0"` -> `"ps"`
fn name_type_tag(name: &str) -> Option<&str> {
    let segments: Vec<&str> = name.split('-').collect();
    if segments.len() < 2 {
        return None;
    }
    Some(segments[segments.len() - 2])
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl JobAutoScaler for PsAutoScaler {
    #[instrument(skip_all)]
    async fn start_auto_scaling(&self) {
        if !self.state.mark_started() {
            return;
        }
        if !self.auto_ps_enabled && !self.auto_worker_enabled {
            event!(Level::INFO, "auto-scaling disabled for both ps and worker, not starting optimization loop");
            return;
        }
        let worker_num = {
            let job_resource = self.job_resource.lock().expect("job_resource lock poisoned");
            job_resource.worker_num() + job_resource.chief_num()
        };
        self.perf_monitor.set_target_worker_num(worker_num);
    }

    fn stop_auto_scaling(&self) {
        self.state.request_stop();
    }

    fn suggested_stop(&self) -> bool {
        self.state.suggested_stop()
    }
}

impl PsAutoScaler {
    /// The shared started/stopped/suggested-stop state, for wiring a
    /// `CriticalNodeFailureCallback` onto the node manager
    pub fn state(&self) -> Arc<AutoScalerState> {
        self.state.clone()
    }
}
