//! The all-reduce auto-scaler strategy for synchronous training: scale-up only
use super::{log_execute_job_optimization_plan, AutoScalerState, JobAutoScaler};
use crate::libs::job_resource::JobResourceConfig;
use crate::libs::node::{NodeStatus, NodeType};
use crate::libs::node_manager::NodeManager;
use crate::libs::optimizer::{JobOptimizer, PerfMonitor};
use crate::libs::plan::ResourcePlan;
use crate::libs::scheduler::Scaler;
use crate::libs::worker_manager::WorkerManager;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{event, instrument, Level};

const SCALE_INTERVAL: Duration = Duration::from_secs(1800);

/// Node statuses counted as "alive" when deciding the current worker count
const ALIVE_STATUSES: [NodeStatus; 4] = [
    NodeStatus::Running,
    NodeStatus::Pending,
    NodeStatus::Initial,
    NodeStatus::Succeeded,
];

/// The all-reduce auto-scaler strategy: only ever grows the worker group,
/// never shrinks it
pub struct AllReduceAutoScaler {
    state: Arc<AutoScalerState>,
    node_manager: Arc<NodeManager>,
    job_resource: Mutex<JobResourceConfig>,
    worker_manager: Arc<WorkerManager>,
    optimizer: Arc<dyn JobOptimizer>,
    perf_monitor: Arc<dyn PerfMonitor>,
    scaler: Arc<dyn Scaler>,
}

impl AllReduceAutoScaler {
    /// Build a new all-reduce auto-scaler
    pub fn new(
        node_manager: Arc<NodeManager>,
        job_resource: JobResourceConfig,
        worker_manager: Arc<WorkerManager>,
        optimizer: Arc<dyn JobOptimizer>,
        perf_monitor: Arc<dyn PerfMonitor>,
        scaler: Arc<dyn Scaler>,
    ) -> Self {
        AllReduceAutoScaler {
            state: Arc::new(AutoScalerState::new()),
            node_manager,
            job_resource: Mutex::new(job_resource),
            worker_manager,
            optimizer,
            perf_monitor,
            scaler,
        }
    }

    /// Runs every `scale_interval`: counts alive workers, asks the optimizer
    /// for a plan, and skips any plan that would not grow the worker group
    #[instrument(skip_all)]
    pub async fn run_optimization_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(SCALE_INTERVAL).await;
            if self.state.stop_requested() {
                return;
            }

            let alive = self.node_manager.count_in_status(NodeType::Worker, &ALIVE_STATUSES);
            self.optimizer.set_alive_node_num(NodeType::Worker, alive);

            let Some(plan) = self.optimizer.get_job_resource_plan().await else {
                continue;
            };
            let Some(worker_group) = plan.node_group_resources.get(&NodeType::Worker) else {
                continue;
            };
            if worker_group.count <= alive {
                event!(Level::INFO, proposed = worker_group.count, alive, "plan does not grow worker group, skipping");
                continue;
            }

            if let Err(err) = self.execute_job_optimization_plan(plan).await {
                event!(Level::ERROR, error = %err.error, "optimization cycle failed, continuing");
            }
        }
    }

    /// Apply a resource plan that only touches the WORKER group. On scaler
    /// failure, the attempted plan is returned alongside the error for retry.
    #[instrument(skip_all, err(Debug))]
    async fn execute_job_optimization_plan(&self, plan: ResourcePlan) -> Result<(), super::ExecutionError> {
        if plan.is_empty() {
            return Ok(());
        }
        log_execute_job_optimization_plan(&plan);

        let Some(group) = plan.node_group_resources.get(&NodeType::Worker) else {
            return Ok(());
        };
        let resolved = {
            let mut job_resource = self.job_resource.lock().expect("job_resource lock poisoned");
            job_resource.update_node_group_resource(NodeType::Worker, group.clone());
            job_resource.get_node_group_resource(NodeType::Worker).cloned().unwrap_or_else(|| group.clone())
        };
        self.perf_monitor.set_target_worker_num(resolved.count);

        let mut scale_plan = self.worker_manager.adjust_worker(&resolved);
        if scale_plan.is_empty() {
            return Ok(());
        }
        scale_plan.ps_addrs = Vec::new();
        self.scaler.scale(scale_plan.clone()).await.map_err(|error| super::ExecutionError {
            error,
            attempted: scale_plan,
        })
    }
}

#[async_trait]
impl JobAutoScaler for AllReduceAutoScaler {
    async fn start_auto_scaling(&self) {
        self.state.mark_started();
    }

    fn stop_auto_scaling(&self) {
        self.state.request_stop();
    }

    fn suggested_stop(&self) -> bool {
        self.state.suggested_stop()
    }
}

impl AllReduceAutoScaler {
    /// The shared started/stopped/suggested-stop state, for wiring a
    /// `CriticalNodeFailureCallback` onto the node manager
    pub fn state(&self) -> Arc<AutoScalerState> {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::job_resource::PodPriority;
    use crate::libs::node::NodeResource;
    use crate::libs::node_manager::{ClusterBinding, NodeManagerConfig};
    use crate::libs::optimizer::{AlwaysReadyPerfMonitor, StaticJobOptimizer};
    use crate::libs::scheduler::DryRunScheduler;
    use crate::libs::auto_scaler::DistributionStrategy;
    use std::collections::HashMap;

    struct FixedBinding;
    #[async_trait::async_trait]
    impl ClusterBinding for FixedBinding {
        async fn get_job_uuid(&self) -> Result<String, crate::error::Error> {
            Ok("job".into())
        }
        async fn get_service_address(&self, _node_type: NodeType, _id: u32) -> Result<Option<String>, crate::error::Error> {
            Ok(None)
        }
    }

    async fn build_scaler(worker_count: u32) -> (Arc<AllReduceAutoScaler>, Arc<AlwaysReadyPerfMonitor>, Arc<DryRunScheduler>) {
        let mut job_resource = JobResourceConfig::new();
        job_resource
            .add_node_group_resource(NodeType::Worker, worker_count, "cpu=1,memory=4096Mi", PodPriority::Low)
            .unwrap();
        let config = NodeManagerConfig::new(job_resource.clone(), DistributionStrategy::AllReduce, 0, 1, false, HashMap::new(), 8192);
        let node_manager = Arc::new(NodeManager::new(config, false));
        node_manager.start(&FixedBinding).await.unwrap();
        let worker_manager = Arc::new(WorkerManager::new(node_manager.clone()));
        let perf_monitor = Arc::new(AlwaysReadyPerfMonitor::new());
        let scheduler = Arc::new(DryRunScheduler::new());
        let optimizer = Arc::new(StaticJobOptimizer::repeating(ResourcePlan::new()));
        let auto_scaler = Arc::new(AllReduceAutoScaler::new(
            node_manager,
            job_resource,
            worker_manager,
            optimizer,
            perf_monitor.clone(),
            scheduler.clone(),
        ));
        (auto_scaler, perf_monitor, scheduler)
    }

    // S5 — AllReduce scale-up only
    #[tokio::test]
    async fn alive_count_reflects_seeded_worker_group() {
        let (auto_scaler, _perf_monitor, _scheduler) = build_scaler(4).await;
        let alive = auto_scaler.node_manager.count_in_status(NodeType::Worker, &ALIVE_STATUSES);
        assert_eq!(alive, 4);
    }

    #[tokio::test]
    async fn plan_above_alive_count_grows_worker_group() {
        let (auto_scaler, perf_monitor, scheduler) = build_scaler(4).await;
        let mut plan = ResourcePlan::new();
        plan.node_group_resources.insert(
            NodeType::Worker,
            crate::libs::job_resource::GroupResource::new(6, NodeResource::new(1.0, 4096, None), PodPriority::Low),
        );
        auto_scaler.execute_job_optimization_plan(plan).await.unwrap();
        assert_eq!(perf_monitor.target_worker_num(), 6);
        assert_eq!(scheduler.scale_call_count(), 1);
    }
}
