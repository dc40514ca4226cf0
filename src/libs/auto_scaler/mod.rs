//! Periodic optimizer loops that mutate the declared fleet
mod allreduce;
mod ps;

pub use allreduce::AllReduceAutoScaler;
pub use ps::PsAutoScaler;

use crate::error::Error;
use crate::libs::job_resource::JobResourceConfig;
use crate::libs::node_manager::NodeManager;
use crate::libs::optimizer::{JobOptimizer, PerfMonitor};
use crate::libs::ps_manager::PsManager;
use crate::libs::scheduler::Scaler;
use crate::libs::worker_manager::WorkerManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The distribution strategy a job declares, deciding which auto-scaler
/// variant `new_job_auto_scaler` builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionStrategy {
    Ps,
    AllReduce,
    Custom,
}

impl DistributionStrategy {
    /// Parse a configured strategy tag, defaulting to `Ps` for anything
    /// unrecognized (`"custom"` gets its own variant but is treated the
    /// same as `Ps` everywhere a relaunch budget or auto-scaler is built)
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "allreduce" => DistributionStrategy::AllReduce,
            "custom" => DistributionStrategy::Custom,
            _ => DistributionStrategy::Ps,
        }
    }
}

/// The concrete auto-scaler variant selected for a job's distribution
/// strategy
pub enum AutoScalerKind {
    /// Async-SGD training with parameter servers
    Ps(Arc<PsAutoScaler>),
    /// Synchronous, scale-up-only all-reduce training
    AllReduce(Arc<AllReduceAutoScaler>),
}

impl AutoScalerKind {
    /// Borrow the underlying variant through the shared `JobAutoScaler` interface
    pub fn as_job_auto_scaler(&self) -> &dyn JobAutoScaler {
        match self {
            AutoScalerKind::Ps(scaler) => scaler.as_ref(),
            AutoScalerKind::AllReduce(scaler) => scaler.as_ref(),
        }
    }

    /// The shared started/stopped/suggested-stop state, for wiring a
    /// `CriticalNodeFailureCallback` onto the node manager
    pub fn state(&self) -> Arc<AutoScalerState> {
        match self {
            AutoScalerKind::Ps(scaler) => scaler.state(),
            AutoScalerKind::AllReduce(scaler) => scaler.state(),
        }
    }
}

/// Build the concrete auto-scaler variant for a job's distribution strategy,
/// the way `create_node_manager`-style factories pick a concrete
/// implementation by strategy tag
#[allow(clippy::too_many_arguments)]
pub fn new_job_auto_scaler(
    strategy: DistributionStrategy,
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
) -> AutoScalerKind {
    match strategy {
        DistributionStrategy::AllReduce => AutoScalerKind::AllReduce(Arc::new(AllReduceAutoScaler::new(
            node_manager,
            job_resource,
            worker_manager,
            optimizer,
            perf_monitor,
            scaler,
        ))),
        DistributionStrategy::Ps | DistributionStrategy::Custom => AutoScalerKind::Ps(Arc::new(PsAutoScaler::new(
            node_manager,
            job_resource,
            ps_manager,
            worker_manager,
            optimizer,
            perf_monitor,
            scaler,
            auto_ps_enabled,
            auto_worker_enabled,
            seconds_interval_to_optimize,
        ))),
    }
}

/// Shared behavior of the PS and AllReduce auto-scaler variants
#[async_trait]
pub trait JobAutoScaler: Send + Sync {
    /// Start the auto-scaling loop(s); idempotent
    async fn start_auto_scaling(&self);
    /// Stop the auto-scaling loop(s) on the next tick
    fn stop_auto_scaling(&self);
    /// Whether an unrelaunchable critical node means the job should be stopped
    fn suggested_stop(&self) -> bool;
}

/// Common started/stopped bookkeeping shared by both auto-scaler variants,
/// mirroring the base class's `_autoscaling_started` flag and logging
#[derive(Default)]
pub struct AutoScalerState {
    autoscaling_started: AtomicBool,
    stop_requested: AtomicBool,
    suggested_stop: AtomicBool,
}

impl AutoScalerState {
    /// Build fresh, not-yet-started state
    pub fn new() -> Self {
        AutoScalerState::default()
    }

    /// Whether `start_auto_scaling` has already run
    pub fn autoscaling_started(&self) -> bool {
        self.autoscaling_started.load(Ordering::SeqCst)
    }

    /// Mark autoscaling as started; returns `true` if this call was the one
    /// that flipped the flag (i.e. the caller should actually spawn the loop)
    pub fn mark_started(&self) -> bool {
        self.autoscaling_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Request the loop stop on its next tick
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Flag that an up-layer should terminate the job
    pub fn set_suggested_stop(&self) {
        self.suggested_stop.store(true, Ordering::SeqCst);
    }

    /// Whether an up-layer has been asked to terminate the job
    pub fn suggested_stop(&self) -> bool {
        self.suggested_stop.load(Ordering::SeqCst)
    }
}

/// Log the shared "about to execute" line before a variant executes its own
/// plan semantics
pub fn log_execute_job_optimization_plan(plan: &crate::libs::plan::ResourcePlan) {
    tracing::event!(
        tracing::Level::INFO,
        groups = plan.node_group_resources.len(),
        node_overrides = plan.node_resources.len(),
        "execute job optimization plan"
    );
}

/// An `execute_job_optimization_plan` failure, propagated to the caller
/// while still returning the intended diff for retry
#[derive(Debug)]
pub struct ExecutionError {
    /// The underlying error
    pub error: Error,
    /// The scale plan that was being applied when the error occurred
    pub attempted: crate::libs::plan::ScalePlan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::job_resource::{JobResourceConfig, PodPriority};
    use crate::libs::node::NodeType;
    use crate::libs::node_manager::{ClusterBinding, NodeManagerConfig};
    use crate::libs::optimizer::{AlwaysReadyPerfMonitor, StaticJobOptimizer};
    use crate::libs::plan::ResourcePlan;
    use crate::libs::scheduler::DryRunScheduler;
    use std::collections::HashMap;

    #[test]
    fn distribution_strategy_parses_known_tags_and_defaults_to_ps() {
        assert_eq!(DistributionStrategy::parse("allreduce"), DistributionStrategy::AllReduce);
        assert_eq!(DistributionStrategy::parse("AllReduce"), DistributionStrategy::AllReduce);
        assert_eq!(DistributionStrategy::parse("custom"), DistributionStrategy::Custom);
        assert_eq!(DistributionStrategy::parse("ps"), DistributionStrategy::Ps);
        assert_eq!(DistributionStrategy::parse("unrecognized"), DistributionStrategy::Ps);
    }

    struct FixedBinding;
    #[async_trait::async_trait]
    impl ClusterBinding for FixedBinding {
        async fn get_job_uuid(&self) -> Result<String, Error> {
            Ok("job".into())
        }
        async fn get_service_address(&self, _node_type: NodeType, _id: u32) -> Result<Option<String>, Error> {
            Ok(None)
        }
    }

    async fn build_deps() -> (Arc<NodeManager>, JobResourceConfig, Arc<PsManager>, Arc<WorkerManager>) {
        let mut job_resource = JobResourceConfig::new();
        job_resource
            .add_node_group_resource(NodeType::Worker, 2, "cpu=1,memory=4096Mi", PodPriority::Low)
            .unwrap();
        let config = NodeManagerConfig::new(job_resource.clone(), DistributionStrategy::Ps, 0, 1, true, HashMap::new(), 8192);
        let node_manager = Arc::new(NodeManager::new(config, false));
        node_manager.start(&FixedBinding).await.unwrap();
        let ps_manager = Arc::new(PsManager::new(node_manager.clone()));
        let worker_manager = Arc::new(WorkerManager::new(node_manager.clone()));
        (node_manager, job_resource, ps_manager, worker_manager)
    }

    #[tokio::test]
    async fn factory_builds_ps_variant_for_ps_and_custom_strategies() {
        for strategy in [DistributionStrategy::Ps, DistributionStrategy::Custom] {
            let (node_manager, job_resource, ps_manager, worker_manager) = build_deps().await;
            let kind = new_job_auto_scaler(
                strategy,
                node_manager,
                job_resource,
                ps_manager,
                worker_manager,
                Arc::new(StaticJobOptimizer::repeating(ResourcePlan::new())),
                Arc::new(AlwaysReadyPerfMonitor::new()),
                Arc::new(DryRunScheduler::new()),
                true,
                true,
                0,
            );
            assert!(matches!(kind, AutoScalerKind::Ps(_)));
        }
    }

    #[tokio::test]
    async fn factory_builds_allreduce_variant_for_allreduce_strategy() {
        let (node_manager, job_resource, ps_manager, worker_manager) = build_deps().await;
        let kind = new_job_auto_scaler(
            DistributionStrategy::AllReduce,
            node_manager,
            job_resource,
            ps_manager,
            worker_manager,
            Arc::new(StaticJobOptimizer::repeating(ResourcePlan::new())),
            Arc::new(AlwaysReadyPerfMonitor::new()),
            Arc::new(DryRunScheduler::new()),
            true,
            true,
            0,
        );
        assert!(matches!(kind, AutoScalerKind::AllReduce(_)));
    }
}
