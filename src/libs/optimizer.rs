//! External collaborators the core consumes but does not implement:
//! the performance monitor and the resource-plan optimizer
use super::node::NodeType;
use super::plan::ResourcePlan;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Tracks training throughput signals and worker-adjustment readiness
///
/// The real implementation collects step-time and rendezvous signals; this
/// crate only consumes its decisions.
pub trait PerfMonitor: Send + Sync {
    /// Record the worker count the optimizer is currently targeting
    fn set_target_worker_num(&self, worker_num: u32);
    /// Whether the last worker-count change has finished propagating
    fn worker_adjustment_finished(&self) -> bool;
    /// Reset the running performance window, called whenever the fleet shape changes
    fn reset_running_window(&self);
}

/// A `PerfMonitor` double that always reports the adjustment as finished,
/// suitable for driving the auto-scaler loops in tests
#[derive(Default)]
pub struct AlwaysReadyPerfMonitor {
    target_worker_num: AtomicU32,
    reset_count: AtomicU64,
}

impl AlwaysReadyPerfMonitor {
    /// Build a new always-ready perf monitor
    pub fn new() -> Self {
        AlwaysReadyPerfMonitor::default()
    }

    /// The last worker count the auto-scaler targeted
    pub fn target_worker_num(&self) -> u32 {
        self.target_worker_num.load(Ordering::SeqCst)
    }

    /// How many times the running window has been reset
    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::SeqCst)
    }
}

impl PerfMonitor for AlwaysReadyPerfMonitor {
    fn set_target_worker_num(&self, worker_num: u32) {
        self.target_worker_num.store(worker_num, Ordering::SeqCst);
    }

    fn worker_adjustment_finished(&self) -> bool {
        true
    }

    fn reset_running_window(&self) {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Produces declarative resource plans from performance signals
#[async_trait]
pub trait JobOptimizer: Send + Sync {
    /// Ask for a resource plan, or `None` if no change is recommended
    async fn get_job_resource_plan(&self) -> Option<ResourcePlan>;
    /// Record the number of alive nodes the all-reduce strategy observed,
    /// used to decide whether a proposed plan is actually an increase
    fn set_alive_node_num(&self, _node_type: NodeType, _alive: u32) {}
}

/// A `JobOptimizer` test double that always returns a fixed plan, then `None`
/// once `exhausted` — mirrors a scripted fixture, not a real optimizer
pub struct StaticJobOptimizer {
    plan: std::sync::Mutex<Option<ResourcePlan>>,
    exhausted: AtomicBool,
}

impl StaticJobOptimizer {
    /// Build an optimizer that returns `plan` exactly once
    pub fn new(plan: ResourcePlan) -> Self {
        StaticJobOptimizer {
            plan: std::sync::Mutex::new(Some(plan)),
            exhausted: AtomicBool::new(false),
        }
    }

    /// Build an optimizer that returns `plan` every time it is asked
    pub fn repeating(plan: ResourcePlan) -> RepeatingJobOptimizer {
        RepeatingJobOptimizer { plan }
    }
}

#[async_trait]
impl JobOptimizer for StaticJobOptimizer {
    async fn get_job_resource_plan(&self) -> Option<ResourcePlan> {
        if self.exhausted.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.plan.lock().expect("plan lock poisoned").take()
    }
}

/// A `JobOptimizer` test double that always returns the same plan
pub struct RepeatingJobOptimizer {
    plan: ResourcePlan,
}

#[async_trait]
impl JobOptimizer for RepeatingJobOptimizer {
    async fn get_job_resource_plan(&self) -> Option<ResourcePlan> {
        Some(self.plan.clone())
    }
}
