//! The core control-plane library: node model, manager, and auto-scalers
mod auto_scaler;
mod callbacks;
mod job_resource;
mod manager_common;
mod node;
mod node_manager;
mod optimizer;
mod plan;
mod ps_manager;
mod scheduler;
mod state_flow;
mod worker_manager;

pub use auto_scaler::{
    AllReduceAutoScaler, AutoScalerKind, AutoScalerState, DistributionStrategy, JobAutoScaler, PsAutoScaler,
    new_job_auto_scaler,
};
pub use callbacks::{CallbackBus, ClusterContext, CriticalNodeFailureCallback, NodeEventCallback};
pub use job_resource::{
    get_critical_worker_index, parse_resource_request, set_critical_node, CriticalWorkerIndex, GroupResource,
    JobResourceConfig, PodPriority, MAX_RELAUNCH,
};
pub use node::{EventType, ExitReason, Node, NodeEvent, NodeResource, NodeStatus, NodeType, ALL_NODE_TYPES};
pub use node_manager::{ClusterBinding, NodeManager, NodeManagerConfig, NodeWatcher};
pub use optimizer::{AlwaysReadyPerfMonitor, JobOptimizer, PerfMonitor, StaticJobOptimizer};
pub use plan::{NodeRef, NodeResourceSpec, NodeSpec, ResourcePlan, ScalePlan};
pub use ps_manager::PsManager;
pub use scheduler::{dry_run_resource, DryRunScheduler, Scaler};
pub use state_flow::{get_node_state_flow, NodeStateFlow, NODE_STATE_FLOWS};
pub use worker_manager::WorkerManager;
