//! Per-type scale/migrate primitives for workers
use super::job_resource::GroupResource;
use super::manager_common::diff_to_match_count;
use super::node::{NodeResource, NodeType};
use super::node_manager::NodeManager;
use super::plan::{NodeSpec, ScalePlan};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns worker-specific scale and migration primitives over a shared fleet
pub struct WorkerManager {
    node_manager: Arc<NodeManager>,
}

impl WorkerManager {
    /// Build a new worker manager over a shared node manager
    pub fn new(node_manager: Arc<NodeManager>) -> Self {
        WorkerManager { node_manager }
    }

    /// Produce launches/removals to make the live worker count match `group.count`
    pub fn adjust_worker(&self, group: &GroupResource) -> ScalePlan {
        let live = self.node_manager.snapshot(NodeType::Worker);
        diff_to_match_count(NodeType::Worker, &live, group)
    }

    /// Schedule replacement workers with new resources
    pub fn migrate_workers(&self, targets: &HashMap<String, NodeResource>) -> ScalePlan {
        let mut plan = ScalePlan::new();
        let live = self.node_manager.snapshot(NodeType::Worker);
        for (name, resource) in targets {
            if let Some(node) = live.values().find(|n| &n.name == name) {
                plan.launches.push(NodeSpec::new(NodeType::Worker, node.id, *resource));
            }
        }
        plan
    }

    /// On startup, rescale pods pending too long to a smaller CPU request
    pub fn reduce_pending_node_resource(&self, timed_out: &[(u32, NodeResource)]) -> ScalePlan {
        let mut plan = ScalePlan::new();
        for (id, resource) in timed_out {
            plan.launches.push(NodeSpec::new(NodeType::Worker, *id, *resource));
        }
        plan
    }
}
