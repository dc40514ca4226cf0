//! Per-type scale/migrate primitives for parameter servers
use super::job_resource::GroupResource;
use super::manager_common::diff_to_match_count;
use super::node::{NodeResource, NodeType};
use super::node_manager::NodeManager;
use super::plan::ScalePlan;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owns PS-specific scale and migration primitives over a shared fleet
pub struct PsManager {
    node_manager: Arc<NodeManager>,
    migration_in_flight: AtomicBool,
}

impl PsManager {
    /// Build a new PS manager over a shared node manager
    pub fn new(node_manager: Arc<NodeManager>) -> Self {
        PsManager {
            node_manager,
            migration_in_flight: AtomicBool::new(false),
        }
    }

    /// Produce launches/removals to make the live PS count match `group.count`
    pub fn adjust_ps(&self, group: &GroupResource) -> ScalePlan {
        let live = self.node_manager.snapshot(NodeType::Ps);
        diff_to_match_count(NodeType::Ps, &live, group)
    }

    /// Schedule replacement PS nodes with new resources, marking a migration
    /// in-flight until the scaler confirms the swap
    pub fn migrate_parameter_servers(&self, targets: &std::collections::HashMap<String, NodeResource>) -> ScalePlan {
        let mut plan = ScalePlan::new();
        if targets.is_empty() {
            return plan;
        }
        self.migration_in_flight.store(true, Ordering::SeqCst);
        let live = self.node_manager.snapshot(NodeType::Ps);
        for (name, resource) in targets {
            if let Some(node) = live.values().find(|n| &n.name == name) {
                plan.launches.push(super::plan::NodeSpec::new(NodeType::Ps, node.id, *resource));
            }
        }
        plan
    }

    /// The current PS addresses, in ascending id order
    pub fn get_ps_addrs(&self) -> Vec<String> {
        let live = self.node_manager.snapshot(NodeType::Ps);
        let mut ids: Vec<u32> = live.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| live[&id].service_addr.clone()).collect()
    }

    /// True while a PS migration is in-flight
    pub fn exist_migrated_ps_nodes(&self) -> bool {
        self.migration_in_flight.load(Ordering::SeqCst)
    }

    /// Mark the in-flight migration complete
    pub fn clear_migration(&self) {
        self.migration_in_flight.store(false, Ordering::SeqCst);
    }

    /// On startup, rescale pods pending too long to a smaller CPU request to
    /// unblock admission. This manager has no pending-duration tracking of
    /// its own; callers that observe a pending timeout pass the affected
    /// node's new resource directly.
    pub fn reduce_pending_node_resource(&self, timed_out: &[(u32, NodeResource)]) -> ScalePlan {
        let mut plan = ScalePlan::new();
        for (id, resource) in timed_out {
            plan.launches.push(super::plan::NodeSpec::new(NodeType::Ps, *id, *resource));
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::job_resource::{JobResourceConfig, PodPriority};
    use crate::libs::node::NodeResource;
    use crate::libs::node_manager::NodeManagerConfig;
    use std::collections::HashMap;

    fn manager_with_ps(count: u32) -> Arc<NodeManager> {
        let mut job_resource = JobResourceConfig::new();
        job_resource
            .add_node_group_resource(NodeType::Ps, count, "cpu=1,memory=4096Mi", PodPriority::High)
            .unwrap();
        let config = NodeManagerConfig::new(
            job_resource,
            crate::libs::auto_scaler::DistributionStrategy::Ps,
            0,
            1,
            true,
            HashMap::new(),
            8192,
        );
        let manager = NodeManager::new(config, false);
        Arc::new(manager)
    }

    #[tokio::test]
    async fn adjust_ps_launches_when_scaling_up() {
        struct FixedBinding;
        #[async_trait::async_trait]
        impl crate::libs::node_manager::ClusterBinding for FixedBinding {
            async fn get_job_uuid(&self) -> Result<String, crate::error::Error> {
                Ok("job".into())
            }
            async fn get_service_address(
                &self,
                _node_type: NodeType,
                _id: u32,
            ) -> Result<Option<String>, crate::error::Error> {
                Ok(None)
            }
        }

        let node_manager = manager_with_ps(2);
        node_manager.start(&FixedBinding).await.unwrap();
        let ps_manager = PsManager::new(node_manager);

        let target = GroupResource::new(5, NodeResource::new(1.0, 4096, None), crate::libs::job_resource::PodPriority::High);
        let plan = ps_manager.adjust_ps(&target);
        assert_eq!(plan.launches.len(), 3);
    }

    #[tokio::test]
    async fn start_resolves_service_addresses_for_ps_addrs() {
        struct AddressingBinding;
        #[async_trait::async_trait]
        impl crate::libs::node_manager::ClusterBinding for AddressingBinding {
            async fn get_job_uuid(&self) -> Result<String, crate::error::Error> {
                Ok("job".into())
            }
            async fn get_service_address(
                &self,
                node_type: NodeType,
                id: u32,
            ) -> Result<Option<String>, crate::error::Error> {
                Ok(Some(format!("{node_type}-{id}.svc:2222")))
            }
        }

        let node_manager = manager_with_ps(2);
        node_manager.start(&AddressingBinding).await.unwrap();
        let ps_manager = PsManager::new(node_manager);

        let addrs = ps_manager.get_ps_addrs();
        assert_eq!(addrs, vec!["ps-0.svc:2222".to_string(), "ps-1.svc:2222".to_string()]);
    }

    #[test]
    fn migrate_parameter_servers_is_noop_on_empty_targets() {
        let node_manager = manager_with_ps(1);
        let ps_manager = PsManager::new(node_manager);
        assert!(!ps_manager.exist_migrated_ps_nodes());
        let plan = ps_manager.migrate_parameter_servers(&std::collections::HashMap::new());
        assert!(plan.is_empty());
        assert!(!ps_manager.exist_migrated_ps_nodes());
    }
}
