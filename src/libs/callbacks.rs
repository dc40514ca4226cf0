//! The event-callback bus fanned out to on node lifecycle transitions
use super::node::{Node, NodeStatus};
use super::node_manager::NodeManager;
use super::state_flow::NodeStateFlow;

/// A handle passed to listeners alongside a node snapshot
///
/// Carries a non-owning reference to the manager so listeners can look
/// fleet state back up without the manager owning its own listeners.
pub struct ClusterContext<'a> {
    node_manager: &'a NodeManager,
}

impl<'a> ClusterContext<'a> {
    /// Build a new cluster context wrapping a manager reference
    pub fn new(node_manager: &'a NodeManager) -> Self {
        ClusterContext { node_manager }
    }

    /// Borrow the node manager this context was built from
    pub fn node_manager(&self) -> &NodeManager {
        self.node_manager
    }
}

/// A subscriber notified of node lifecycle transitions
///
/// Implementations must be non-blocking: they are invoked while the
/// manager's fleet lock is held.
pub trait NodeEventCallback: Send + Sync {
    /// Called when a node's flow routes it to RUNNING
    fn on_node_started(&self, _node: &Node, _ctx: &ClusterContext) {}
    /// Called when a node's flow routes it to SUCCEEDED
    fn on_node_succeeded(&self, _node: &Node, _ctx: &ClusterContext) {}
    /// Called when a node's flow routes it to FAILED
    fn on_node_failed(&self, _node: &Node, _ctx: &ClusterContext) {}
    /// Called when a node's flow routes it to DELETED from a non-terminal status
    fn on_node_deleted(&self, _node: &Node, _ctx: &ClusterContext) {}
}

/// The set of subscribed listeners, dispatched in subscription order
#[derive(Default)]
pub struct CallbackBus {
    listeners: Vec<Box<dyn NodeEventCallback>>,
}

impl CallbackBus {
    /// Build an empty callback bus
    pub fn new() -> Self {
        CallbackBus::default()
    }

    /// Subscribe a new listener
    pub fn add(&mut self, callback: Box<dyn NodeEventCallback>) {
        self.listeners.push(callback);
    }

    /// Dispatch `node` to every listener according to the flow's `to_status`,
    /// per the exact mapping in the callback dispatch table
    pub fn dispatch(&self, flow: &NodeStateFlow, node: &Node, ctx: &ClusterContext) {
        match flow.to_status {
            NodeStatus::Running => {
                for listener in &self.listeners {
                    listener.on_node_started(node, ctx);
                }
            }
            NodeStatus::Succeeded => {
                for listener in &self.listeners {
                    listener.on_node_succeeded(node, ctx);
                }
            }
            NodeStatus::Failed => {
                for listener in &self.listeners {
                    listener.on_node_failed(node, ctx);
                }
            }
            NodeStatus::Deleted => {
                if !matches!(flow.from_status, NodeStatus::Failed | NodeStatus::Succeeded) {
                    for listener in &self.listeners {
                        listener.on_node_deleted(node, ctx);
                    }
                }
            }
            NodeStatus::Initial | NodeStatus::Pending => {}
        }
    }
}

/// A listener that flags `suggested_stop` on an auto-scaler when a critical
/// node fails with no relaunch left, matching the up-layer-terminates-the-job
/// behavior described for unrelaunchable critical nodes
pub struct CriticalNodeFailureCallback {
    state: std::sync::Arc<super::auto_scaler::AutoScalerState>,
}

impl CriticalNodeFailureCallback {
    /// Build a callback that flags `state` when a critical node is exhausted
    pub fn new(state: std::sync::Arc<super::auto_scaler::AutoScalerState>) -> Self {
        CriticalNodeFailureCallback { state }
    }
}

impl NodeEventCallback for CriticalNodeFailureCallback {
    fn on_node_failed(&self, node: &Node, _ctx: &ClusterContext) {
        if node.critical && node.relaunch_count >= node.max_relaunch_count {
            self.state.set_suggested_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::node::{EventType, NodeResource, NodeType};
    use crate::libs::node_manager::NodeManager;
    use crate::libs::state_flow::get_node_state_flow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCallback {
        started: Arc<AtomicUsize>,
        deleted: Arc<AtomicUsize>,
    }

    impl NodeEventCallback for CountingCallback {
        fn on_node_started(&self, _node: &Node, _ctx: &ClusterContext) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_node_deleted(&self, _node: &Node, _ctx: &ClusterContext) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_routes_running_to_started_only() {
        let started = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));
        let mut bus = CallbackBus::new();
        bus.add(Box::new(CountingCallback {
            started: started.clone(),
            deleted: deleted.clone(),
        }));

        let manager = NodeManager::new_empty_for_test();
        let ctx = ClusterContext::new(&manager);
        let node = Node::new(NodeType::Worker, 0, NodeResource::default(), 1);
        let flow = get_node_state_flow(NodeStatus::Pending, EventType::Modified, NodeStatus::Running).unwrap();

        bus.dispatch(flow, &node, &ctx);

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_suppresses_deleted_from_succeeded() {
        let started = Arc::new(AtomicUsize::new(0));
        let deleted = Arc::new(AtomicUsize::new(0));
        let mut bus = CallbackBus::new();
        bus.add(Box::new(CountingCallback {
            started: started.clone(),
            deleted: deleted.clone(),
        }));

        let manager = NodeManager::new_empty_for_test();
        let ctx = ClusterContext::new(&manager);
        let node = Node::new(NodeType::Worker, 0, NodeResource::default(), 1);
        let flow = get_node_state_flow(NodeStatus::Succeeded, EventType::Deleted, NodeStatus::Deleted).unwrap();

        bus.dispatch(flow, &node, &ctx);

        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn critical_node_failure_flags_suggested_stop_when_budget_exhausted() {
        let state = Arc::new(super::super::auto_scaler::AutoScalerState::new());
        let callback = CriticalNodeFailureCallback::new(state.clone());

        let manager = NodeManager::new_empty_for_test();
        let ctx = ClusterContext::new(&manager);

        let mut node = Node::new(NodeType::Ps, 0, NodeResource::default(), 2);
        node.critical = true;
        node.relaunch_count = 2;
        callback.on_node_failed(&node, &ctx);

        assert!(state.suggested_stop());
    }

    #[test]
    fn non_critical_node_failure_does_not_flag_suggested_stop() {
        let state = Arc::new(super::super::auto_scaler::AutoScalerState::new());
        let callback = CriticalNodeFailureCallback::new(state.clone());

        let manager = NodeManager::new_empty_for_test();
        let ctx = ClusterContext::new(&manager);

        let node = Node::new(NodeType::Worker, 0, NodeResource::default(), 2);
        callback.on_node_failed(&node, &ctx);

        assert!(!state.suggested_stop());
    }
}
