//! The external scheduler-facing scaler this crate drives but does not implement
use super::node::{Node, NodeEvent, NodeResource, NodeType};
use super::node_manager::{ClusterBinding, NodeWatcher};
use super::plan::ScalePlan;
use crate::error::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// The external scaler that turns a `ScalePlan` into real cluster changes
#[async_trait]
pub trait Scaler: Send + Sync {
    /// Apply a scale plan; a no-op plan should still be accepted
    async fn scale(&self, plan: ScalePlan) -> Result<(), Error>;
}

/// A `Scaler`/`NodeWatcher`/`ClusterBinding` test double that records every
/// call instead of touching a real cluster, mirroring a dry-run scheduler
/// fixture used to drive auto-scaler and node-manager tests
pub struct DryRunScheduler {
    state: Mutex<DryRunState>,
}

#[derive(Default)]
struct DryRunState {
    nodes: HashMap<NodeType, HashMap<u32, Node>>,
    scale_calls: Vec<ScalePlan>,
    pending_events: Vec<NodeEvent>,
}

impl DryRunScheduler {
    /// Build an empty dry-run scheduler
    pub fn new() -> Self {
        DryRunScheduler {
            state: Mutex::new(DryRunState::default()),
        }
    }

    /// Seed a node into the scheduler's view, as if it were already running
    pub fn seed(&self, node: Node) {
        let mut state = self.state.lock().expect("dry-run lock poisoned");
        state.nodes.entry(node.node_type).or_default().insert(node.id, node);
    }

    /// Queue an event for the next `watch()` call to return
    pub fn queue_event(&self, event: NodeEvent) {
        self.state.lock().expect("dry-run lock poisoned").pending_events.push(event);
    }

    /// Every `ScalePlan` ever passed to `scale()`, in call order
    pub fn scale_calls(&self) -> Vec<ScalePlan> {
        self.state.lock().expect("dry-run lock poisoned").scale_calls.clone()
    }

    /// How many times `scale()` was called
    pub fn scale_call_count(&self) -> usize {
        self.state.lock().expect("dry-run lock poisoned").scale_calls.len()
    }
}

impl Default for DryRunScheduler {
    fn default() -> Self {
        DryRunScheduler::new()
    }
}

#[async_trait]
impl Scaler for DryRunScheduler {
    async fn scale(&self, plan: ScalePlan) -> Result<(), Error> {
        self.state.lock().expect("dry-run lock poisoned").scale_calls.push(plan);
        Ok(())
    }
}

#[async_trait]
impl NodeWatcher for DryRunScheduler {
    async fn list(&self) -> Result<Vec<Node>, Error> {
        let state = self.state.lock().expect("dry-run lock poisoned");
        Ok(state.nodes.values().flat_map(|by_id| by_id.values().cloned()).collect())
    }

    async fn watch(&self) -> Result<NodeEvent, Error> {
        loop {
            {
                let mut state = self.state.lock().expect("dry-run lock poisoned");
                if !state.pending_events.is_empty() {
                    return Ok(state.pending_events.remove(0));
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl ClusterBinding for DryRunScheduler {
    async fn get_job_uuid(&self) -> Result<String, Error> {
        Ok("dry-run-job".to_string())
    }

    async fn get_service_address(&self, node_type: NodeType, id: u32) -> Result<Option<String>, Error> {
        Ok(Some(format!("{node_type}-{id}:2222")))
    }
}

/// A convenience constructor matching the `NodeResource` shape the dry-run
/// scheduler's seeded nodes expect, for callers building fixtures inline
pub fn dry_run_resource(cpu: f32, memory: u64) -> NodeResource {
    NodeResource::new(cpu, memory, None)
}
