//! Declarative diffs: the optimizer's intent and the scheduler's work order
use super::job_resource::GroupResource;
use super::node::{NodeResource, NodeType};
use std::collections::HashMap;

/// The optimizer's declarative intent: desired group resources and/or
/// per-node resource overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePlan {
    /// Desired group resources by node type
    pub node_group_resources: HashMap<NodeType, GroupResource>,
    /// Desired per-node resource overrides, keyed by node name
    pub node_resources: HashMap<String, NodeResource>,
}

impl ResourcePlan {
    /// Build an empty resource plan
    pub fn new() -> Self {
        ResourcePlan::default()
    }

    /// True iff both maps are empty
    pub fn is_empty(&self) -> bool {
        self.node_group_resources.is_empty() && self.node_resources.is_empty()
    }
}

/// A node to launch, as requested by a scale plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// The type of node to launch
    pub node_type: NodeType,
    /// The id to launch it under
    pub id: u32,
    /// The resource request to launch it with
    pub resource: NodeResourceSpec,
}

/// A plain, hashable/eq resource request carried on a `NodeSpec`
///
/// `NodeResource`'s `f32` field makes it non-`Eq`; `ScalePlan::merge`
/// needs to dedupe `NodeSpec`s by value, so launches carry this instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResourceSpec {
    /// CPU millicores requested
    pub cpu_millis: u32,
    /// Memory in MiB requested
    pub memory: u64,
    /// GPUs requested, if any
    pub gpu: Option<u32>,
}

impl From<NodeResource> for NodeResourceSpec {
    fn from(resource: NodeResource) -> Self {
        NodeResourceSpec {
            cpu_millis: (resource.cpu * 1000.0).round() as u32,
            memory: resource.memory,
            gpu: resource.gpu,
        }
    }
}

impl NodeSpec {
    /// Build a new node spec
    pub fn new(node_type: NodeType, id: u32, resource: NodeResource) -> Self {
        NodeSpec {
            node_type,
            id,
            resource: resource.into(),
        }
    }
}

/// A reference to a node to remove, as requested by a scale plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// The type of node to remove
    pub node_type: NodeType,
    /// The id of the node to remove
    pub id: u32,
}

impl NodeRef {
    /// Build a new node reference
    pub fn new(node_type: NodeType, id: u32) -> Self {
        NodeRef { node_type, id }
    }
}

/// The declarative diff handed to the external scheduler binding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalePlan {
    /// Nodes to launch
    pub launches: Vec<NodeSpec>,
    /// Nodes to remove
    pub removals: Vec<NodeRef>,
    /// The current PS addresses to hand to newly launched workers
    pub ps_addrs: Vec<String>,
}

impl ScalePlan {
    /// Build an empty scale plan
    pub fn new() -> Self {
        ScalePlan::default()
    }

    /// True iff there is nothing to launch or remove
    ///
    /// `ps_addrs` alone does not make a plan non-empty: an all-addresses,
    /// no-launches-or-removals plan implies no scaler call.
    pub fn is_empty(&self) -> bool {
        self.launches.is_empty() && self.removals.is_empty()
    }

    /// Merge `other` into `self`, concatenating and deduplicating launches,
    /// removals, and ps_addrs. Associative and idempotent modulo ordering.
    pub fn merge(&mut self, other: ScalePlan) {
        for launch in other.launches {
            if !self.launches.contains(&launch) {
                self.launches.push(launch);
            }
        }
        for removal in other.removals {
            if !self.removals.contains(&removal) {
                self.removals.push(removal);
            }
        }
        for addr in other.ps_addrs {
            if !self.ps_addrs.contains(&addr) {
                self.ps_addrs.push(addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ScalePlan {
        let mut plan = ScalePlan::new();
        plan.launches.push(NodeSpec::new(NodeType::Worker, 1, NodeResource::new(1.0, 1024, None)));
        plan.removals.push(NodeRef::new(NodeType::Worker, 0));
        plan.ps_addrs.push("ps-0:2222".into());
        plan
    }

    #[test]
    fn empty_merge_stays_empty() {
        let mut a = ScalePlan::new();
        a.merge(ScalePlan::new());
        assert!(a.is_empty());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = sample_plan();
        let b = sample_plan();
        a.merge(b);
        assert_eq!(a.launches.len(), 1);
        assert_eq!(a.removals.len(), 1);
        assert_eq!(a.ps_addrs.len(), 1);
    }

    #[test]
    fn merge_is_commutative_in_set_semantics() {
        let mut ab = sample_plan();
        let mut extra = ScalePlan::new();
        extra.launches.push(NodeSpec::new(NodeType::Worker, 2, NodeResource::new(1.0, 1024, None)));
        ab.merge(extra.clone());

        let mut ba = extra;
        ba.merge(sample_plan());

        let mut ab_launches = ab.launches.clone();
        let mut ba_launches = ba.launches.clone();
        ab_launches.sort_by_key(|l| l.id);
        ba_launches.sort_by_key(|l| l.id);
        assert_eq!(ab_launches, ba_launches);
    }

    #[test]
    fn resource_plan_empty_iff_both_maps_empty() {
        let mut plan = ResourcePlan::new();
        assert!(plan.is_empty());
        plan.node_resources.insert("worker-0".into(), NodeResource::default());
        assert!(!plan.is_empty());
    }
}
