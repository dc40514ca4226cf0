//! Declared per-type group resources and the node-meta factory
use super::node::{Node, NodeResource, NodeType, ALL_NODE_TYPES};
use crate::error::Error;
use regex::Regex;
use std::collections::HashMap;
use tracing::{event, Level};

/// The global ceiling every relaunch budget is clamped to
pub const MAX_RELAUNCH: u32 = 5;

/// A pod priority tag understood by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PodPriority {
    Low,
    High,
}

/// The declared resources and count for one node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResource {
    /// How many nodes of this type should exist
    pub count: u32,
    /// The per-node resource request for this type
    pub node_resource: NodeResource,
    /// The scheduling priority for this type
    pub priority: PodPriority,
}

impl GroupResource {
    /// Build a new group resource
    pub fn new(count: u32, node_resource: NodeResource, priority: PodPriority) -> Self {
        GroupResource {
            count,
            node_resource,
            priority,
        }
    }
}

/// Parse a resource request string like `"cpu=1,memory=4096Mi"` into a `NodeResource`
///
/// # Arguments
///
/// * `request` - The comma separated `key=value` resource request
pub fn parse_resource_request(request: &str) -> Result<NodeResource, Error> {
    let mut cpu: f32 = 0.0;
    let mut memory: u64 = 0;
    let mut gpu: Option<u32> = None;
    for pair in request.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim();
        match key {
            "cpu" => cpu = value.parse::<f32>()?,
            "memory" => memory = parse_memory(value)?,
            "gpu" => gpu = Some(value.parse::<u32>()?),
            _ => event!(Level::WARN, %key, "ignoring unknown resource request key"),
        }
    }
    Ok(NodeResource::new(cpu, memory, gpu))
}

/// Parse a memory value like `"4096Mi"` or `"2Gi"` into a MiB count
fn parse_memory(value: &str) -> Result<u64, Error> {
    if let Some(digits) = value.strip_suffix("Mi") {
        Ok(digits.parse::<u64>()?)
    } else if let Some(digits) = value.strip_suffix("Gi") {
        Ok(digits.parse::<u64>()? * 1024)
    } else {
        Ok(value.parse::<u64>()?)
    }
}

/// The declared resource shape of an entire job, by node type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResourceConfig {
    groups: HashMap<NodeType, GroupResource>,
    /// The node types in the order they were declared
    order: Vec<NodeType>,
}

impl JobResourceConfig {
    /// Build an empty job resource config
    pub fn new() -> Self {
        JobResourceConfig::default()
    }

    /// Declare a node group's resources, replacing any previous declaration
    /// for that type
    ///
    /// # Arguments
    ///
    /// * `node_type` - The node type this group declares
    /// * `count` - How many nodes of this type should exist
    /// * `resource_request` - The comma separated resource request string
    /// * `priority` - The scheduling priority for this type
    pub fn add_node_group_resource(
        &mut self,
        node_type: NodeType,
        count: u32,
        resource_request: &str,
        priority: PodPriority,
    ) -> Result<(), Error> {
        let node_resource = parse_resource_request(resource_request)?;
        if !self.groups.contains_key(&node_type) {
            self.order.push(node_type);
        }
        self.groups
            .insert(node_type, GroupResource::new(count, node_resource, priority));
        Ok(())
    }

    /// Replace an existing group's declaration with a new one, used by the
    /// auto-scaler to apply an optimizer's resource plan
    pub fn update_node_group_resource(&mut self, node_type: NodeType, group: GroupResource) {
        if !self.groups.contains_key(&node_type) {
            self.order.push(node_type);
        }
        self.groups.insert(node_type, group);
    }

    /// Get the currently declared group for a node type, if any
    pub fn get_node_group_resource(&self, node_type: NodeType) -> Option<&GroupResource> {
        self.groups.get(&node_type)
    }

    /// The node types declared in this config, in declaration order
    pub fn get_node_types(&self) -> Vec<NodeType> {
        self.order.clone()
    }

    /// The declared worker count
    pub fn worker_num(&self) -> u32 {
        self.groups.get(&NodeType::Worker).map(|g| g.count).unwrap_or(0)
    }

    /// The declared PS count
    pub fn ps_num(&self) -> u32 {
        self.groups.get(&NodeType::Ps).map(|g| g.count).unwrap_or(0)
    }

    /// The declared chief count
    pub fn chief_num(&self) -> u32 {
        self.groups.get(&NodeType::Chief).map(|g| g.count).unwrap_or(0)
    }

    /// Build the initial `type -> id -> Node` fleet map from this config
    ///
    /// # Arguments
    ///
    /// * `relaunch_on_worker_failure` - The relaunch budget given to worker
    ///   nodes (already clamped by the caller)
    pub fn init_job_node_meta(&self, relaunch_on_worker_failure: u32) -> HashMap<NodeType, HashMap<u32, Node>> {
        let mut fleet = HashMap::new();
        for node_type in ALL_NODE_TYPES {
            let Some(group) = self.groups.get(&node_type) else {
                continue;
            };
            let max_relaunch_count = match node_type {
                NodeType::Worker => relaunch_on_worker_failure,
                _ => 0,
            };
            let mut by_id = HashMap::new();
            for id in 0..group.count {
                by_id.insert(id, Node::new(node_type, id, group.node_resource, max_relaunch_count));
            }
            fleet.insert(node_type, by_id);
        }
        fleet
    }
}

/// The resolved critical-worker map: worker index -> its relaunch budget
pub type CriticalWorkerIndex = HashMap<u32, u32>;

/// Parse the `critical_worker_index` configuration value
///
/// # Arguments
///
/// * `raw` - One of the literals `"default"`/`"all"`, or a
///   `"idx:count/idx:count"` list of overrides
/// * `num_workers` - The declared worker count, used to expand `"all"`
pub fn get_critical_worker_index(raw: &str, num_workers: u32) -> Result<CriticalWorkerIndex, Error> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "default" {
        let mut map = HashMap::new();
        map.insert(0, 1);
        return Ok(map);
    }
    if raw == "all" {
        let mut map = HashMap::new();
        for idx in 0..num_workers {
            map.insert(idx, 1);
        }
        return Ok(map);
    }
    let pair = Regex::new(r"^(\d+):(\d+)$").expect("static regex is valid");
    let mut map = HashMap::new();
    for entry in raw.split('/') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let captures = pair
            .captures(entry)
            .ok_or_else(|| Error::new(format!("invalid critical_worker_index entry: {entry}")))?;
        let idx: u32 = captures[1].parse()?;
        let count: u32 = captures[2].parse()?;
        map.insert(idx, count);
    }
    Ok(map)
}

/// Mark critical nodes and apply per-node relaunch budget overrides in place
///
/// # Arguments
///
/// * `fleet` - The fleet map to mutate
/// * `critical_worker_index` - The resolved worker index -> budget overrides
/// * `ps_is_critical` - Whether every PS node should be marked critical
/// * `ps_relaunch_max_num` - The relaunch budget given to critical PS nodes
pub fn set_critical_node(
    fleet: &mut HashMap<NodeType, HashMap<u32, Node>>,
    critical_worker_index: &CriticalWorkerIndex,
    ps_is_critical: bool,
    ps_relaunch_max_num: u32,
) {
    let ps_relaunch_max_num = ps_relaunch_max_num.min(MAX_RELAUNCH);
    if ps_is_critical {
        if let Some(ps_nodes) = fleet.get_mut(&NodeType::Ps) {
            for node in ps_nodes.values_mut() {
                node.critical = true;
                node.max_relaunch_count = ps_relaunch_max_num;
            }
        }
    }
    if let Some(workers) = fleet.get_mut(&NodeType::Worker) {
        let num_workers = workers.len() as u32;
        for (idx, node) in workers.iter_mut() {
            match critical_worker_index.get(idx) {
                Some(max_relaunch_count) => {
                    node.critical = true;
                    node.max_relaunch_count = (*max_relaunch_count).min(MAX_RELAUNCH);
                }
                None => {
                    if *idx >= num_workers {
                        event!(Level::WARN, id = idx, num_workers, "critical worker index out of range, ignoring");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_resource_round_trips_count_and_resource() {
        let mut config = JobResourceConfig::new();
        config
            .add_node_group_resource(NodeType::Ps, 1, "cpu=1,memory=4096Mi", PodPriority::High)
            .unwrap();
        config
            .add_node_group_resource(NodeType::Worker, 3, "cpu=2,memory=8192Mi", PodPriority::Low)
            .unwrap();

        assert_eq!(config.get_node_types(), vec![NodeType::Ps, NodeType::Worker]);
        assert_eq!(config.ps_num(), 1);
        assert_eq!(config.worker_num(), 3);

        let fleet = config.init_job_node_meta(1);
        assert_eq!(fleet[&NodeType::Ps][&0].id, 0);
        assert_eq!(fleet[&NodeType::Ps][&0].node_type, NodeType::Ps);
        assert_eq!(fleet[&NodeType::Ps][&0].max_relaunch_count, 0);
        assert_eq!(fleet[&NodeType::Worker][&0].used_resource.cpu, 2.0);
        assert_eq!(fleet[&NodeType::Worker][&0].max_relaunch_count, 1);
    }

    #[test]
    fn critical_worker_index_default_is_chief_only() {
        let map = get_critical_worker_index("default", 3).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0], 1);
    }

    #[test]
    fn critical_worker_index_all_expands_across_workers() {
        let map = get_critical_worker_index("all", 3).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&0], 1);
        assert_eq!(map[&2], 1);
    }

    #[test]
    fn critical_worker_index_explicit_pair_is_not_expanded() {
        let map = get_critical_worker_index("0:3", 3).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[&0], 3);
    }

    #[test]
    fn set_critical_node_overrides_max_relaunch_count_from_map() {
        let mut config = JobResourceConfig::new();
        config
            .add_node_group_resource(NodeType::Ps, 1, "cpu=1,memory=4096Mi", PodPriority::High)
            .unwrap();
        config
            .add_node_group_resource(NodeType::Worker, 2, "cpu=1,memory=4096Mi", PodPriority::Low)
            .unwrap();
        let mut fleet = config.init_job_node_meta(0);

        let critical = get_critical_worker_index("0:3", 2).unwrap();
        set_critical_node(&mut fleet, &critical, true, 2);

        assert!(fleet[&NodeType::Ps][&0].critical);
        assert_eq!(fleet[&NodeType::Ps][&0].max_relaunch_count, 2);
        assert!(fleet[&NodeType::Worker][&0].critical);
        assert_eq!(fleet[&NodeType::Worker][&0].max_relaunch_count, 3);
        assert!(!fleet[&NodeType::Worker][&1].critical);
    }

    #[test]
    fn parse_resource_request_reads_cpu_memory_and_gpu() {
        let resource = parse_resource_request("cpu=2,memory=2Gi,gpu=1").unwrap();
        assert_eq!(resource.cpu, 2.0);
        assert_eq!(resource.memory, 2048);
        assert_eq!(resource.gpu, Some(1));
    }
}
