//! Shared fixtures for downstream integration tests, gated behind the
//! `test-utilities` feature
use crate::libs::{
    get_critical_worker_index, DistributionStrategy, JobResourceConfig, NodeManager, NodeManagerConfig, NodeType,
    PodPriority,
};
use std::collections::HashMap;

/// Build a small three-worker, one-PS job resource config for tests
pub fn sample_job_resource() -> JobResourceConfig {
    let mut job_resource = JobResourceConfig::new();
    job_resource
        .add_node_group_resource(NodeType::Ps, 1, "cpu=1,memory=4096Mi", PodPriority::High)
        .expect("static resource request is valid");
    job_resource
        .add_node_group_resource(NodeType::Worker, 3, "cpu=1,memory=4096Mi", PodPriority::Low)
        .expect("static resource request is valid");
    job_resource
}

/// Build a `NodeManager` over `sample_job_resource()` with every worker
/// critical and a relaunch budget of 1
pub fn sample_node_manager() -> NodeManager {
    let job_resource = sample_job_resource();
    let critical = get_critical_worker_index("all", job_resource.worker_num()).expect("static literal is valid");
    let config = NodeManagerConfig::new(job_resource, DistributionStrategy::Ps, 1, 1, true, critical, 8192);
    NodeManager::new(config, true)
}

/// An empty critical-worker-index map, for tests that want no critical workers
pub fn no_critical_workers() -> HashMap<u32, u32> {
    HashMap::new()
}
