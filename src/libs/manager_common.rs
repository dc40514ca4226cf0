//! Shared scale-diff logic between the PS and Worker managers
use super::job_resource::GroupResource;
use super::node::{Node, NodeType};
use super::plan::{NodeRef, ScalePlan};
use std::collections::HashMap;

/// Diff a live fleet against a desired group resource, producing launches
/// for ids not yet alive, removals for ids beyond the desired count, and
/// replace (removal + launch) pairs for ids whose live resource no longer
/// matches `desired.node_resource`
///
/// # Arguments
///
/// * `node_type` - The node type this diff is for
/// * `live` - The current live fleet of that type, by id
/// * `desired` - The group resource the caller wants the fleet to match
pub fn diff_to_match_count(node_type: NodeType, live: &HashMap<u32, Node>, desired: &GroupResource) -> ScalePlan {
    let mut plan = ScalePlan::new();
    let mut live_ids: Vec<u32> = live.keys().copied().collect();
    live_ids.sort_unstable();

    let live_count = live_ids.len() as u32;
    if desired.count > live_count {
        let next_id = live_ids.last().map(|id| id + 1).unwrap_or(0);
        for id in next_id..next_id + (desired.count - live_count) {
            plan.launches
                .push(super::plan::NodeSpec::new(node_type, id, desired.node_resource));
        }
    } else if desired.count < live_count {
        for id in live_ids.into_iter().skip(desired.count as usize) {
            plan.removals.push(NodeRef::new(node_type, id));
        }
    } else {
        for id in live_ids {
            let Some(node) = live.get(&id) else { continue };
            if node.used_resource != desired.node_resource {
                plan.removals.push(NodeRef::new(node_type, id));
                plan.launches
                    .push(super::plan::NodeSpec::new(node_type, id, desired.node_resource));
            }
        }
    }
    plan
}
