//! The node entity this master tracks and the events that mutate it
use chrono::prelude::*;
use std::fmt;

/// The different kinds of node a job can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A parameter server in an async-SGD job
    Ps,
    /// A worker that executes training steps
    Worker,
    /// The distinguished worker at index 0 in PS training
    Chief,
    /// Evaluates checkpoints produced by the job
    Evaluator,
    /// A TensorFlow estimator master node
    TfMaster,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            NodeType::Ps => "ps",
            NodeType::Worker => "worker",
            NodeType::Chief => "chief",
            NodeType::Evaluator => "evaluator",
            NodeType::TfMaster => "tf_master",
        };
        write!(f, "{name}")
    }
}

/// All the node types a job can ever contain, in a stable iteration order
pub const ALL_NODE_TYPES: [NodeType; 5] = [
    NodeType::Ps,
    NodeType::Worker,
    NodeType::Chief,
    NodeType::Evaluator,
    NodeType::TfMaster,
];

/// The lifecycle status of a node as reported by the cluster scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Created in our fleet map but never seen by the scheduler
    Initial,
    /// Scheduled but not yet running
    Pending,
    /// Actively running
    Running,
    /// Exited with a zero/expected result
    Succeeded,
    /// Exited with an error
    Failed,
    /// Removed from the scheduler
    Deleted,
}

/// Why a node exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// An unrecoverable error; never relaunch
    FatalError,
    /// Killed for exceeding its memory limit
    Oom,
    /// Killed by the scheduler (preemption, node drain, ...)
    Killed,
    /// No exit reason was reported
    #[default]
    Unknown,
}

/// The kind of change a `NodeEvent` carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A node was added to the scheduler
    Added,
    /// A node's status or info changed
    Modified,
    /// A node was removed from the scheduler
    Deleted,
}

/// The resources used or requested by a single node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeResource {
    /// CPU cores requested/used
    pub cpu: f32,
    /// Memory in MiB requested/used
    pub memory: u64,
    /// GPUs requested/used, if any
    pub gpu: Option<u32>,
}

impl NodeResource {
    /// Build a new node resource
    pub fn new(cpu: f32, memory: u64, gpu: Option<u32>) -> Self {
        NodeResource { cpu, memory, gpu }
    }
}

/// A single training process slot tracked by this master
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// This node's id, unique within its type
    pub id: u32,
    /// The kind of node this is
    pub node_type: NodeType,
    /// The scheduler-assigned name for this node
    pub name: String,
    /// This node's current status
    pub status: NodeStatus,
    /// Why this node last exited
    pub exit_reason: ExitReason,
    /// How many times we have relaunched this node
    pub relaunch_count: u32,
    /// The maximum number of times we are allowed to relaunch this node
    pub max_relaunch_count: u32,
    /// Whether this node's unrecoverable failure should stop the job
    pub critical: bool,
    /// Whether this node is eligible to be relaunched at all
    pub relaunchable: bool,
    /// Whether the scheduler has released/reclaimed this node's resources
    pub is_released: bool,
    /// Whether this node recovered from an OOM by being relaunched
    pub is_recovered_oom: bool,
    /// The resources this node is using or has requested
    pub used_resource: NodeResource,
    /// When this node started running
    pub start_time: Option<DateTime<Utc>>,
    /// When this node was created by the scheduler
    pub create_time: Option<DateTime<Utc>>,
    /// The address other nodes can reach this node at, once known
    pub service_addr: Option<String>,
}

impl Node {
    /// Create a new node in the `Initial` status
    ///
    /// # Arguments
    ///
    /// * `node_type` - The kind of node this is
    /// * `id` - This node's id, unique within its type
    /// * `used_resource` - The resources requested for this node
    /// * `max_relaunch_count` - The initial relaunch budget for this node
    pub fn new(node_type: NodeType, id: u32, used_resource: NodeResource, max_relaunch_count: u32) -> Self {
        Node {
            id,
            node_type,
            name: String::default(),
            status: NodeStatus::Initial,
            exit_reason: ExitReason::Unknown,
            relaunch_count: 0,
            max_relaunch_count,
            critical: false,
            relaunchable: true,
            is_released: false,
            is_recovered_oom: false,
            used_resource,
            start_time: None,
            create_time: None,
            service_addr: None,
        }
    }

    /// Whether this node is done for good: released and terminal, with
    /// no relaunch pending
    pub fn is_terminal(&self) -> bool {
        self.is_released
            && matches!(
                self.status,
                NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Deleted
            )
    }

    /// Update this node's scheduler-reported identity fields
    ///
    /// # Arguments
    ///
    /// * `name` - The scheduler-assigned name
    /// * `start_time` - When this node started running, if known
    /// * `create_time` - When this node was created, if known
    /// * `service_addr` - The address other nodes can reach this node at, if known
    pub fn update_info(
        &mut self,
        name: String,
        start_time: Option<DateTime<Utc>>,
        create_time: Option<DateTime<Utc>>,
        service_addr: Option<String>,
    ) {
        self.name = name;
        self.start_time = start_time;
        self.create_time = create_time;
        if service_addr.is_some() {
            self.service_addr = service_addr;
        }
    }

    /// Set this node's status, preserving the last-observed status even
    /// when no transition flow matches it
    pub fn update_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    /// Record why this node exited
    pub fn set_exit_reason(&mut self, reason: ExitReason) {
        self.exit_reason = reason;
    }

    /// Increment this node's relaunch count
    pub fn inc_relaunch_count(&mut self) {
        self.relaunch_count += 1;
    }
}

/// A single lifecycle change reported for a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    /// The kind of change this event carries
    pub event_type: EventType,
    /// A snapshot of the node as reported by the scheduler
    pub node: Node,
}

impl NodeEvent {
    /// Build a new node event
    pub fn new(event_type: EventType, node: Node) -> Self {
        NodeEvent { event_type, node }
    }
}
