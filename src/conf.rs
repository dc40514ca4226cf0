//! Configuration recognized by the core, loaded from a YAML file with a
//! `DLROVER__`-prefixed environment overlay
use crate::error::Error;
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

fn default_seconds_interval_to_optimize() -> i64 {
    300
}

fn default_ps_is_critical() -> bool {
    true
}

fn default_ps_relaunch_max_num() -> u32 {
    1
}

fn default_relaunch_on_worker_failure() -> u32 {
    3
}

fn default_critical_worker_index() -> String {
    "default".to_string()
}

fn default_distribution_strategy() -> String {
    "ps".to_string()
}

fn default_max_memory() -> u64 {
    32 * 1024
}

fn default_pod_priority() -> String {
    String::new()
}

/// The declared resources for one node type, as read from config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConf {
    /// How many nodes of this type to launch
    pub num: u32,
    /// The comma separated resource request, e.g. `"cpu=1,memory=4096Mi"`
    pub resource_request: String,
    /// The scheduling priority; empty means the scheduler default
    #[serde(default = "default_pod_priority")]
    pub pod_priority: String,
}

/// The master's full configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conf {
    /// Whether the PS auto-scaler is allowed to scale PS nodes
    #[serde(default)]
    pub auto_ps_enabled: bool,
    /// Whether the PS auto-scaler is allowed to scale worker nodes
    #[serde(default)]
    pub auto_worker_enabled: bool,
    /// The lower bound, in seconds, between optimization plan requests
    #[serde(default = "default_seconds_interval_to_optimize")]
    pub seconds_interval_to_optimize: i64,
    /// Whether every PS node is critical
    #[serde(default = "default_ps_is_critical")]
    pub ps_is_critical: bool,
    /// The relaunch budget for critical PS nodes, clamped to `MAX_RELAUNCH`
    #[serde(default = "default_ps_relaunch_max_num")]
    pub ps_relaunch_max_num: u32,
    /// The relaunch budget for worker nodes, clamped to `MAX_RELAUNCH`
    #[serde(default = "default_relaunch_on_worker_failure")]
    pub relaunch_on_worker_failure: u32,
    /// `"default"`, `"all"`, or an `"idx:count/idx:count"` override list
    #[serde(default = "default_critical_worker_index")]
    pub critical_worker_index: String,
    /// `"ps"`, `"allreduce"`, or `"custom"`
    #[serde(default = "default_distribution_strategy")]
    pub distribution_strategy: String,
    /// The memory ceiling (MiB) used in OOM relaunch decisions
    #[serde(default = "default_max_memory")]
    pub max_memory: u64,
    /// The declared PS group, if this job has one
    pub ps: Option<GroupConf>,
    /// The declared worker group, if this job has one
    pub worker: Option<GroupConf>,
    /// The declared chief group, if this job has one
    pub chief: Option<GroupConf>,
    /// The declared evaluator group, if this job has one
    pub evaluator: Option<GroupConf>,
    /// The priority applied to evaluator pods; defaults to `"high"` unless
    /// explicitly `"low"`
    #[serde(default)]
    pub evaluator_pod_priority: Option<String>,
}

impl Conf {
    /// Load configuration from a YAML file, overlaid with any
    /// `DLROVER__`-prefixed environment variables
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let conf = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Yaml))
            .add_source(Environment::with_prefix("DLROVER").prefix_separator("__").separator("__"))
            .build()?;
        Ok(conf.try_deserialize()?)
    }

    /// The effective evaluator pod priority: `"low"` only if explicitly set,
    /// `"high"` otherwise
    pub fn evaluator_pod_priority(&self) -> &str {
        match self.evaluator_pod_priority.as_deref() {
            Some("low") => "low",
            _ => "high",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluator_pod_priority_defaults_to_high() {
        let conf = Conf {
            auto_ps_enabled: false,
            auto_worker_enabled: false,
            seconds_interval_to_optimize: 300,
            ps_is_critical: true,
            ps_relaunch_max_num: 1,
            relaunch_on_worker_failure: 3,
            critical_worker_index: "default".into(),
            distribution_strategy: "ps".into(),
            max_memory: 32768,
            ps: None,
            worker: None,
            chief: None,
            evaluator: None,
            evaluator_pod_priority: None,
        };
        assert_eq!(conf.evaluator_pod_priority(), "high");
    }

    #[test]
    fn evaluator_pod_priority_respects_explicit_low() {
        let mut conf_base = Conf {
            auto_ps_enabled: false,
            auto_worker_enabled: false,
            seconds_interval_to_optimize: 300,
            ps_is_critical: true,
            ps_relaunch_max_num: 1,
            relaunch_on_worker_failure: 3,
            critical_worker_index: "default".into(),
            distribution_strategy: "ps".into(),
            max_memory: 32768,
            ps: None,
            worker: None,
            chief: None,
            evaluator: None,
            evaluator_pod_priority: Some("low".into()),
        };
        assert_eq!(conf_base.evaluator_pod_priority(), "low");
        conf_base.evaluator_pod_priority = Some("anything-else".into());
        assert_eq!(conf_base.evaluator_pod_priority(), "high");
    }
}
