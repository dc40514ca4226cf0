//! Entrypoint for the dlrover master control plane
use clap::Parser;
use dlrover_master::args::Args;
use dlrover_master::conf::Conf;
use dlrover_master::libs::{
    get_critical_worker_index, new_job_auto_scaler, AlwaysReadyPerfMonitor, AutoScalerKind, CriticalNodeFailureCallback,
    DistributionStrategy, DryRunScheduler, JobResourceConfig, NodeManager, NodeManagerConfig, NodeType, PodPriority,
    PsManager, StaticJobOptimizer, WorkerManager,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn pod_priority(raw: &str) -> PodPriority {
    match raw {
        "low" => PodPriority::Low,
        _ => PodPriority::High,
    }
}

fn build_job_resource(conf: &Conf) -> Result<JobResourceConfig, dlrover_master::Error> {
    let mut job_resource = JobResourceConfig::new();
    if let Some(ps) = &conf.ps {
        job_resource.add_node_group_resource(NodeType::Ps, ps.num, &ps.resource_request, pod_priority(&ps.pod_priority))?;
    }
    if let Some(worker) = &conf.worker {
        job_resource.add_node_group_resource(
            NodeType::Worker,
            worker.num,
            &worker.resource_request,
            pod_priority(&worker.pod_priority),
        )?;
    }
    if let Some(chief) = &conf.chief {
        job_resource.add_node_group_resource(
            NodeType::Chief,
            chief.num,
            &chief.resource_request,
            pod_priority(&chief.pod_priority),
        )?;
    }
    if let Some(evaluator) = &conf.evaluator {
        job_resource.add_node_group_resource(
            NodeType::Evaluator,
            evaluator.num,
            &evaluator.resource_request,
            pod_priority(conf.evaluator_pod_priority()),
        )?;
    }
    Ok(job_resource)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let conf = Conf::new(&args.config).expect("failed to load master configuration");

    let job_resource = build_job_resource(&conf).expect("failed to build job resource config from configuration");
    let num_workers = job_resource.worker_num();
    let critical_worker_index =
        get_critical_worker_index(&conf.critical_worker_index, num_workers).expect("invalid critical_worker_index");

    let strategy = DistributionStrategy::parse(&conf.distribution_strategy);
    let manager_config = NodeManagerConfig::new(
        job_resource.clone(),
        strategy,
        conf.relaunch_on_worker_failure,
        conf.ps_relaunch_max_num,
        conf.ps_is_critical,
        critical_worker_index,
        conf.max_memory,
    );
    let node_manager = Arc::new(NodeManager::new(manager_config, true));

    let scheduler = Arc::new(DryRunScheduler::new());
    node_manager.start(scheduler.as_ref()).await.expect("node manager failed to start");

    let ps_manager = Arc::new(PsManager::new(node_manager.clone()));
    let worker_manager = Arc::new(WorkerManager::new(node_manager.clone()));
    let perf_monitor = Arc::new(AlwaysReadyPerfMonitor::new());

    let monitor_handle = {
        let node_manager = node_manager.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move { node_manager.monitor_loop(scheduler.as_ref()).await })
    };

    let optimizer = Arc::new(StaticJobOptimizer::new(dlrover_master::libs::ResourcePlan::new()));
    let auto_scaler_kind = new_job_auto_scaler(
        strategy,
        node_manager.clone(),
        job_resource,
        ps_manager,
        worker_manager,
        optimizer,
        perf_monitor,
        scheduler,
        conf.auto_ps_enabled,
        conf.auto_worker_enabled,
        conf.seconds_interval_to_optimize,
    );

    use dlrover_master::libs::JobAutoScaler;
    auto_scaler_kind.as_job_auto_scaler().start_auto_scaling().await;
    let critical_callback = Box::new(CriticalNodeFailureCallback::new(auto_scaler_kind.state()));
    node_manager.add_pod_event_callback(critical_callback);

    match auto_scaler_kind {
        AutoScalerKind::Ps(auto_scaler) => {
            tokio::spawn({
                let auto_scaler = auto_scaler.clone();
                async move { auto_scaler.run_pending_node_reducer().await }
            });
            tokio::spawn(auto_scaler.run_optimization_loop());
        }
        AutoScalerKind::AllReduce(auto_scaler) => {
            tokio::spawn(auto_scaler.run_optimization_loop());
        }
    }

    monitor_handle.await?;
    Ok(())
}
