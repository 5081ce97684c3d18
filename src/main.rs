use ant_cluster::config::{NodeList, Settings};
use ant_cluster::coordination::memory::MemoryCoordination;
use ant_cluster::election::coordinator::ElectionCoordinator;
use ant_cluster::election::work_group::WorkGroupManager;
use ant_cluster::gossip::dedup::BloomSet;
use ant_cluster::gossip::handlers::{
    handle_added_to_view, handle_disseminate, handle_get_data, handle_hello, handle_view,
};
use ant_cluster::gossip::heartbeat::HeartbeatScheduler;
use ant_cluster::gossip::protocol::{
    ENDPOINT_ADDED_TO_VIEW, ENDPOINT_DATA, ENDPOINT_DISSEMINATE, ENDPOINT_HELLO, ENDPOINT_VIEW,
};
use ant_cluster::gossip::service::{DeferredAction, GossipService};
use ant_cluster::gossip::types::{Node, NodeId, NodeStatus, StatusCell, View};
use ant_cluster::job::handlers::{
    handle_job_done, handle_job_result, handle_job_task, handle_new_job, handle_recruit,
};
use ant_cluster::job::protocol::{
    ENDPOINT_JOB_DONE, ENDPOINT_JOB_RESULT, ENDPOINT_JOB_TASK, ENDPOINT_NEW_JOB, ENDPOINT_RECRUIT,
};
use ant_cluster::job::runner::JobRunner;
use ant_cluster::job::service::JobService;
use ant_cluster::rpc::PeerClient;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut bind: Option<String> = None;
    let mut seeds: Vec<NodeId> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind = Some(args[i + 1].clone());
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                seeds.push(NodeId(args[i + 1].clone()));
                i += 2;
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: {} [--config <settings.json>] [--bind <addr:port>] [--seed <addr:port>]...",
                    args[0]
                );
                eprintln!("Example: {} --bind 127.0.0.1:33000", args[0]);
                eprintln!(
                    "Example: {} --bind 127.0.0.1:33001 --seed 127.0.0.1:33000",
                    args[0]
                );
                std::process::exit(0);
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument {}", other));
            }
        }
    }

    let mut settings = match &config_path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if let Some(bind) = bind {
        let (address, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind expects <addr:port>, got {}", bind))?;
        settings.address = address.to_string();
        settings.port = port.parse()?;
    }

    let local = Node::new(&settings.address, settings.port);
    let local_id = local.id();
    tracing::info!("Starting node {}", local_id);

    // Seed the view from the persisted node list, if any.
    let node_list_path = settings.node_list_path.as_ref().map(PathBuf::from);
    let mut initial_view = match &node_list_path {
        Some(path) => NodeList::load(path)?.into_view(local_id.clone()),
        None => View::new(local_id.clone()),
    };
    for seed in seeds {
        if seed != local_id && !initial_view.contains(&seed) {
            initial_view.view.push(seed);
        }
    }
    initial_view.view.truncate(settings.fanout);

    if initial_view.view.is_empty() {
        tracing::info!("No peers known; starting as cluster founder");
    } else {
        tracing::info!("Starting with {} known peers", initial_view.view.len());
    }

    // 1. Coordination session (in-process namespace):
    let coordination = MemoryCoordination::new();
    let session = coordination.session();

    // 2. Gossip membership:
    let status = Arc::new(StatusCell::new(NodeStatus::Idle));
    let (gossip, actions_rx) = GossipService::new(
        local,
        status.clone(),
        initial_view,
        settings.fanout,
        Box::new(BloomSet::new(
            settings.bloom_capacity,
            settings.bloom_error_rate,
        )),
        session.clone(),
    );
    gossip.register_liveness().await?;

    // 3. Job pipeline:
    let transport = Arc::new(PeerClient::new());
    let (runner, jobs_rx) = JobRunner::new(
        status.clone(),
        transport.clone(),
        settings.task_queue_depth,
        Duration::from_millis(settings.worker_reply_timeout_ms),
    );
    runner.clone().spawn(jobs_rx);

    let election = ElectionCoordinator::new(local_id.clone(), session.clone());
    let groups = WorkGroupManager::new(local_id.clone(), session.clone(), election.clone());
    let jobs = JobService::new(
        status,
        runner,
        election,
        groups,
        gossip.clone(),
        session,
        transport,
    );

    // 4. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_VIEW, post(handle_view))
        .route(ENDPOINT_DISSEMINATE, post(handle_disseminate))
        .route(ENDPOINT_DATA, get(handle_get_data))
        .route(ENDPOINT_ADDED_TO_VIEW, post(handle_added_to_view))
        .route(ENDPOINT_HELLO, post(handle_hello))
        .route(ENDPOINT_NEW_JOB, post(handle_new_job))
        .route(ENDPOINT_RECRUIT, post(handle_recruit))
        .route(ENDPOINT_JOB_TASK, post(handle_job_task))
        .route(ENDPOINT_JOB_RESULT, post(handle_job_result))
        .route(ENDPOINT_JOB_DONE, post(handle_job_done))
        .layer(Extension(gossip.clone()))
        .layer(Extension(jobs));

    // 5. Heartbeat:
    let scheduler = HeartbeatScheduler::new(
        gossip.clone(),
        Duration::from_millis(settings.tick_ms),
        settings.pulse_ticks,
        node_list_path,
    );
    scheduler.spawn(actions_rx);

    // Greet the seeded peers so they learn about us right away.
    gossip.enqueue(DeferredAction::AnnounceView);

    // 6. Start HTTP server:
    let bind_addr = format!("{}:{}", settings.address, settings.port);
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
