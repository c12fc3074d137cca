use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use spiral_core::agent::Agent;
use spiral_core::api::ApiServer;
use spiral_core::config::Config;
use spiral_core::fanin::FanInCoordinator;
use spiral_core::heartbeat::HeartbeatStore;
use spiral_core::kv::{InMemoryKvStore, KvStore};
use spiral_core::llm::{HttpLlmClient, LlmClient};
use spiral_core::progress::ProgressStore;
use spiral_core::queue::TaskQueue;
use spiral_core::react::ReactExecutor;
use spiral_core::tool::ToolSet;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load()?;
    let registry = Arc::new(config.load_registry()?);

    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let queue = Arc::new(TaskQueue::default());
    let progress = Arc::new(ProgressStore::new(kv.clone()));
    let heartbeats = Arc::new(HeartbeatStore::new(kv.clone()));
    let fanin = Arc::new(FanInCoordinator::new(kv, progress.clone(), queue.clone()));

    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config.grok_base_url.clone(),
        config.grok_api_key.clone(),
    ));

    let mut agents = Vec::new();
    for (name, agent_config) in registry.iter() {
        let mut agent = Agent::new(
            name,
            agent_config.labels.clone(),
            queue.clone(),
            progress.clone(),
            heartbeats.clone(),
            fanin.clone(),
        )
        .with_system_prompt(agent_config.system_prompt.clone())
        .with_fan_in(agent_config.fan_in);

        if agent_config.ai_enabled {
            let react = ReactExecutor::new(llm.clone(), config.grok_model.clone());
            agent = agent.with_ai(react, ToolSet::new(Vec::new()));
        }

        tracing::info!(agent = name, labels = ?agent_config.labels, "registered agent");
        agents.push(Arc::new(agent));
    }

    let mut handles = Vec::with_capacity(agents.len());
    for agent in &agents {
        let agent = agent.clone();
        handles.push(tokio::spawn(async move { agent.run().await }));
    }

    let sweep_queue = queue.clone();
    let sweeper = tokio::spawn(async move {
        loop {
            tokio::time::sleep(spiral_core::constants::sweep_interval()).await;
            if let Err(e) = sweep_queue.sweep_expired().await {
                tracing::warn!(error = %e, "lease sweep failed");
            }
        }
    });

    let api_server = ApiServer::new(registry.clone(), heartbeats.clone(), progress.clone());

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining agents");
        }
        result = api_server.serve(&config.api_host, config.api_port) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "api server exited");
            }
        }
    }

    for agent in &agents {
        agent.request_shutdown();
    }
    for handle in handles {
        let _ = handle.await;
    }
    sweeper.abort();

    Ok(())
}

/// SIGTERM/SIGINT (SPEC_FULL §5 "Cancellation & timeouts"). On non-Unix targets only Ctrl+C is
/// available.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
