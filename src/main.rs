use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use shadow_assistant::cli::{wait_for_shutdown, ConsoleNotifier, TerminalChannel};
use shadow_assistant::config::DaemonConfig;
use shadow_assistant::logging;
use shadow_assistant::runtime::Coordinator;
use shadow_assistant::session::HttpAgentClient;
use shadow_assistant::store::FileStateStore;

const DEFAULT_CONFIG_PATH: &str = "shadow-assistant.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = DaemonConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = logging::init_logging(&config.logging)?;

    tracing::info!("=== Shadow Assistant Starting ===");

    let client = HttpAgentClient::new(&config.agent.base_url, config.request_timeout())?
        .with_api_key(config.agent.api_key.clone());
    let store = FileStateStore::open(&config.store.data_dir)?
        .with_max_log_entries(config.store.max_log_entries);

    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_config(),
        Arc::new(client),
        Arc::new(store),
        Arc::new(ConsoleNotifier::new()),
    ));
    coordinator.start().await?;

    let terminal = TerminalChannel::new(coordinator.clone());
    tokio::select! {
        result = terminal.run() => {
            if let Err(e) = result {
                tracing::error!("Terminal failed: {}", e);
            }
        }
        _ = wait_for_shutdown(&coordinator) => {}
    }

    coordinator.shutdown().await;
    tracing::info!("=== Shadow Assistant Shutting Down ===");

    Ok(())
}
