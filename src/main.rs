use clap::Parser;
use std::sync::Arc;

use firefly_panel::bot::BotWorker;
use firefly_panel::logging::{self, LogBuffer};
use firefly_panel::panel::{self, AppState};
use firefly_panel::settings;
use firefly_panel::Result;

#[derive(Parser, Debug)]
#[command(name = "firefly-panel")]
#[command(about = "Web control panel for the firefly Discord bot")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7863)]
    port: u16,

    #[arg(long, default_value_t = firefly_panel::runtime_paths::default_settings_path())]
    settings: String,

    /// Explicit path to the bot executable; tried before the search order.
    #[arg(long, env = "FIREFLYD_PATH")]
    bot_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logs = LogBuffer::default();
    logging::init_tracing("firefly_panel", logs.clone());

    settings::ensure_default_settings(&cli.settings)?;

    let worker = Arc::new(BotWorker::new(&cli.settings, cli.bot_path.clone()));
    let state = AppState {
        worker: worker.clone(),
        settings_path: cli.settings.clone(),
        logs,
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down panel");
    };
    panel::run_with_shutdown(&cli.host, cli.port, state, shutdown).await?;

    // Best effort: don't leave an orphaned bot behind the panel.
    let _ = worker.reload();
    Ok(())
}
