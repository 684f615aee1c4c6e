//! SEN66 Console
//!
//! Command-line and interactive console for SEN66 air-quality monitors:
//! live status, log and TWA downloads, device settings and metadata.

mod cli;
mod console;
mod export;
mod render;
mod settings;

use clap::Parser;
use cli::Cli;
use console::{Action, App, StdinInput};
use settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "sen66=info,sen_link=info,sen_protocol=info,sen_detect=info,sen_sim=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so downloads piped from stdout stay clean
    let default_filter = match cli.verbose {
        0 => DEFAULT_LOG_FILTER.to_string(),
        1 => DEFAULT_LOG_FILTER.replace("=info", "=debug"),
        _ => DEFAULT_LOG_FILTER.replace("=info", "=trace"),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = Settings::load(cli.config.as_deref());
    if let Some(port) = cli.port {
        settings.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        settings.baud_rate = baud;
    }
    if let Some(dir) = cli.output_dir {
        settings.output_dir = Some(dir);
    }
    if cli.save_config {
        settings.save(cli.config.as_deref())?;
        tracing::info!("Settings saved");
    }

    let mut app = App::new(settings, StdinInput::new());
    match cli.command.and_then(Action::from_command) {
        Some(action) => console::run_once(&mut app, action).await,
        None => {
            app.run_console().await;
            Ok(())
        }
    }
}
