use anyhow::{Result, bail};
use clap::Parser;
use serde::Serialize;
use system_manager::{
    app::bootstrap,
    cli::{Cli, Commands},
    config::{AppConfig, HEALTH_CHECK, load_config},
    registry::RunState,
    retry::TokioSleeper,
    signals::shutdown_signal,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(cfg: &AppConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("ignoring .env: {e}");
        }
    }
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(&cfg);

    let (orchestrator, scheduler) = bootstrap(&cfg, &TokioSleeper).await?;

    match cli.command {
        Commands::Run => {
            scheduler.start()?;
            if let Err(e) = scheduler.run_now(HEALTH_CHECK) {
                warn!(error = %e, "initial health check not started");
            }
            shutdown_signal().await;
            let drained = scheduler.stop(cfg.scheduler.shutdown_timeout()).await;
            info!(drained, "market-sync exited");
        }
        Commands::Sync => print_json(&orchestrator.sync_all().await)?,
        Commands::Quotes => print_json(&orchestrator.refresh_quotes().await)?,
        Commands::Health => print_json(&orchestrator.health_check())?,
        Commands::Summary { ticker, years } => match orchestrator.summary(&ticker, years) {
            Ok(summary) => print_json(&summary)?,
            Err(e) => {
                print_json(&e)?;
                return Err(e.into());
            }
        },
        Commands::History { ticker, start, end } => {
            match orchestrator.history(&ticker, start, end) {
                Ok(rows) => print_json(&rows)?,
                Err(e) => {
                    print_json(&e)?;
                    return Err(e.into());
                }
            }
        }
        Commands::Jobs => print_json(&scheduler.plan())?,
        Commands::Exec { id } => {
            let run = scheduler.run_and_wait(&id).await?;
            print_json(&run)?;
            if run.state == RunState::Error {
                bail!("job {id} failed");
            }
        }
    }
    Ok(())
}
