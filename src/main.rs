use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agrowatch::cache::Cache;
use agrowatch::config::AppConfig;
use agrowatch::db::{self, DebtStore, DispatchStore, DocumentStore, FarmStore, PersonStore};
use agrowatch::notify::email::{LogMailer, Mailer, SmtpMailer};
use agrowatch::notify::{EngineContext, NotificationEngine};
use agrowatch::scheduler::Scheduler;
use agrowatch::server::{start_server, AppState};

#[derive(Parser)]
#[command(name = "agrowatch", about = "Farm records and due-date reminders")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server with the background scheduler.
    Serve,
    /// Run a single notification pass and exit.
    Check,
    /// Print record counts and exit.
    Stats,
    /// Prune dispatch history older than the retention window and exit.
    Prune,
    /// Apply pending migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::resolve().context("resolving configuration")?;

    let backend = db::connect_from_config(&config.database)
        .await
        .context("connecting to postgres")?;

    match cli.command {
        Command::Migrate => {
            // connect_from_config already ran migrations.
            info!("migrations applied");
            Ok(())
        }
        Command::Prune => {
            let cutoff = Utc::now() - Duration::days(config.schedule.retention_days);
            let pruned = backend.prune_dispatches(cutoff).await?;
            info!(pruned, "dispatch history pruned");
            Ok(())
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "people": backend.list_people().await?.len(),
                "farms": backend.list_farms().await?.len(),
                "documents": backend.list_documents().await?.len(),
                "debts": backend.list_debts().await?.len(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Check => {
            let mailer = build_mailer(&config)?;
            let ctx = Arc::new(EngineContext {
                store: backend.clone(),
                mailer,
            });
            let engine = NotificationEngine::new(&ctx);
            let summary = engine.run(Utc::now().date_naive()).await?;
            info!(?summary, "notification pass complete");
            Ok(())
        }
        Command::Serve => {
            let mailer = build_mailer(&config)?;
            let cache = Arc::new(Cache::connect(&config.cache).await);
            let ctx = Arc::new(EngineContext {
                store: backend.clone(),
                mailer,
            });
            let engine = Arc::new(NotificationEngine::new(&ctx));
            let state = Arc::new(AppState {
                store: backend,
                cache,
                engine,
                last_run: tokio::sync::RwLock::new(None),
            });
            Scheduler::new(Arc::clone(&state), &config.schedule)?.spawn();
            start_server(config.bind, Arc::clone(&state)).await?;
            // Keep the engine context alive for the lifetime of the
            // process; dropping it would turn scheduled passes into
            // no-ops.
            let _ctx = ctx;
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            Ok(())
        }
    }
}

fn build_mailer(config: &AppConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(
            SmtpMailer::from_config(smtp).context("building smtp transport")?,
        )),
        None => {
            info!("no smtp configured, reminders will be logged only");
            Ok(Arc::new(LogMailer))
        }
    }
}
