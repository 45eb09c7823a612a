use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use hourglass_core::config::HourglassConfig;
use hourglass_records::{ScheduledJobRecord, ScheduledJobStore};
use hourglass_scheduler::cron_describe;
use hourglass_scheduler::{ReconciliationProcess, ScheduleManager, SchedulerContext};

mod app;
mod runner;

#[derive(Parser, Debug)]
#[command(name = "hourglass")]
#[command(about = "Job scheduling daemon for processes, queues and table automations")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("HOURGLASS_GIT_SHA"), ")"))]
struct Cli {
    /// Config file path. Falls back to HOURGLASS_CONFIG, then
    /// ~/.hourglass/hourglass.toml.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Schedule everything and run until interrupted.
    Serve,
    /// Print a cron expression in plain English.
    Describe { expression: String },
    /// Validate every schedulable entity without starting any scheduler.
    Check,
    /// Inspect scheduled job records.
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum JobsCommand {
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hourglass_daemon=info,hourglass_scheduler=info".into()),
        )
        .init();

    if let Command::Describe { expression } = &cli.command {
        println!("{}", cron_describe::describe(expression));
        return Ok(());
    }

    // config: --config > HOURGLASS_CONFIG env > ~/.hourglass/hourglass.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("HOURGLASS_CONFIG").ok());
    let config = HourglassConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        HourglassConfig::default()
    });

    let app = app::App::open(config)?;

    match cli.command {
        Command::Serve => serve(app).await,
        Command::Check => check(&app).await,
        Command::Jobs {
            command: JobsCommand::List,
        } => list_jobs(&app),
        Command::Describe { .. } => Ok(()),
    }
}

async fn serve(app: app::App) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("HOURGLASS_GIT_SHA"),
        "starting hourglass"
    );

    let context = SchedulerContext::new();
    let manager = context.init_instance(app.manager_parts().await?)?;

    if app.config.scheduler.setup_on_start {
        let summary = manager.setup_all_scheduled_jobs().await?;
        for failure in &summary.failed {
            warn!(entity = %failure.entity, error = %failure.error, "not scheduled");
        }
    }
    context.start().await?;

    let reconciler = app
        .config
        .scheduler
        .reconcile_interval_secs
        .filter(|secs| *secs > 0)
        .map(|secs| {
            tokio::spawn(reconcile_loop(
                manager.clone(),
                app.store.clone(),
                Duration::from_secs(secs),
            ))
        });

    info!("hourglass running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(handle) = reconciler {
        handle.abort();
    }
    context.stop().await?;
    context.un_init().await?;
    Ok(())
}

/// Periodic RescheduleAllJobs so records that failed setup, or were changed
/// behind the service's back, converge without a restart.
async fn reconcile_loop(
    manager: Arc<ScheduleManager>,
    store: Arc<dyn ScheduledJobStore>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick is immediate; startup setup already covered it.
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = ReconciliationProcess::RescheduleAllJobs
            .run(&manager, store.as_ref())
            .await
        {
            warn!(error = %e, "periodic reconciliation failed");
        }
    }
}

async fn check(app: &app::App) -> anyhow::Result<()> {
    let manager = ScheduleManager::new(app.manager_parts().await?);
    let summary = manager.check_all()?;
    manager.un_init().await?;

    println!("{} schedulable, {} failing", summary.scheduled.len(), summary.failed.len());
    for failure in &summary.failed {
        println!("  {}: {}", failure.entity, failure.error);
    }
    if !summary.failed.is_empty() {
        anyhow::bail!("{} schedule(s) failed validation", summary.failed.len());
    }
    Ok(())
}

fn list_jobs(app: &app::App) -> anyhow::Result<()> {
    for record in app.store.list()? {
        println!("{}", job_line(&record));
    }
    Ok(())
}

fn job_line(record: &ScheduledJobRecord) -> String {
    let id = record.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let state = if record.is_active { "active" } else { "inactive" };
    let schedule = match (&record.cron_expression, record.repeat_seconds) {
        (Some(expr), _) => format!("{expr} ({})", cron_describe::describe(expr)),
        (None, Some(secs)) => format!("every {secs}s"),
        (None, None) => "-".to_string(),
    };
    format!(
        "{id}\t{state}\t{}\t{}\t{schedule}\t{}",
        record.scheduler_name.as_deref().unwrap_or("-"),
        record.job_type.as_deref().unwrap_or("-"),
        record.label.as_deref().unwrap_or(""),
    )
}
