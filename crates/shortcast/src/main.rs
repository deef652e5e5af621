//! Shortcast: scheduled content-pipeline orchestrator
//!
//! Main binary with subcommands:
//! - `daemon`: Scheduler loop plus the status server
//! - `run-once`: Execute the pipeline a single time and exit
//! - `status`: Query a running daemon
//! - `check-config`: Validate configuration and the pipeline manifest

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shortcast_scheduler::{RunKind, RunRequest, compute_next_trigger};

mod daemon;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(name = "shortcast")]
#[command(about = "Scheduled content-pipeline orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop and the status server
    Daemon {
        #[command(flatten)]
        settings: Settings,

        /// Status server port
        #[arg(long, env = "PORT", default_value = "8080")]
        port: u16,
    },

    /// Execute the pipeline once, print the result and exit
    RunOnce {
        #[command(flatten)]
        settings: Settings,

        /// Run as a verification pass (uses the verification topic and records the outcome)
        #[arg(long)]
        verify: bool,
    },

    /// Show the status of a running daemon
    Status {
        /// Base URL of the daemon's status server
        #[arg(long, env = "SHORTCAST_STATUS_URL", default_value = "http://localhost:8080")]
        url: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and the pipeline manifest without running anything
    CheckConfig {
        #[command(flatten)]
        settings: Settings,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "shortcast=info,shortcast_scheduler=info,shortcast_web=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { settings, port } => daemon::run(&settings, port).await,
        Commands::RunOnce { settings, verify } => run_once(&settings, verify).await,
        Commands::Status { url, json } => show_status(&url, json).await,
        Commands::CheckConfig { settings } => check_config(&settings).await,
    }
}

async fn run_once(settings: &Settings, verify: bool) -> Result<()> {
    let scheduler = settings
        .build_scheduler()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let now = chrono::Utc::now();
    let request = if verify {
        RunRequest::new(RunKind::Verification, now)
            .with_topic(scheduler.config().verification_topic())
    } else {
        RunRequest::new(RunKind::Manual, now)
    };

    let result = scheduler.run_now(request).await;
    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|e| miette::miette!("failed to render result: {}", e))?;
    println!("{}", rendered);

    if result.status.is_success() {
        Ok(())
    } else {
        Err(miette::miette!(
            "run {} {}: {}",
            result.run_id,
            result.status,
            result.error_detail
        ))
    }
}

async fn show_status(url: &str, json: bool) -> Result<()> {
    let endpoint = format!("{}/api/scheduler/status", url.trim_end_matches('/'));
    let status: serde_json::Value = reqwest::get(&endpoint)
        .await
        .map_err(|e| miette::miette!("failed to reach {}: {}", endpoint, e))?
        .error_for_status()
        .map_err(|e| miette::miette!("{}", e))?
        .json()
        .await
        .map_err(|e| miette::miette!("invalid status response: {}", e))?;

    if json {
        let rendered = serde_json::to_string_pretty(&status)
            .map_err(|e| miette::miette!("{}", e))?;
        println!("{}", rendered);
        return Ok(());
    }

    let field = |value: &serde_json::Value| match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    println!("Schedule:      {}", field(&status["schedule"]));
    println!("Next trigger:  {}", field(&status["next_trigger"]));
    match status["active"].as_object() {
        Some(active) => println!(
            "Active run:    {} ({}, {})",
            field(&active["run_id"]),
            field(&active["kind"]),
            field(&active["phase"])
        ),
        None => println!("Active run:    -"),
    }
    match status["last_run"].as_object() {
        Some(last) => println!(
            "Last run:      {} {} at {}",
            field(&last["kind"]),
            field(&last["status"]),
            field(&last["finished_at"])
        ),
        None => println!("Last run:      -"),
    }
    println!(
        "Verification:  completed={} last_failure={}",
        field(&status["verification"]["completed"]),
        field(&status["verification"]["last_failure_at"])
    );

    Ok(())
}

async fn check_config(settings: &Settings) -> Result<()> {
    let scheduler = settings
        .build_scheduler()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let now = chrono::Utc::now();
    let next = compute_next_trigger(now, scheduler.config());
    println!("Schedule:      {}", scheduler.config().describe());
    println!("Next trigger:  {}", next.to_rfc3339());
    println!("Pipeline:      {}", settings.pipeline.display());
    for step in scheduler.executor().pipeline().steps() {
        println!("  - {} ({:?}, timeout {}s)", step.name(), step.kind, step.timeout.as_secs());
    }
    println!("State file:    {}", settings.state_path().display());
    println!("Work dir:      {}", settings.work_dir.display());

    let report = scheduler.executor().guard().check();
    println!(
        "Resources:     {:?} (memory {} MB free, disk {} MB free)",
        report.level,
        report
            .free_memory_mb
            .map_or_else(|| "?".to_string(), |mb| mb.to_string()),
        report
            .free_disk_mb
            .map_or_else(|| "?".to_string(), |mb| mb.to_string()),
    );
    if !report.reasons.is_empty() {
        println!("               {}", report.summary());
    }

    println!("Configuration OK");
    Ok(())
}
