//! Foreman CLI - dispatch features to coding agents, one loop per workspace
//!
//! Usage:
//!   foreman run [--branch B] [--once]     Run the auto loop for a workspace
//!   foreman run --feature <id>            Run one feature
//!   foreman status                        Show feature counts and activity
//!   foreman order                         Show the dependency-resolved order
//!   foreman features list|add|approve|verify|archive
//!   foreman config init                   Write default settings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use foreman_agent::ProviderGateway;
use foreman_core::{Feature, GlobalSettings, LoopMode, PlanningMode};
use foreman_git::GitCommand;
use foreman_orchestrator::{
    blocking_dependencies, resolve, AutoModeEvent, AutoModeEventKind, AutoModeService,
    BroadcastEventSink, EngineContext, FileSettingsProvider, NoNotifications, OverviewAggregator,
    SettingsProvider,
};
use foreman_store::{FeatureStore, NewFeature};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(author, version, about = "Feature orchestration for AI coding agents")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding settings.toml (defaults to ~/.foreman)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Project path or registered project name
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the auto loop for one workspace until it finishes or Ctrl-C
    Run {
        /// Branch of the workspace (defaults to the main checkout)
        #[arg(short, long)]
        branch: Option<String>,

        /// Run at most one feature
        #[arg(long)]
        once: bool,

        /// Run exactly this feature
        #[arg(long, conflicts_with_all = ["branch", "once"])]
        feature: Option<String>,
    },

    /// Show feature counts and recent activity
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Show the order features would run in
    Order {
        #[arg(long)]
        json: bool,
    },

    /// Feature management
    Features {
        #[command(subcommand)]
        action: FeatureCommands,
    },

    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum FeatureCommands {
    /// List features
    List {
        /// List archived features instead
        #[arg(long)]
        archived: bool,

        #[arg(long)]
        json: bool,
    },

    /// Add a feature
    Add {
        /// What to build
        description: String,

        #[arg(long)]
        title: Option<String>,

        /// Explicit id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// 1 (high) to 3 (low)
        #[arg(long)]
        priority: Option<u8>,

        /// Feature ids this one builds on
        #[arg(long = "depends-on", value_delimiter = ',')]
        depends_on: Vec<String>,

        /// Branch whose workspace runs the feature
        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Model override (e.g. opus, sonnet, codex)
        #[arg(long)]
        model: Option<String>,

        /// Generate a plan before implementing
        #[arg(long)]
        plan: bool,

        /// Wait for plan approval (implies --plan)
        #[arg(long)]
        approve_plan: bool,

        /// Wait for approval after implementation
        #[arg(long)]
        require_approval: bool,

        /// Create as ready instead of pending
        #[arg(long)]
        ready: bool,
    },

    /// Approve a generated plan
    Approve { id: String },

    /// Accept a finished feature
    Verify { id: String },

    /// Move a feature to the archive
    Archive { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write default settings.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Everything a command needs, resolved once from the flags
struct Env {
    data_dir: PathBuf,
    settings: GlobalSettings,
    project: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    match cli.command {
        Commands::Config { action } => cmd_config(&data_dir, &action),
        Commands::Run {
            branch,
            once,
            feature,
        } => cmd_run(&load_env(data_dir, &cli.project).await?, branch, once, feature).await,
        Commands::Status { json } => cmd_status(&load_env(data_dir, &cli.project).await?, json).await,
        Commands::Order { json } => cmd_order(&load_env(data_dir, &cli.project).await?, json).await,
        Commands::Features { action } => {
            cmd_features(&load_env(data_dir, &cli.project).await?, action).await
        }
    }
}

async fn load_env(data_dir: PathBuf, project: &str) -> Result<Env> {
    let settings = FileSettingsProvider::new(&data_dir)
        .global_settings()
        .await
        .with_context(|| format!("Failed to load settings from {}", data_dir.display()))?;
    let project = resolve_project(&settings, project)?;
    Ok(Env {
        data_dir,
        settings,
        project,
    })
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foreman")
}

fn resolve_project(settings: &GlobalSettings, name_or_path: &str) -> Result<PathBuf> {
    let path = match settings.project(name_or_path) {
        Some(project) => project.path.clone(),
        None => PathBuf::from(name_or_path),
    };
    std::fs::canonicalize(&path).with_context(|| format!("Project not found: {}", path.display()))
}

fn service(env: &Env, events: Arc<BroadcastEventSink>) -> AutoModeService {
    let ctx = EngineContext::new(
        FeatureStore::new(),
        ProviderGateway::from_settings(&env.settings),
        Arc::new(GitCommand::new()),
        Arc::new(FileSettingsProvider::new(&env.data_dir)),
    )
    .with_events(events);
    AutoModeService::new(ctx)
}

async fn cmd_run(env: &Env, branch: Option<String>, once: bool, feature: Option<String>) -> Result<()> {
    let events = Arc::new(BroadcastEventSink::default());
    let mut rx = events.subscribe();
    let service = service(env, events);

    // The backend CLIs may hold their own login; missing env credentials only warn
    if let Err(e) = service
        .context()
        .gateway
        .check_auth(&env.settings.default_model)
    {
        warn!("Credential preflight: {}", e);
    }

    let status = match feature {
        Some(id) => service.run_feature(&env.project, &id).await?,
        None => {
            let mode = if once {
                LoopMode::SingleStep
            } else {
                LoopMode::Continuous
            };
            service.start(&env.project, branch.as_deref(), mode).await?
        }
    };
    info!(
        "Auto loop running for {} ({})",
        env.project.display(),
        status.branch_name.as_deref().unwrap_or("main checkout")
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                service.shutdown().await;
                break;
            }
            event = rx.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event.kind, AutoModeEventKind::LoopStopped { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let status = service.status(&env.project, status.branch_name.as_deref()).await;
    if let Some(error) = status.last_error {
        warn!("Last error: {}", error);
    }
    Ok(())
}

fn print_event(event: &AutoModeEvent) {
    use AutoModeEventKind::*;

    let workspace = event.branch_name.as_deref().unwrap_or("main");
    let line = match &event.kind {
        LoopStarted { mode } => format!("loop started ({:?})", mode),
        LoopStopped { reason } => format!("loop stopped: {}", reason),
        LoopIdle => "idle, waiting for work".to_string(),
        AutoModePaused { reason, .. } => format!("PAUSED: {}", reason),
        FeatureStarted {
            feature_id,
            model,
            phase,
        } => format!("{} started ({:?}, {})", feature_id, phase, model),
        FeatureProgress { feature_id, text } => {
            format!("{}: {}", feature_id, text.lines().next().unwrap_or_default())
        }
        FeatureToolUse { feature_id, tool, .. } => format!("{}: [{}]", feature_id, tool),
        FeatureCompleted {
            feature_id,
            status,
            summary,
        } => match summary {
            Some(summary) => format!("{} {}: {}", feature_id, status, summary),
            None => format!("{} {}", feature_id, status),
        },
        FeatureFailed { feature_id, error } => format!("{} FAILED: {}", feature_id, error),
        FeatureCancelled {
            feature_id,
            reverted_to,
        } => format!("{} cancelled, back to {}", feature_id, reverted_to),
        PlanAwaitingApproval { feature_id, .. } => {
            format!("{} plan ready; approve with `foreman features approve {}`", feature_id, feature_id)
        }
        WorkspaceUnavailable { feature_id, error } => {
            format!("{} workspace unavailable: {}", feature_id, error)
        }
        DependencyCycle { error, .. } => format!("excluded: {}", error),
    };
    println!("[{}] {}", workspace, line);
}

async fn cmd_status(env: &Env, json: bool) -> Result<()> {
    let events = Arc::new(BroadcastEventSink::default());
    let overview = OverviewAggregator::new(service(env, events), Arc::new(NoNotifications))
        .overview(&env.project)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    println!("Project: {}", overview.project_path.display());
    println!("Features: {}", overview.total_features());
    for (status, count) in overview.counts.iter().filter(|(_, c)| **c > 0) {
        println!("  {:<18} {}", status, count);
    }
    if !overview.recent.is_empty() {
        println!("\nRecent:");
        for feature in &overview.recent {
            println!("  {:<14} {:<18} {}", feature.id, feature.status.to_string(), feature.label);
        }
    }
    Ok(())
}

async fn cmd_order(env: &Env, json: bool) -> Result<()> {
    let features = FeatureStore::new().list(&env.project).await?;
    let resolution = resolve(&features);

    if json {
        let value = serde_json::json!({
            "order": resolution.order,
            "cycles": resolution.cycles,
            "blockedByCycle": resolution.blocked_by_cycle,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (i, id) in resolution.order.iter().enumerate() {
        let Some(feature) = features.iter().find(|f| &f.id == id) else {
            continue;
        };
        let blockers = blocking_dependencies(feature, &features);
        let blocked = if blockers.is_empty() || feature.status.is_terminal_success() {
            String::new()
        } else {
            format!("  (waiting on {})", blockers.join(", "))
        };
        println!(
            "{:>3}. {:<14} p{} {:<18} {}{}",
            i + 1,
            feature.id,
            feature.effective_priority(),
            feature.status.to_string(),
            feature.label(),
            blocked
        );
    }
    for cycle in &resolution.cycles {
        println!("cycle: {}", cycle.join(" -> "));
    }
    if !resolution.blocked_by_cycle.is_empty() {
        println!("blocked by a cycle: {}", resolution.blocked_by_cycle.join(", "));
    }
    Ok(())
}

async fn cmd_features(env: &Env, action: FeatureCommands) -> Result<()> {
    let store = FeatureStore::new();
    let project = env.project.as_path();

    match action {
        FeatureCommands::List { archived, json } => {
            let features = if archived {
                store.list_archived(project).await?
            } else {
                store.list(project).await?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&features)?);
            } else {
                print_features(&features);
            }
        }
        FeatureCommands::Add {
            description,
            title,
            id,
            priority,
            depends_on,
            branch,
            category,
            model,
            plan,
            approve_plan,
            require_approval,
            ready,
        } => {
            let mut new = NewFeature::new(description).with_dependencies(depends_on);
            new.id = id;
            new.title = title;
            new.priority = priority;
            new.branch_name = branch;
            new.category = category.unwrap_or_default();
            new.model = model;
            if plan || approve_plan {
                new.planning_mode = PlanningMode::Spec;
            }
            new.require_plan_approval = approve_plan;
            new.require_approval = require_approval;
            if ready {
                new = new.with_status(foreman_core::FeatureStatus::Ready);
            }

            let feature = store.create(project, new).await?;
            println!("Created {}", feature.id);
        }
        FeatureCommands::Approve { id } => {
            let events = Arc::new(BroadcastEventSink::default());
            let feature = service(env, events).approve_plan(project, &id).await?;
            println!("{} plan approved, now {}", feature.id, feature.status);
        }
        FeatureCommands::Verify { id } => {
            let events = Arc::new(BroadcastEventSink::default());
            let feature = service(env, events).verify_feature(project, &id).await?;
            println!("{} verified", feature.id);
        }
        FeatureCommands::Archive { id } => {
            let feature = store.archive(project, &id).await?;
            println!("Archived {}", feature.id);
        }
    }
    Ok(())
}

fn print_features(features: &[Feature]) {
    if features.is_empty() {
        println!("No features");
        return;
    }
    for feature in features {
        let branch = feature.branch_name.as_deref().unwrap_or("-");
        println!(
            "{:<14} {:<18} p{} {:<20} {}",
            feature.id,
            feature.status.to_string(),
            feature.effective_priority(),
            branch,
            feature.label()
        );
        if let Some(error) = feature.error.as_deref() {
            println!("{:<14} error: {}", "", error);
        }
    }
}

fn cmd_config(data_dir: &Path, action: &ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Init { force } => {
            let path = data_dir.join(foreman_core::config::SETTINGS_FILE);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let path = GlobalSettings::write_default(data_dir)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
