use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use tether_config::{ConfigLoader, TetherConfig};
use tether_core::{
    BudgetLimits, Event, EventBus, Result, ScheduleKind, ScheduledTask, TaskSpec, TetherError,
};
use tether_engine::{DailyLimits, Dispatcher, TaskRunner, ToolRegistry, ensure_heartbeat_task, tasks};
use tether_llm::AnthropicProvider;
use tether_store::TaskStore;

/// Tether — budget-bounded scheduled agent runner
#[derive(Parser)]
#[command(name = "tether", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tether.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler loop
    Start,
    /// Show task and daily-usage status
    Status,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage scheduled tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Show recent runs
    Runs {
        /// Number of runs to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Filter by task name
        #[arg(short, long)]
        task: Option<String>,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a scheduled task
    Add {
        name: String,
        /// Prompt sent to the model each activation
        prompt: String,
        /// Schedule kind: interval or cron
        #[arg(short, long, default_value = "interval")]
        kind: String,
        /// Schedule expression, e.g. "4h" or "0 9 * * 1-5"
        #[arg(short, long)]
        schedule: String,
        /// Restrict the task to these tools (repeatable)
        #[arg(long)]
        tool: Vec<String>,
        /// Override the per-run turn cap
        #[arg(long)]
        max_turns: Option<u32>,
        /// Override the per-run write-action cap
        #[arg(long)]
        max_actions: Option<u32>,
    },
    /// List all tasks
    List,
    /// Enable a task
    Enable { name: String },
    /// Disable a task
    Disable { name: String },
    /// Delete a task
    Delete { name: String },
    /// Run a task immediately, ignoring its schedule
    Run { name: String },
    /// Change a task's schedule
    Reschedule {
        name: String,
        /// Schedule kind: interval or cron
        #[arg(short, long, default_value = "interval")]
        kind: String,
        /// New schedule expression
        #[arg(short, long)]
        schedule: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        let log_level = self
            .log_level
            .as_deref()
            .unwrap_or(&config.logging.level)
            .to_string();
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }

        match self.command {
            Commands::Start => Self::cmd_start(config).await,
            Commands::Status => Self::cmd_status(config),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Task { action } => Self::cmd_task(config, action).await,
            Commands::Runs { limit, task } => Self::cmd_runs(config, limit, task),
        }
    }

    async fn cmd_start(config: TetherConfig) -> Result<()> {
        println!("tether v{}", env!("CARGO_PKG_VERSION"));
        println!("   Model: {}", config.engine.model);
        println!(
            "   Daily ceiling: {} in / {} out tokens",
            config.scheduler.daily_input_token_limit, config.scheduler.daily_output_token_limit
        );
        println!("   Tick: every {}s", config.scheduler.tick_seconds);
        println!();

        let api_key = config.services.anthropic_api_key.clone().ok_or_else(|| {
            TetherError::Config(
                "no Anthropic API key configured. Set services.anthropic_api_key in \
                 tether.toml or export ANTHROPIC_API_KEY"
                    .into(),
            )
        })?;

        let dispatcher = Arc::new(build_dispatcher(&config, api_key)?);
        spawn_event_logger(dispatcher.events());

        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(config.scheduler.tick_seconds));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = dispatcher.tick().await {
                        error!(error = %e, "tick failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    fn cmd_status(config: TetherConfig) -> Result<()> {
        let store = TaskStore::open(&config.store.db_path)?;
        let tasks = store.list_tasks()?;
        let usage = store.daily_usage_today()?;

        println!("Tasks ({}):", tasks.len());
        for task in &tasks {
            println!("   {}", describe_task(task));
        }
        println!();
        println!(
            "Today ({}): {} runs, {} in / {} out tokens (ceiling {} / {})",
            usage.date,
            usage.task_runs,
            usage.input_tokens,
            usage.output_tokens,
            config.scheduler.daily_input_token_limit,
            config.scheduler.daily_output_token_limit,
        );
        Ok(())
    }

    fn cmd_config(config: TetherConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            let toml = toml_string(&config)?;
            println!("{toml}");
        }
        Ok(())
    }

    async fn cmd_task(config: TetherConfig, action: TaskAction) -> Result<()> {
        let store = TaskStore::open(&config.store.db_path)?;
        match action {
            TaskAction::Add {
                name,
                prompt,
                kind,
                schedule,
                tool,
                max_turns,
                max_actions,
            } => {
                let kind = ScheduleKind::from_str(&kind)?;
                let mut spec = TaskSpec::new(name, prompt, kind, schedule);
                if !tool.is_empty() {
                    spec.tools_allowed = Some(tool);
                }
                let mut limits: BudgetLimits = config.budget.limits();
                if let Some(turns) = max_turns {
                    limits.max_turns = turns;
                }
                if let Some(actions) = max_actions {
                    limits.max_actions = actions;
                }
                spec.limits = limits;

                let task = tasks::create_task(&store, &spec)?;
                println!("Created: {}", describe_task(&task));
            }
            TaskAction::List => {
                for task in store.list_tasks()? {
                    println!("{}", describe_task(&task));
                }
            }
            TaskAction::Enable { name } => {
                let task = require_task(&store, &name)?;
                tasks::set_enabled(&store, task.id, true)?;
                println!("Enabled '{name}'");
            }
            TaskAction::Disable { name } => {
                let task = require_task(&store, &name)?;
                tasks::set_enabled(&store, task.id, false)?;
                println!("Disabled '{name}'");
            }
            TaskAction::Delete { name } => {
                let task = require_task(&store, &name)?;
                tasks::delete_task(&store, task.id)?;
                println!("Deleted '{name}'");
            }
            TaskAction::Run { name } => {
                let api_key = config.services.anthropic_api_key.clone().ok_or_else(|| {
                    TetherError::Config("no Anthropic API key configured".into())
                })?;
                let task = require_task(&store, &name)?;
                let dispatcher = build_dispatcher(&config, api_key)?;
                let outcome = dispatcher.run_task_now(task.id).await?;
                match (&outcome.error, &outcome.stop_reason) {
                    (Some(e), _) => println!("Run failed: {e}"),
                    (None, Some(reason)) => println!("Budget exceeded: {reason}"),
                    (None, None) => println!("{}", outcome.summary),
                }
            }
            TaskAction::Reschedule {
                name,
                kind,
                schedule,
            } => {
                let kind = ScheduleKind::from_str(&kind)?;
                let task = require_task(&store, &name)?;
                let updated = tasks::reschedule(&store, task.id, kind, &schedule)?;
                println!("Rescheduled: {}", describe_task(&updated));
            }
        }
        Ok(())
    }

    fn cmd_runs(config: TetherConfig, limit: usize, task: Option<String>) -> Result<()> {
        let store = TaskStore::open(&config.store.db_path)?;
        let task_id = match task {
            Some(name) => Some(require_task(&store, &name)?.id),
            None => None,
        };
        for run in store.recent_runs(limit, task_id)? {
            let duration = match run.completed_at {
                Some(done) => format!("{:.1}s", (done - run.started_at).num_milliseconds() as f64 / 1000.0),
                None => "running".to_string(),
            };
            println!(
                "{} {:>15} {} turns={} tokens={}+{} {}",
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.status.as_str(),
                duration,
                run.turns_used,
                run.input_tokens,
                run.output_tokens,
                run.error.as_deref().unwrap_or(&run.summary),
            );
        }
        Ok(())
    }
}

fn build_dispatcher(config: &TetherConfig, api_key: String) -> Result<Dispatcher> {
    let store = Arc::new(TaskStore::open(&config.store.db_path)?);

    ensure_heartbeat_task(
        &store,
        &config.scheduler.heartbeat_interval,
        config.scheduler.heartbeat_file.as_deref(),
        config.budget.limits(),
    )?;

    let system_prompt = match &config.engine.system_prompt_file {
        Some(path) if path.exists() => Some(std::fs::read_to_string(path)?),
        _ => config.engine.system_prompt.clone(),
    };

    let provider = Arc::new(AnthropicProvider::new(api_key));
    let runner = TaskRunner::new(
        provider,
        config.engine.model.clone(),
        system_prompt,
        config.engine.max_tokens_per_turn,
        config.engine.temperature,
    );

    // Tool handlers are supplied by the embedding application; the bare
    // binary runs with an empty registry.
    let registry = Arc::new(ToolRegistry::new());

    Ok(Dispatcher::new(
        store,
        runner,
        registry,
        EventBus::default(),
        DailyLimits {
            input_tokens: config.scheduler.daily_input_token_limit,
            output_tokens: config.scheduler.daily_output_token_limit,
        },
        config.scheduler.heartbeat_file.clone(),
    ))
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                Event::TaskStarted { task_name, .. } => {
                    info!(task = %task_name, "task started");
                }
                Event::TaskCompleted {
                    task_name,
                    tokens_used,
                    duration_secs,
                    ..
                } => {
                    info!(task = %task_name, tokens_used, duration_secs, "task completed");
                }
                Event::TaskFailed {
                    task_name, error, ..
                } => {
                    error!(task = %task_name, error = %error, "task failed");
                }
                Event::DailyBudgetWarning {
                    level,
                    percent,
                    input_tokens,
                    output_tokens,
                } => {
                    tracing::warn!(
                        ?level,
                        percent,
                        input_tokens,
                        output_tokens,
                        "daily budget threshold crossed"
                    );
                }
            }
        }
    });
}

fn require_task(store: &TaskStore, name: &str) -> Result<ScheduledTask> {
    store
        .get_task_by_name(name)?
        .ok_or_else(|| TetherError::TaskNotFound(name.to_string()))
}

fn describe_task(task: &ScheduledTask) -> String {
    let state = if task.enabled { "on " } else { "off" };
    let next = task
        .next_run_at
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    let heartbeat = if task.is_heartbeat { " [heartbeat]" } else { "" };
    format!(
        "[{state}] {:<20} {} {:<12} next: {next}{heartbeat}",
        task.name,
        task.schedule.as_str(),
        task.schedule_expr,
    )
}

fn toml_string(config: &TetherConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| TetherError::Config(e.to_string()))
}
