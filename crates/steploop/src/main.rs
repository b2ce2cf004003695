//! steploop - plan step runner
//!
//! Drives a JSON plan through an agent CLI one step at a time.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Args, Parser, Subcommand};
use eyre::{bail, eyre, WrapErr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use steploop::progress::TracingSink;
use steploop::provider::ProviderRegistry;
use steploop::render;
use steploop::StepScheduler;
use steploop_core::{Config, PlanStore};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "steploop")]
#[command(about = "Run a multi-step plan through an agent CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run runnable steps until done or out of iterations
    Run(RunArgs),

    /// Load, migrate and validate a plan
    Validate {
        /// Path to the plan file
        plan: PathBuf,

        /// Write the migrated plan back to disk
        #[arg(long)]
        write: bool,
    },

    /// Show per-step status
    Status {
        /// Path to the plan file
        plan: PathBuf,
    },

    /// List provider adapters
    Providers {
        /// Show fallback models for this model
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the plan file
    plan: PathBuf,

    /// Config file path (overrides .steploop/config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum iterations for this run
    #[arg(long)]
    iterations: Option<u32>,

    /// Provider id (claude, codex)
    #[arg(long)]
    provider: Option<String>,

    /// Model override (defaults to the plan's model)
    #[arg(long)]
    model: Option<String>,

    /// Provider-specific thinking level
    #[arg(long)]
    thinking: Option<String>,

    /// Working directory the agent edits (default: current directory)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Commit each completed step
    #[arg(long)]
    auto_commit: bool,

    /// Allow auto-commit on a dirty worktree
    #[arg(long)]
    allow_dirty: bool,

    /// Print the provider command for the next step and stop
    #[arg(long)]
    dry_run: bool,
}

impl RunArgs {
    /// CLI flags win over every config file.
    fn apply(&self, config: &mut Config) {
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(provider) = &self.provider {
            config.provider.clone_from(provider);
        }
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if self.thinking.is_some() {
            config.thinking.clone_from(&self.thinking);
        }
        config.auto_commit |= self.auto_commit;
        config.allow_dirty |= self.allow_dirty;
        config.dry_run |= self.dry_run;
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .wrap_err("failed to create tokio runtime")?;
            runtime.block_on(run(args))
        }
        Command::Validate { plan, write } => validate(&plan, write),
        Command::Status { plan } => {
            let plan = PlanStore::new(plan).load()?;
            render::print_plan_status(&plan);
            Ok(())
        }
        Command::Providers { model } => {
            render::print_providers(&ProviderRegistry::with_defaults(), model.as_deref());
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> eyre::Result<()> {
    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().wrap_err("cannot determine working directory")?,
    };
    let mut config = Config::load_layered(&workdir, args.config.as_deref())
        .wrap_err("failed to load config")?;
    args.apply(&mut config);

    let registry = ProviderRegistry::with_defaults();
    let provider = registry.get(&config.provider).ok_or_else(|| {
        eyre!(
            "unknown provider '{}' (available: {})",
            config.provider,
            registry.list().join(", ")
        )
    })?;
    if !config.dry_run && !provider.is_installed() {
        bail!(
            "provider '{}' needs the `{}` executable on PATH",
            provider.id(),
            provider.executable()
        );
    }

    let run_log_dir = config.run_log_dir.clone();
    let mut scheduler = StepScheduler::new(PlanStore::new(&args.plan), &workdir, provider, config)
        .with_sink(Arc::new(TracingSink));
    let log_path = scheduler.open_run_log(&run_log_dir)?;
    info!(run_id = %scheduler.run_id(), log = %log_path.display(), "run log opened");

    let summary = scheduler.run().await?;
    render::print_run_summary(&summary);
    Ok(())
}

fn validate(path: &Path, write: bool) -> eyre::Result<()> {
    let store = PlanStore::new(path);
    let plan = store
        .load()
        .wrap_err_with(|| format!("{} is not a valid plan", path.display()))?;
    if write {
        store.save(&plan)?;
        println!("{}: valid, written as schema v{}", path.display(), plan.schema_version);
    } else {
        println!(
            "{}: valid ({} steps, schema v{})",
            path.display(),
            plan.steps.len(),
            plan.schema_version
        );
    }
    Ok(())
}
