//! DBL - Database Layering
//!
//! Git-like version control for a relational database's schema and data:
//! branches hold ordered, reviewable migration layers; a sandbox pairs the
//! live database with a shadow copy used as a safe diff baseline; a planner
//! turns the diff into phase-annotated SQL.

mod commands;
mod config;
mod engine;
mod error;
mod introspection;
mod manifest;
mod migration;
mod project;
mod sandbox;
mod snapshot;

use crate::commands::branch::RebaseOptions;
use crate::commands::commit::CommitOptions;
use crate::commands::Context;
use crate::project::Project;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// DBL - git-like layers for your database
#[derive(Parser, Debug)]
#[command(name = "dbl")]
#[command(version, about = "Database Layering: branches and reviewable migration layers")]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', long, global = true)]
    directory: Option<PathBuf>,

    /// Answer yes to confirmation prompts
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create dbl.yaml and an empty master branch
    Init,
    /// Import a SQL snapshot as the new base state
    Import { file: PathBuf },
    /// Manage the shadow-database sandbox
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
    /// Detect changes against the baseline (exit 1 when something changed)
    Diff {
        /// Only compare these tables
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        tables: Vec<String>,
    },
    /// Record the sandbox changes as a new layer
    Commit {
        #[arg(short, long)]
        message: String,
        /// Include data changes (TRUNCATE + re-insert)
        #[arg(long)]
        with_data: bool,
        /// Do not open $EDITOR on the generated SQL
        #[arg(long)]
        no_edit: bool,
    },
    /// Rebuild the database from the snapshot and the current branch
    Reset,
    /// List, create or delete branches
    Branch {
        name: Option<String>,
        #[arg(short, long)]
        delete: Option<String>,
    },
    /// Switch branch and rebuild the database
    Checkout { branch: String },
    /// Apply another branch's missing layers to the current branch
    Merge { branch: String },
    /// Same as merge, pulling from a source branch
    Pull { branch: String },
    /// Replay the current branch's own layers on top of another branch
    Rebase {
        onto: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_backup: bool,
    },
    /// Show layer history
    Log {
        branch: Option<String>,
        #[arg(long)]
        oneline: bool,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Resolve HEAD or a branch name
    RevParse { reference: String },
    /// Check a branch's layers for migration-safety anomalies
    Validate {
        branch: Option<String>,
        #[arg(long)]
        fix: bool,
    },
    /// Print the version
    Version,
}

#[derive(Subcommand, Debug)]
enum SandboxAction {
    Start,
    Rollback,
    Apply,
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn exit_if(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let project = match cli.directory {
        Some(dir) => Project::new(dir),
        None => Project::current_dir()?,
    };
    let yes = cli.yes;

    match cli.command {
        Command::Init => {
            commands::init::init(&project)?;
        }
        Command::Version => println!("dbl {}", env!("CARGO_PKG_VERSION")),
        Command::Branch { name, delete } => {
            commands::branch::branch(&project, name.as_deref(), delete.as_deref())?
        }
        Command::Rebase {
            onto,
            dry_run,
            no_backup,
        } => {
            commands::branch::rebase(&project, &onto, RebaseOptions { dry_run, no_backup })?;
        }
        Command::Log {
            branch,
            oneline,
            limit,
        } => commands::log::log(&project, branch.as_deref(), oneline, limit)?,
        Command::RevParse { reference } => {
            commands::log::rev_parse(&project, &reference)?;
        }
        Command::Validate { branch, fix } => {
            let report = commands::validate::validate(&project, branch.as_deref(), fix)?;
            return Ok(exit_if(report.is_fatal()));
        }
        command => {
            let ctx = Context::load(project, yes)?;
            return run_with_database(&ctx, command).await;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Commands that need the configured engine
async fn run_with_database(ctx: &Context, command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Import { file } => {
            commands::init::import(ctx, &file).await?;
        }
        Command::Sandbox { action } => match action {
            SandboxAction::Start => {
                commands::sandbox::start(ctx).await?;
            }
            SandboxAction::Rollback => {
                commands::sandbox::rollback(ctx).await?;
            }
            SandboxAction::Apply => {
                commands::sandbox::apply(ctx).await?;
            }
            SandboxAction::Status => {
                commands::sandbox::status(ctx)?;
            }
        },
        Command::Diff { tables } => {
            let changed = commands::diff::diff(ctx, tables).await?;
            return Ok(exit_if(changed));
        }
        Command::Commit {
            message,
            with_data,
            no_edit,
        } => {
            let options = CommitOptions {
                message,
                with_data,
                no_edit,
            };
            commands::commit::commit(ctx, &options).await?;
        }
        Command::Reset => {
            commands::reset::reset(ctx).await?;
        }
        Command::Checkout { branch } => {
            commands::branch::checkout(ctx, &branch).await?;
        }
        Command::Merge { branch } => {
            commands::branch::merge(ctx, &branch).await?;
        }
        Command::Pull { branch } => {
            commands::branch::pull(ctx, &branch).await?;
        }
        other => anyhow::bail!("'{:?}' does not use the database", other),
    }
    Ok(ExitCode::SUCCESS)
}

/// Logs go to stderr so command output on stdout stays pipeable
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .without_time()
                .compact(),
        )
        .init();
}
