//! Stagehand - contract upgrade deploys
//!
//! Usage:
//!   stagehand env new dev --chain-id 31337
//!   stagehand upgrade register upgrades/v2
//!   stagehand deploy run --env dev --to 2.0.0
//!   stagehand deploy status --env dev

mod interactive;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use semver::Version;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use stagehand_core::commands::{
    DeployCommand, DeployRunReport, DeployStatusReport, DeployTarget, EnvCommand, NewEnvOptions,
    UpgradeCommand,
};
use stagehand_core::context::AppContext;
use stagehand_core::deploy::{Deploy, DriverError, Phase, StepError, StepOptions};
use stagehand_core::upgrade::{PathChoice, choose_path};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Versioned contract upgrade deploys", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project root holding stagehand.toml
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage environments
    Env(EnvArgs),
    /// Register and inspect upgrades
    Upgrade(UpgradeArgs),
    /// Run and inspect deploys
    Deploy(DeployArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args)]
struct EnvArgs {
    #[command(subcommand)]
    command: EnvSubcommand,
}

#[derive(Subcommand)]
enum EnvSubcommand {
    /// Create an environment
    New {
        name: String,
        #[arg(long)]
        chain_id: u64,
        /// Version already deployed
        #[arg(long, default_value = "0.0.0")]
        version: Version,
    },
    /// Show one environment
    Show {
        name: String,
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
    /// List environments
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct UpgradeArgs {
    #[command(subcommand)]
    command: UpgradeSubcommand,
}

#[derive(Subcommand)]
enum UpgradeSubcommand {
    /// Register the upgrade.json in a directory
    Register { dir: PathBuf },
    /// List registered upgrades
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
    /// Show upgrade paths from an environment to a version
    Paths {
        #[arg(long)]
        env: String,
        #[arg(long)]
        to: Version,
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct DeployArgs {
    #[command(subcommand)]
    command: DeploySubcommand,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    env: String,
    /// Upgrade to start
    #[arg(long, conflicts_with_all = ["to", "resume"])]
    upgrade: Option<String>,
    /// Target version; runs every upgrade on the path
    #[arg(long, conflicts_with = "resume")]
    to: Option<Version>,
    /// Continue the deploy in progress
    #[arg(long)]
    resume: bool,
    /// EOA signer id from stagehand.toml
    #[arg(long)]
    signer: Option<String>,
    /// Never prompt
    #[arg(long)]
    non_interactive: bool,
    /// Override [chain] rpc_url
    #[arg(long)]
    rpc_url: Option<Url>,
    /// Passed to scripts as STAGEHAND_FORK
    #[arg(long)]
    fork: Option<String>,
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum DeploySubcommand {
    /// Start or resume a deploy
    Run(Box<RunArgs>),
    /// Show the deploy in progress
    Status {
        #[arg(long)]
        env: String,
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
    /// Cancel the deploy in progress
    Cancel {
        #[arg(long)]
        env: String,
        /// Cancel even if an open multisig proposal must be rejected by hand
        #[arg(long)]
        force: bool,
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show the environment's deploy lock
    Lock {
        #[arg(long)]
        env: String,
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "stagehand=debug,info"
    } else {
        "stagehand=info,warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ctx = match &cli.project {
        Some(root) => AppContext::new(root.clone())?,
        None => AppContext::from_current_dir()?,
    };

    match cli.command {
        Commands::Env(args) => run_env(&ctx, args.command),
        Commands::Upgrade(args) => run_upgrade(&ctx, args.command),
        Commands::Deploy(args) => run_deploy(&ctx, args.command),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_env(ctx: &AppContext, command: EnvSubcommand) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let cmd = EnvCommand::new(store.as_ref());
    match command {
        EnvSubcommand::New {
            name,
            chain_id,
            version,
        } => {
            let manifest = cmd.create(&NewEnvOptions::new(name, chain_id).with_version(version))?;
            println!(
                "{} Created environment {} (chain {}, version {})",
                style("✓").green(),
                style(&manifest.id).bold(),
                manifest.chain_id,
                manifest.deployed_version
            );
        }
        EnvSubcommand::Show { name, format } => {
            let report = cmd.show(&name)?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => {
                    println!("{}", style(&report.manifest.id).bold());
                    println!("  Chain:    {}", report.manifest.chain_id);
                    println!("  Version:  {}", report.manifest.deployed_version);
                    if !report.manifest.latest_deployed_commit.is_empty() {
                        println!("  Commit:   {}", report.manifest.latest_deployed_commit);
                    }
                    println!(
                        "  Deploy:   {}",
                        report.in_progress_deploy.as_deref().unwrap_or("-")
                    );
                    for (name, contract) in &report.manifest.contracts.singletons {
                        println!("  {:<24} {}", name, contract.address);
                    }
                    for (name, value) in &report.parameters {
                        println!("  {:<24} {}", style(name).dim(), value);
                    }
                }
            }
        }
        EnvSubcommand::List { format } => {
            let envs = cmd.list()?;
            match format {
                OutputFormat::Json => print_json(&envs)?,
                OutputFormat::Table => {
                    if envs.is_empty() {
                        println!("No environments");
                    }
                    println!("{:<16} {:>10} {:<12} DEPLOY", "NAME", "CHAIN", "VERSION");
                    for env in envs {
                        println!(
                            "{:<16} {:>10} {:<12} {}",
                            env.name,
                            env.chain_id,
                            env.deployed_version.to_string(),
                            env.in_progress_deploy.as_deref().unwrap_or("-")
                        );
                    }
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_upgrade(ctx: &AppContext, command: UpgradeSubcommand) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    let cmd = UpgradeCommand::new(store.as_ref());
    match command {
        UpgradeSubcommand::Register { dir } => {
            let report = cmd.register(&dir)?;
            let verb = if report.replaced { "Updated" } else { "Registered" };
            println!(
                "{} {} upgrade {} ({} -> {}, {} phase(s))",
                style("✓").green(),
                verb,
                style(&report.name).bold(),
                report.from,
                report.to,
                report.phases
            );
        }
        UpgradeSubcommand::List { format } => {
            let upgrades = cmd.list()?;
            match format {
                OutputFormat::Json => print_json(&upgrades)?,
                OutputFormat::Table => {
                    println!("{:<32} {:<20} {:<12} PHASES", "NAME", "FROM", "TO");
                    for upgrade in upgrades {
                        println!(
                            "{:<32} {:<20} {:<12} {}",
                            upgrade.name,
                            upgrade.from,
                            upgrade.to.to_string(),
                            upgrade.phases
                        );
                    }
                }
            }
        }
        UpgradeSubcommand::Paths { env, to, format } => {
            let report = cmd.paths(&env, &to)?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => {
                    if report.paths.is_empty() {
                        println!("No upgrade path from {} to {}", report.from, report.to);
                    }
                    for path in &report.paths {
                        let marker = if report.chosen.as_ref() == Some(path) {
                            style("*").green().to_string()
                        } else {
                            " ".to_string()
                        };
                        let text = if path.is_empty() {
                            "(already at target)".to_string()
                        } else {
                            path.join(" -> ")
                        };
                        println!("{} {}", marker, text);
                    }
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_deploy(ctx: &AppContext, command: DeploySubcommand) -> Result<ExitCode> {
    let store = ctx.open_store()?;
    match command {
        DeploySubcommand::Run(args) => {
            let prompt = interactive::can_prompt(args.non_interactive);
            let options = StepOptions {
                non_interactive: !prompt,
                signer: args.signer.clone(),
                rpc_url: args.rpc_url.clone(),
                fork: args.fork.clone(),
                ..StepOptions::default()
            };
            let session = ctx.session(options, prompt.then(interactive::signer_prompt))?;
            let cmd = DeployCommand::new(store.as_ref(), ctx.driver(store.as_ref(), &session));

            let target = match (&args.upgrade, &args.to, args.resume) {
                (Some(upgrade), _, _) => DeployTarget::Upgrade(upgrade.clone()),
                (None, Some(version), _) => {
                    let paths = cmd.driver().candidate_paths(&args.env, version)?;
                    match choose_path(&paths) {
                        PathChoice::Ambiguous(tied) if prompt => {
                            let Some(path) = interactive::select_path(&tied)? else {
                                anyhow::bail!("No upgrade path selected");
                            };
                            DeployTarget::Path(path)
                        }
                        _ => DeployTarget::Version(version.clone()),
                    }
                }
                (None, None, _) => DeployTarget::Resume,
            };

            match cmd.run(&args.env, &target) {
                Ok(report) => render_run(&report, args.format),
                Err(err) => render_driver_error(err),
            }
        }
        DeploySubcommand::Status { env, format } => {
            let session = ctx.session(StepOptions::default(), None)?;
            let cmd = DeployCommand::new(store.as_ref(), ctx.driver(store.as_ref(), &session));
            let report = cmd.status(&env)?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => print_status(&report),
            }
            Ok(ExitCode::SUCCESS)
        }
        DeploySubcommand::Cancel {
            env,
            force,
            non_interactive,
        } => {
            let options = StepOptions {
                non_interactive: !interactive::can_prompt(non_interactive),
                force_cancel: force,
                ..StepOptions::default()
            };
            let session = ctx.session(options, None)?;
            let cmd = DeployCommand::new(store.as_ref(), ctx.driver(store.as_ref(), &session));
            match cmd.cancel(&env) {
                Ok(deploy) => {
                    println!(
                        "{} Cancelled {}",
                        style("✓").green(),
                        style(&deploy.name).bold()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => render_driver_error(err),
            }
        }
        DeploySubcommand::Lock { env, format } => {
            let session = ctx.session(StepOptions::default(), None)?;
            let cmd = DeployCommand::new(store.as_ref(), ctx.driver(store.as_ref(), &session));
            let report = cmd.lock(&env, chrono::Utc::now())?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => match &report.record.holder {
                    Some(holder) if report.record.is_held() => {
                        let state = if report.stale {
                            style("stale").yellow()
                        } else {
                            style("held").red()
                        };
                        println!("{} is {} by {}", report.env, state, holder);
                        if let Some(description) = &report.record.description {
                            println!("  Operation: {description}");
                        }
                        if let Some(until) = report.record.until_timestamp_ms {
                            println!("  Until:     {until}");
                        }
                    }
                    _ => println!("{} is {}", report.env, style("unlocked").green()),
                },
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn render_run(report: &DeployRunReport, format: OutputFormat) -> Result<ExitCode> {
    if let OutputFormat::Json = format {
        print_json(report)?;
    } else {
        for deploy in &report.deploys {
            print_outcome(deploy);
        }
        if report.deploys.is_empty() {
            println!("Nothing to deploy");
        }
    }
    let completed = report
        .last()
        .is_none_or(|deploy| deploy.phase == Phase::Complete);
    Ok(if completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_outcome(deploy: &Deploy) {
    let phase = match deploy.phase {
        Phase::Complete => style(deploy.phase.to_string()).green(),
        Phase::Cancelled => style(deploy.phase.to_string()).yellow(),
        _ => style(deploy.phase.to_string()).red(),
    };
    println!("{} {}", style(&deploy.name).bold(), phase);
}

/// Pauses and halts are expected outcomes: show how to continue and exit
/// non-zero. Anything else propagates as an error.
fn render_driver_error(err: DriverError) -> Result<ExitCode> {
    match err {
        DriverError::Step(step @ StepError::Pause { .. }) => {
            eprintln!("{} {}", style("⏸").yellow(), step);
            if let Some(command) = step.resume_command() {
                eprintln!("  Re-run to continue: {}", style(command).cyan());
            }
            Ok(ExitCode::from(3))
        }
        DriverError::Step(step @ StepError::Halt { .. }) => {
            eprintln!("{} {}", style("✗").red(), step);
            if let Some(command) = step.resume_command() {
                eprintln!(
                    "  Fix the problem, then resume with: {}",
                    style(command).cyan()
                );
            }
            Ok(ExitCode::from(2))
        }
        other => Err(other.into()),
    }
}

fn print_status(report: &DeployStatusReport) {
    println!(
        "{} at {}",
        style(&report.env).bold(),
        report.deployed_version
    );
    if let Some(holder) = report.lock.holder.as_deref().filter(|_| report.lock.is_held()) {
        println!("  Locked by {}", style(holder).yellow());
    }
    let Some(deploy) = &report.deploy else {
        println!("  No deploy in progress");
        return;
    };
    println!("  Deploy:  {}", deploy.name);
    println!("  Upgrade: {}", deploy.upgrade);
    println!("  Phase:   {}", deploy.phase);
    println!("  Started: {}", deploy.start_time);
    for segment in &report.segments {
        let marker = if segment.current { ">" } else { " " };
        println!(
            "  {} {:>2} {:<9} {:<32} {}",
            marker, segment.id, segment.kind, segment.filename, segment.summary
        );
    }
}
