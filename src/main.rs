//! Syntropy Setup CLI
//!
//! Entry point for the grid agent bootstrap. Maps subcommands onto the
//! setup engine and engine outcomes onto stable process exit codes so
//! provisioning scripts can branch on the result.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use dialoguer::Confirm;
use tokio::signal;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use syntropy_setup::engine::{
    InstallHealth, ResetOutcome, SetupEngine, SetupOutcome, SetupReport, StatusReport,
};
use syntropy_setup::error::SetupError;
use syntropy_setup::probe;
use syntropy_setup::types::SetupOptions;

const VERSION: &str = "0.1.0";

/// Syntropy Setup -- grid agent bootstrap
#[derive(Parser, Debug)]
#[command(
    name = "syntropy-setup",
    version = VERSION,
    about = "Bootstrap the Syntropy grid agent for the current user"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full setup pipeline (idempotent; re-runs are safe)
    Setup {
        #[command(flatten)]
        common: CommonOpts,

        /// Render and install the agent service definition
        #[arg(long)]
        install_service: bool,

        /// Probe and validate the host, then exit without touching disk
        #[arg(long)]
        validate_only: bool,
    },
    /// Report install health without mutating anything
    Status {
        #[command(flatten)]
        common: CommonOpts,
    },
    /// Remove the entire install directory
    Reset {
        #[command(flatten)]
        common: CommonOpts,

        /// Skip the interactive confirmation
        #[arg(long)]
        confirm: bool,
    },
    /// Re-run every setup step whose effect is missing on disk
    Repair {
        #[command(flatten)]
        common: CommonOpts,
    },
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// Proceed past validation errors and regenerate existing artifacts
    #[arg(long)]
    force: bool,

    /// Verbose diagnostic output
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Suppress everything except errors
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    quiet: bool,

    /// Write the configuration document to this path instead of the default
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Treat this directory as the user's home
    #[arg(long, value_name = "PATH")]
    home: Option<PathBuf>,
}

impl CommonOpts {
    fn to_options(&self, install_service: bool, validate_only: bool) -> SetupOptions {
        SetupOptions {
            force: self.force,
            install_service,
            validate_only,
            config_path_override: self.config.clone(),
            home_dir_override: self.home.clone(),
            verbose: self.verbose,
            quiet: self.quiet,
        }
    }
}

fn init_tracing(opts: &CommonOpts) {
    let default = if opts.verbose {
        "syntropy_setup=debug"
    } else if opts.quiet {
        "syntropy_setup=error"
    } else {
        "syntropy_setup=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Setup {
            common,
            install_service,
            validate_only,
        } => {
            init_tracing(&common);
            run_setup(common.to_options(install_service, validate_only)).await
        }
        Command::Status { common } => {
            init_tracing(&common);
            run_status(common.to_options(false, false))
        }
        Command::Reset { common, confirm } => {
            init_tracing(&common);
            run_reset(common.to_options(false, false), confirm)
        }
        Command::Repair { common } => {
            init_tracing(&common);
            run_repair(common.to_options(false, false)).await
        }
    }
}

// ---- setup ------------------------------------------------------------------

async fn run_setup(options: SetupOptions) -> ExitCode {
    let quiet = options.quiet;
    let engine = match SetupEngine::new(probe::for_host(), options) {
        Ok(engine) => engine,
        Err(err) => return fail(&err, ExitCode::from(2)),
    };

    // Steps always run to completion; the flag stops the pipeline at the
    // next step boundary.
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });

    match engine.setup().await {
        Ok(report) => {
            print_setup_report(&report, quiet);
            match report.outcome {
                SetupOutcome::Completed | SetupOutcome::AlreadyInstalled => ExitCode::SUCCESS,
                SetupOutcome::ValidateOnly => {
                    if report.verdict.can_proceed {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(1)
                    }
                }
                SetupOutcome::ValidationBlocked => ExitCode::from(1),
            }
        }
        Err(err) if err.is_busy() => fail(&err, ExitCode::from(3)),
        Err(err) => fail(&err, ExitCode::from(2)),
    }
}

fn print_setup_report(report: &SetupReport, quiet: bool) {
    if !quiet {
        match report.outcome {
            SetupOutcome::Completed => {
                println!("{} setup complete", "\u{2713}".green());
                if let Some(fp) = &report.fingerprint {
                    println!("  owner key  {}", fp.cyan());
                }
                println!("  config     {}", report.config_path.display());
            }
            SetupOutcome::AlreadyInstalled => {
                println!("{} already installed and healthy", "\u{2713}".green());
                if let Some(fp) = &report.fingerprint {
                    println!("  owner key  {}", fp.cyan());
                }
            }
            SetupOutcome::ValidateOnly => {
                if report.verdict.can_proceed {
                    println!("{} environment is suitable", "\u{2713}".green());
                } else {
                    println!("{} environment is not suitable", "\u{2717}".red());
                }
            }
            SetupOutcome::ValidationBlocked => {
                println!(
                    "{} validation failed, nothing was written (use --force to override)",
                    "\u{2717}".red()
                );
            }
        }
        for warning in &report.warnings {
            println!("  {} {}", "warning:".yellow(), warning);
        }
    }
    for error in &report.verdict.errors {
        eprintln!("  {} {}", "error:".red(), error);
    }
}

// ---- status -----------------------------------------------------------------

fn run_status(options: SetupOptions) -> ExitCode {
    let quiet = options.quiet;
    let engine = match SetupEngine::new(probe::for_host(), options) {
        Ok(engine) => engine,
        Err(err) => return fail(&err, ExitCode::from(11)),
    };

    match engine.status() {
        Ok(report) => {
            print_status_report(&report, quiet);
            match report.health {
                InstallHealth::Healthy => ExitCode::SUCCESS,
                InstallHealth::NotInstalled => ExitCode::from(10),
                InstallHealth::Degraded(_) => ExitCode::from(11),
            }
        }
        Err(err) => fail(&err, ExitCode::from(11)),
    }
}

fn print_status_report(report: &StatusReport, quiet: bool) {
    if quiet {
        return;
    }
    match &report.health {
        InstallHealth::Healthy => {
            println!("{} install is healthy", "\u{2713}".green());
        }
        InstallHealth::NotInstalled => {
            println!("{} not installed ({})", "\u{25cb}".dimmed(), report.root.display());
            return;
        }
        InstallHealth::Degraded(issues) => {
            println!("{} install is degraded", "\u{2717}".red());
            for issue in issues {
                println!("  {} {}", "issue:".yellow(), issue);
            }
        }
    }
    println!("  root       {}", report.root.display());
    println!("  config     {}", report.config_path.display());
    if let Some(fp) = &report.fingerprint {
        println!("  owner key  {}", fp.cyan());
    }
    if let Some(state) = &report.state {
        println!("  last run   {} ({:?})", state.last_updated, state.status);
        debug!(completed = ?state.completed_steps, "run state detail");
    }
}

// ---- reset ------------------------------------------------------------------

fn run_reset(options: SetupOptions, confirm_flag: bool) -> ExitCode {
    let quiet = options.quiet;
    let force = options.force;
    let engine = match SetupEngine::new(probe::for_host(), options) {
        Ok(engine) => engine,
        Err(err) => return fail(&err, ExitCode::from(2)),
    };

    let confirmed = confirm_flag
        || force
        || Confirm::new()
            .with_prompt(format!(
                "Remove {} and everything under it?",
                engine.layout().root.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

    match engine.reset(confirmed) {
        Ok(ResetOutcome::Removed) => {
            if !quiet {
                println!("{} install removed", "\u{2713}".green());
            }
            ExitCode::SUCCESS
        }
        Ok(ResetOutcome::NothingToRemove) => {
            if !quiet {
                println!("{} nothing to remove", "\u{25cb}".dimmed());
            }
            ExitCode::SUCCESS
        }
        Ok(ResetOutcome::Refused) => {
            eprintln!("{} reset aborted", "\u{2717}".red());
            ExitCode::from(1)
        }
        Err(err) => fail(&err, ExitCode::from(2)),
    }
}

// ---- repair -----------------------------------------------------------------

async fn run_repair(options: SetupOptions) -> ExitCode {
    let quiet = options.quiet;
    let engine = match SetupEngine::new(probe::for_host(), options) {
        Ok(engine) => engine,
        Err(err) => return fail(&err, ExitCode::from(2)),
    };

    match engine.repair().await {
        Ok(report) => {
            if !quiet {
                println!("{} repair complete", "\u{2713}".green());
                for warning in &report.warnings {
                    println!("  {} {}", "warning:".yellow(), warning);
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err, ExitCode::from(2)),
    }
}

// ---- shared -----------------------------------------------------------------

fn fail(err: &SetupError, code: ExitCode) -> ExitCode {
    eprintln!("{} {} ({})", "error:".red(), err, err.code());
    code
}
