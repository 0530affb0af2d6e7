//! The `docload` command line interface.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use argh::FromArgs;
use yansi::Paint;

use crate::config::Config;
use crate::run::Verdict;
use crate::{observability, report, run};

/// Exit code when thresholds did not hold at the end of a run.
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
/// Exit code when a threshold breach aborted the run.
pub const EXIT_ABORTED: u8 = 98;

/// Load generator for CouchDB-style document stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Validate(ValidateCommand),
}

/// run the load test
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// check the configuration and print it
///
/// This loads the configuration, builds the workload mix, parses thresholds and validates the
/// stage profile without contacting the target store.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "validate")]
struct ValidateCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<ExitCode> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("docload-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    match args.command {
        Command::Validate(ValidateCommand {}) => validate(&config),
        Command::Run(RunCommand {}) => {
            let progress = std::io::stderr().is_terminal();
            let report = runtime.block_on(run::run(&config, progress))?;
            report::print_report(&report);

            Ok(match report.verdict {
                Verdict::Passed => ExitCode::SUCCESS,
                Verdict::Failed(_) => ExitCode::from(EXIT_THRESHOLDS_FAILED),
                Verdict::Aborted(_) => ExitCode::from(EXIT_ABORTED),
            })
        }
    }
}

fn validate(config: &Config) -> Result<ExitCode> {
    let mix = config.mix().context("invalid workload mix")?;
    let profile = config.stage_profile().context("invalid stages")?;
    let thresholds = config.thresholds().context("invalid thresholds")?;

    println!("{config:#?}");
    println!();

    let kinds: Vec<_> = mix.kinds().map(|kind| kind.as_str()).collect();
    println!("{} {} (period {})", "mix:".bold(), kinds.join(", "), mix.period());
    println!(
        "{} {} stages over {:?}, up to {} users",
        "stages:".bold(),
        profile.stages().len(),
        profile.total_duration(),
        profile.max_target()
    );
    for threshold in &thresholds {
        let abort = if threshold.abort_on_fail { " (abort)" } else { "" };
        println!("{} {threshold}{abort}", "threshold:".bold());
    }
    println!("{}", "configuration is valid".green());

    Ok(ExitCode::SUCCESS)
}
