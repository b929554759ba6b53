use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use import_watcher::config::TelemetryConfig;
use import_watcher::error::AppError;
use import_watcher::telemetry::{self, TelemetryGuard};
use import_watcher::watch::{ImportWatcher, ScanPolicy, ServiceProbe, SystemServiceProbe};
use import_watcher::{EmailNotifier, WatcherConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "import-watcher",
    about = "Detect and clear stuck files in an image import folder",
    version
)]
struct Cli {
    /// Dotenv file to read before the environment (defaults to ./watcher.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Mirror log output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one detection cycle (default command)
    Check(CheckArgs),
    /// Show which file a check would watch, without waiting or moving anything
    Scan(ScanArgs),
    /// Report whether a service is running
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Default)]
struct CheckArgs {
    /// Scan policy: exhaustive or single-oldest. The poll budget follows the
    /// policy default unless --timeout or POLL_TIMEOUT_SECS sets one
    #[arg(long, value_parser = parse_policy)]
    policy: Option<ScanPolicy>,
    /// Seconds to wait for the pipeline before declaring a stall
    #[arg(long)]
    timeout: Option<u64>,
    /// Seconds between existence checks
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,
    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Scan policy: exhaustive or single-oldest
    #[arg(long, value_parser = parse_policy)]
    policy: Option<ScanPolicy>,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Service name as known to the host service manager
    service: String,
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Check(CheckArgs::default()));

    match command {
        Command::Check(args) => {
            let (config, _guard) = load_config(cli.env_file.as_deref(), cli.log_file)?;
            run_check(config, args)
        }
        Command::Scan(args) => {
            let (config, _guard) = load_config(cli.env_file.as_deref(), cli.log_file)?;
            run_scan(config, args)
        }
        Command::Probe(args) => {
            let _guard = telemetry::init(&TelemetryConfig {
                log_file: cli.log_file,
                ..TelemetryConfig::default()
            })?;
            run_probe(args);
            Ok(())
        }
    }
}

fn parse_policy(raw: &str) -> Result<ScanPolicy, String> {
    raw.parse::<ScanPolicy>().map_err(|err| err.to_string())
}

fn load_config(
    env_file: Option<&Path>,
    log_file: Option<PathBuf>,
) -> Result<(WatcherConfig, TelemetryGuard), AppError> {
    match WatcherConfig::load(env_file) {
        Ok(mut config) => {
            if log_file.is_some() {
                config.telemetry.log_file = log_file;
            }
            let guard = telemetry::init(&config.telemetry)?;
            Ok((config, guard))
        }
        Err(err) => {
            let _guard = telemetry::init(&TelemetryConfig {
                log_file,
                ..TelemetryConfig::default()
            });
            error!(error = %err, "invalid configuration; exiting");
            Err(err.into())
        }
    }
}

fn run_check(mut config: WatcherConfig, args: CheckArgs) -> Result<(), AppError> {
    let CheckArgs {
        policy,
        timeout,
        interval,
        json,
    } = args;

    if let Some(secs) = timeout {
        config.scan.set_timeout(Duration::from_secs(secs));
    }
    if let Some(policy) = policy {
        config.scan.apply_policy(policy);
    }
    if let Some(secs) = interval {
        config.scan.poll.interval = Duration::from_secs(secs);
    }

    info!(
        root = %config.paths.root.display(),
        service = %config.service_name,
        node = %config.node_name,
        policy = %config.scan.policy,
        "starting import check"
    );

    let notifier = EmailNotifier::from_config(&config);
    let watcher = ImportWatcher::new(&config, Box::new(SystemServiceProbe), Box::new(notifier));
    let outcome = watcher.run()?;

    if json {
        let rendered = serde_json::to_string_pretty(&outcome).map_err(std::io::Error::from)?;
        println!("{rendered}");
    } else {
        println!("{outcome}");
    }
    Ok(())
}

fn run_scan(mut config: WatcherConfig, args: ScanArgs) -> Result<(), AppError> {
    if let Some(policy) = args.policy {
        config.scan.apply_policy(policy);
    }

    let notifier = EmailNotifier::new(&config, None);
    let watcher = ImportWatcher::new(&config, Box::new(SystemServiceProbe), Box::new(notifier));

    match watcher.preview()? {
        Some(file) => println!(
            "{} (modified {}, policy {})",
            file.path.display(),
            file.modified.to_rfc3339(),
            watcher.policy()
        ),
        None => println!("no pending files (policy {})", watcher.policy()),
    }
    Ok(())
}

fn run_probe(args: ProbeArgs) {
    let running = SystemServiceProbe.is_running(&args.service);
    info!(service = %args.service, running, "service probe");
    if running {
        println!("{}: running", args.service);
    } else {
        println!("{}: not running", args.service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_is_the_default_command() {
        let cli = Cli::try_parse_from(["import-watcher"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn check_accepts_policy_and_timing_overrides() {
        let cli = Cli::try_parse_from([
            "import-watcher",
            "check",
            "--policy",
            "single-oldest",
            "--timeout",
            "45",
            "--json",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Check(args)) => {
                assert_eq!(args.policy, Some(ScanPolicy::SingleOldest));
                assert_eq!(args.timeout, Some(45));
                assert!(args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_policy_and_zero_interval() {
        assert!(Cli::try_parse_from(["import-watcher", "check", "--policy", "random"]).is_err());
        assert!(Cli::try_parse_from(["import-watcher", "check", "--interval", "0"]).is_err());
    }
}
