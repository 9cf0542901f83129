mod prompt;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use latch_common::{APP_NAME, LatchConfig, logging};
use latch_core::{Backoff, ReconnectMachine, ShutdownSignal, Target};
use latch_lifecycle::LaunchOptions;
use latch_net::NetConnector;
use latch_trust::TrustStore;
use tracing::{error, info};

use crate::prompt::TerminalPrompt;

#[derive(Debug, Parser)]
#[command(
    name = "latch",
    about = "Chat client daemon with trust-on-first-use certificate pinning",
    version
)]
struct Cli {
    /// Fork to a background process.
    #[arg(short, long)]
    daemonize: bool,
    /// Create a file with the process ID at the given path.
    #[arg(short, long)]
    pid: Option<PathBuf>,
    /// Config file (defaults to $LATCH_CONFIG or ~/.latch/config.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Known-hosts operations.
    Trust {
        #[command(subcommand)]
        command: TrustCommand,
    },
}

#[derive(Debug, Subcommand)]
enum TrustCommand {
    /// Print every trusted host and its fingerprint.
    List,
    /// Validate the known-hosts file.
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            // stderr is /dev/null once daemonized; the log may be all there is.
            error!("{err:#}");
            eprintln!("{APP_NAME}: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(LatchConfig::resolve_path);
    let (config, created) = LatchConfig::load_or_create(&config_path)?;
    config.validate()?;
    if created {
        eprintln!("{APP_NAME}: wrote default config to {}", config_path.display());
    }

    match cli.command {
        Some(Command::Trust { command }) => trust(command, &config),
        None => serve(cli.daemonize, cli.pid, config),
    }
}

fn serve(daemonize: bool, pid: Option<PathBuf>, config: LatchConfig) -> Result<ExitCode> {
    let options = LaunchOptions {
        daemonize,
        pid_file: pid.or_else(|| config.pid_file.clone()),
    };
    let mode = latch_lifecycle::prepare(&options)?;
    latch_lifecycle::apply_umask();

    let log_file = config.effective_log_file(mode.is_daemonized());
    latch_lifecycle::create_parent_dirs(
        std::iter::once(config.known_hosts_file.as_path()).chain(log_file.as_deref()),
    )?;
    match &log_file {
        Some(path) => logging::init_with_file(&config.log_level, path)
            .with_context(|| format!("failed to open log file {}", path.display()))?,
        None => logging::init(&config.log_level),
    }
    info!(mode = mode.as_str(), pid = std::process::id(), "starting {APP_NAME}");

    let store = TrustStore::load(&config.known_hosts_file)?;
    let shutdown = ShutdownSignal::install()?;
    let connector = NetConnector::from_config(&config)?;

    let mut machine = ReconnectMachine::new(
        Target::new(config.host.clone(), config.port),
        mode,
        store,
        connector,
        TerminalPrompt,
        shutdown,
    )
    .with_backoff(Backoff::from(config.reconnect));

    let outcome = machine.run();
    info!("Exiting...");
    Ok(ExitCode::from(outcome.exit_code()))
}

fn trust(command: TrustCommand, config: &LatchConfig) -> Result<ExitCode> {
    logging::init(&config.log_level);
    let store = TrustStore::load(&config.known_hosts_file)?;

    match command {
        TrustCommand::List => {
            for (host, fingerprint) in store.hosts() {
                println!("{host} {fingerprint}");
            }
        }
        TrustCommand::Check => {
            println!("known_hosts: {}", store.path().display());
            println!("status: ok");
            println!("hosts: {}", store.hosts().len());
        }
    }

    Ok(ExitCode::SUCCESS)
}
