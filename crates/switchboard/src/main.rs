use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use switchboard::config::{APP_NAME, ClientConfig};
use switchboard::protocol::MaintenanceNoticeId;
use switchboard::{CacheError, Error, Service, SupervisorService};

/// A connection that stayed up this long resets the reconnect backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

const MAX_BACKOFF: Duration = Duration::from_secs(60);

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let config_path = cli.common.config.clone().or_else(ClientConfig::default_path);
    debug!("config file: {config_path:?}");
    let config = ClientConfig::load(config_path.as_deref()).context("loading configuration")?;

    if let Command::Config { command } = cli.command {
        return handle_config(&config, config_path, command);
    }
    async_main(config, cli.command)
}

#[tokio::main]
async fn async_main(config: ClientConfig, command: Command) -> Result<()> {
    if config.credentials.username.is_empty() {
        bail!(
            "no credentials configured; set [credentials] in the config file or \
             SWITCHBOARD__CREDENTIALS__USERNAME / SWITCHBOARD__CREDENTIALS__PASSWORD"
        );
    }
    let service = Service::new(config).context("building service")?;

    match command {
        Command::Watch(cmd) => handle_watch(&service, cmd).await,
        Command::Users => print_json(&service.supervisor().domain_users().await?),
        Command::Queues => print_json(&service.supervisor().queues().await?),
        Command::ReasonCodes(cmd) => {
            let codes = if cmd.agent {
                service.agent().reason_codes().await?
            } else {
                service.supervisor().reason_codes().await?
            };
            print_json(&codes)
        }
        Command::Notices(cmd) => {
            let agent = service.agent();
            for id in &cmd.accept {
                let notice = agent
                    .accept_maintenance_notice(&MaintenanceNoticeId::new(id.as_str()))
                    .await
                    .with_context(|| format!("accepting maintenance notice {id}"))?;
                info!("accepted maintenance notice {}", notice.id);
            }
            print_json(&agent.maintenance_notices().await?)
        }
        Command::Config { .. } => bail!("config commands do not need a session"),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Switchboard - contact-center session engine and live statistics mirror.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Enable debug logging (equivalent to -v)
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream live statistics, reconnecting until interrupted
    Watch(WatchCommand),
    /// List every user in the domain
    Users,
    /// List every queue (skill) in the domain
    Queues,
    /// List logout and not-ready reason codes
    ReasonCodes(ReasonCodesCommand),
    /// List (and optionally accept) the agent's maintenance notices
    Notices(NoticesCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct WatchCommand {
    /// Seconds between agent state summaries
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    report_every: u64,
}

#[derive(Debug, Clone, Args)]
struct ReasonCodesCommand {
    /// Query in the agent login context instead of the supervisor one
    #[arg(long)]
    agent: bool,
}

#[derive(Debug, Clone, Args)]
struct NoticesCommand {
    /// Accept the notice with this id before listing (repeatable)
    #[arg(long, value_name = "ID")]
    accept: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration, password masked
    Show,
    /// Print the resolved config file path
    Path,
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.quiet {
        return LevelFilter::Error;
    }
    match (common.verbose, common.debug) {
        (0, false) => LevelFilter::Info,
        (0, true) | (1, _) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(common: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = effective_log_level(common);
    let level_name = level.to_string().to_lowercase();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level_name}")));

    if common.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .ok();
    }

    // Fallback for `log` users when no bridge was installed above
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_module(APP_NAME, level);
    builder.try_init().ok();
}

fn handle_config(
    config: &ClientConfig,
    path: Option<PathBuf>,
    command: ConfigCommand,
) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let text = toml::to_string_pretty(&config.redacted())
                .context("serializing configuration to TOML")?;
            print!("{text}");
        }
        ConfigCommand::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => bail!("no config directory available on this platform"),
        },
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{text}");
    Ok(())
}

async fn handle_watch(service: &Service, cmd: WatchCommand) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
            }
            cancel.cancel();
        }
    });

    let supervisor = service.supervisor();
    let report_every = Duration::from_secs(cmd.report_every.max(1));
    tokio::join!(
        reconnect_loop(supervisor, &cancel),
        report_loop(supervisor, &cancel, report_every),
    );

    ctrl_c.abort();
    Ok(())
}

async fn reconnect_loop(supervisor: &SupervisorService, cancel: &CancellationToken) {
    let mut failures: u32 = 0;
    loop {
        let started = Instant::now();
        let err = match supervisor.run_push(cancel.child_token()).await {
            Err(err) => err,
            Ok(()) => Error::Cancelled,
        };
        if cancel.is_cancelled() {
            info!("watch stopped");
            return;
        }

        if started.elapsed() >= STABLE_CONNECTION {
            failures = 0;
        }
        failures += 1;
        let backoff = backoff_for(failures);
        warn!("push connection ended: {err}; reconnecting in {backoff:?}");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// 1s, 2s, 4s ... capped at [`MAX_BACKOFF`].
fn backoff_for(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(6);
    Duration::from_secs(1u64 << exponent).min(MAX_BACKOFF)
}

async fn report_loop(supervisor: &SupervisorService, cancel: &CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match supervisor.agent_states().await {
            Ok(states) => {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for state in states.values() {
                    let name = serde_json::to_value(state.state)
                        .ok()
                        .and_then(|value| value.as_str().map(str::to_string))
                        .unwrap_or_else(|| "UNKNOWN".to_string());
                    *counts.entry(name).or_default() += 1;
                }
                tracing::info!(agents = states.len(), states = ?counts, "agent summary");
            }
            Err(Error::Cache(CacheError::NotReady)) => debug!("waiting for first snapshot"),
            Err(err) => warn!("agent summary unavailable: {err}"),
        }
    }
}
