//! rvoip-call: place a call to an in-process peer, hold it, hang up.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rvoip_call_core::message::{TransportProtocol, Uri};
use rvoip_call_core::{CallAgent, CallConfig, CallEvent, LoopbackStack};

#[derive(Parser)]
#[command(name = "rvoip-call", version, about = "Single-call SIP demo over a loopback stack")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "RVOIP_CALL_CONFIG")]
    config: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call an auto-answering peer, hold the call, then hang up
    Call(CallArgs),
    /// Print the effective configuration as TOML
    Config(Overrides),
}

#[derive(Args)]
struct CallArgs {
    /// Who to call, `user@host[:port]`
    #[arg(default_value = "bob@127.0.0.1:5080")]
    target: String,

    /// How long to keep the call up
    #[arg(long, default_value_t = 2000)]
    hold_ms: u64,

    /// How long to wait for each call step
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Default)]
struct Overrides {
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    bind_ip: Option<IpAddr>,

    #[arg(long)]
    bind_port: Option<u16>,

    /// udp, tcp, tls or ws
    #[arg(long)]
    transport: Option<TransportProtocol>,
}

impl Overrides {
    fn apply(&self, mut config: CallConfig) -> CallConfig {
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(ip) = self.bind_ip {
            config.bind_ip = ip;
        }
        if let Some(port) = self.bind_port {
            config.bind_port = port;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        config
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> Result<CallConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => CallConfig::default(),
    };
    let config = overrides.apply(config);
    config.validate()?;
    Ok(config)
}

/// Configuration of the answering side, derived from the dial target
fn peer_config(local: &CallConfig, target: &Uri) -> CallConfig {
    let ip = target.host.parse().unwrap_or(local.bind_ip);
    let port = target.port.unwrap_or(local.default_remote_port);
    let user = target.user.clone().unwrap_or_else(|| "peer".to_string());
    CallConfig::new(user, ip, port)
        .with_transport(local.transport)
        .with_event_capacity(local.event_capacity)
}

async fn wait_for<F>(calls: &mut mpsc::Receiver<CallEvent>, within: Duration, mut matches: F) -> Result<CallEvent>
where
    F: FnMut(&CallEvent) -> bool,
{
    let wait = async {
        while let Some(event) = calls.recv().await {
            info!("Call event: {:?}", event);
            if matches(&event) {
                return Ok(event);
            }
            if let CallEvent::AttemptFailed { reason, .. } | CallEvent::TransportFailed { reason } = &event {
                bail!("call failed: {}", reason);
            }
        }
        Err(anyhow!("call agent stopped"))
    };
    tokio::time::timeout(within, wait)
        .await
        .context("timed out waiting for the call")?
}

async fn run_call(config: CallConfig, args: &CallArgs) -> Result<()> {
    let step = Duration::from_millis(args.timeout_ms);
    let target = Uri::parse_target(&args.target, config.default_remote_port)?;
    let peer = peer_config(&config, &target);

    let (local_stack, local_events) =
        LoopbackStack::with_capacity(config.local_addr(), config.transport, config.event_capacity);
    let (peer_stack, peer_events) =
        LoopbackStack::with_capacity(peer.local_addr(), peer.transport, peer.event_capacity);
    LoopbackStack::link(&local_stack, &peer_stack);

    let (local, mut calls) = CallAgent::new(config, local_stack)?;
    let (remote, mut remote_calls) = CallAgent::new(peer, peer_stack)?;
    let local_loop = local.start(local_events);
    let remote_loop = remote.start(peer_events);

    tokio::spawn(async move {
        while let Some(event) = remote_calls.recv().await {
            info!("Peer event: {:?}", event);
        }
    });

    let call_id = local.invite(&args.target).await?;
    wait_for(&mut calls, step, |event| {
        matches!(event, CallEvent::CallEstablished { call_id: id } if *id == call_id)
    })
    .await?;

    info!("Call {} up, holding for {} ms", call_id, args.hold_ms);
    tokio::time::sleep(Duration::from_millis(args.hold_ms)).await;

    local.hangup(&call_id).await?;
    wait_for(&mut calls, step, |event| {
        matches!(event, CallEvent::CallTerminated { call_id: id, .. } if *id == call_id)
    })
    .await?;

    local.shutdown();
    remote.shutdown();
    for handle in [local_loop, remote_loop] {
        if let Err(e) = handle.await {
            warn!("Event loop ended abnormally: {}", e);
        }
    }
    info!("Call {} finished", call_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match &cli.command {
        Command::Call(args) => {
            let config = load_config(cli.config.as_ref(), &args.overrides)?;
            run_call(config, args).await
        }
        Command::Config(overrides) => {
            let config = load_config(cli.config.as_ref(), overrides)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
