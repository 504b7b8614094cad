use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use journal_replicator::{
    AgentError, AllowAll, Agent, BoxedChannel, DiscoveryCodes, Server, ServerConfig,
};
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(name = "journal-replicator", version, about = "Journal replication server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the server and runs until interrupted (or `--halt-after`
    /// elapses, for smoke-testing a deployment).
    Serve {
        #[arg(long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "instance")]
        instance: Option<usize>,
        #[arg(long = "halt-after")]
        halt_after_secs: Option<u64>,
    },
    /// Prints the configuration that would be used, without starting.
    PrintConfig {
        #[arg(long = "config")]
        config: Option<PathBuf>,
    },
}

fn main() {
    journal_replicator::logging::init_logging();
    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            instance,
            halt_after_secs,
        } => cmd_serve(config, instance, halt_after_secs).await,
        Commands::PrintConfig { config } => cmd_print_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ServerConfig, Box<dyn Error>> {
    match path {
        None => Ok(ServerConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            let config: ServerConfig = toml::from_str(&text)?;
            Ok(config)
        }
    }
}

fn cmd_print_config(path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_serve(
    path: Option<PathBuf>,
    instance: Option<usize>,
    halt_after_secs: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(path)?;
    if let Some(instance) = instance {
        config.instance = instance;
    }
    config.validate()?;

    let codes = DiscoveryCodes {
        request_code: 230,
        response_code: 235,
    };
    let server: Arc<Server<()>> = Server::new(
        config,
        |addr| Box::new(ConnectivityAgent::new(addr)) as Box<dyn Agent>,
        Arc::new(AllowAll),
        codes,
    );

    server.start().await?;
    log::info!("journal-replicator started");

    match halt_after_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    log::info!("halting");
    server.halt(Duration::from_secs(5)).await;
    Ok(())
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Placeholder protocol used by the binary until a real wire-protocol
/// implementation is plugged in (see `journal_replicator::agent::Agent`):
/// it accepts a connection, logs whatever bytes arrive, and reports the
/// peer's disconnect. Exercises the accept/handle/halt lifecycle end to
/// end without speaking any particular replication protocol.
struct ConnectivityAgent {
    remote_addr: SocketAddr,
}

impl ConnectivityAgent {
    fn new(remote_addr: SocketAddr) -> Self {
        Self { remote_addr }
    }
}

impl Agent for ConnectivityAgent {
    fn process<'a>(&'a mut self, channel: &'a mut BoxedChannel) -> BoxFuture<'a, Result<(), AgentError>> {
        Box::pin(async move {
            let mut buf = [0u8; 4096];
            let n = channel.read(&mut buf).await?;
            if n == 0 {
                return Err(AgentError::Disconnected);
            }
            log::debug!("{} sent {} byte(s)", self.remote_addr, n);
            Ok(())
        })
    }

    fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            log::debug!("closing connection to {}", self.remote_addr);
        })
    }
}
