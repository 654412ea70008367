use anyhow::Context;
use clap::Parser;
use rdsh::config::{ClientConfig, ServerConfig, DEFAULT_PORT};
use rdsh::prompt::{Prompt, RSH_PROMPT, SH_PROMPT};
use rdsh::remote::{exec_remote_cmd_loop, Server};
use rdsh::signal_handler::ignore_interrupts;
use rdsh::Shell;
use std::io::{self, IsTerminal};
use std::net::IpAddr;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rdsh", version, about = "Pipeline shell with a remote mode")]
struct Cli {
    /// Connect to a remote server instead of running commands locally
    #[arg(short = 'c', long, conflicts_with = "server")]
    client: bool,

    /// Serve commands to remote clients
    #[arg(short = 's', long)]
    server: bool,

    /// Interface to listen on (server) or address to connect to (client)
    #[arg(short = 'i', long, value_name = "IP")]
    interface: Option<IpAddr>,

    /// TCP port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Handle each client on its own thread
    #[arg(short = 'x', long, requires = "server")]
    threaded: bool,
}

fn prompt(prefix: &'static str) -> Prompt {
    if io::stdin().is_terminal() && io::stdout().is_terminal() {
        Prompt::decorated(prefix)
    } else {
        Prompt::plain(prefix)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    if cli.server {
        let mut config = ServerConfig {
            port: cli.port,
            threaded: cli.threaded,
            ..ServerConfig::default()
        };
        if let Some(interface) = cli.interface {
            config.interface = interface;
        }
        Server::bind(&config)
            .with_context(|| format!("starting server on {}", config.addr()))?
            .serve()?;
    } else if cli.client {
        let mut config = ClientConfig {
            port: cli.port,
            ..ClientConfig::default()
        };
        if let Some(address) = cli.interface {
            config.address = address;
        }
        exec_remote_cmd_loop(&config, &prompt(RSH_PROMPT), io::stdin().lock(), io::stdout())
            .with_context(|| format!("talking to {}", config.addr()))?;
    } else {
        // simple signal handling - Ctrl+C is for the children, not the shell
        ignore_interrupts().context("ignoring SIGINT")?;
        Shell::new(prompt(SH_PROMPT)).run(io::stdin().lock(), io::stdout())?;
    }

    Ok(())
}
