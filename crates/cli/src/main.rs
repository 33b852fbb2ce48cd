use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use lib::relay::{RegisterRequest, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "pairlink")]
#[command(about = "pairlink: relay between one device and one controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the relay (HTTP health probe + WebSocket on one port).
    Relay {
        /// Config file path (default: PAIRLINK_CONFIG_PATH or ~/.pairlink/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Listen port (default from PAIRLINK_PORT, config, or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Connect to a relay as a role; stdin lines are sent as frames and received frames are printed.
    Connect {
        /// Role to register as.
        #[arg(long, short, value_enum)]
        role: RoleArg,

        /// Relay URL (default: ws://127.0.0.1:<configured port>/)
        #[arg(long, short, value_name = "URL")]
        url: Option<String>,

        /// Config file path, used only to find the default port.
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Device,
    Controller,
}

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Device => Role::Device,
            RoleArg::Controller => Role::Controller,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pairlink {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Relay { config, port }) => {
            if let Err(e) = run_relay(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Connect { role, url, config }) => {
            if let Err(e) = run_connect(role.into(), url, config).await {
                log::error!("connect failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_relay(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::debug!("using config {}", path.display());
    log::info!("starting relay on {}", config.relay.bind_addr());
    lib::relay::run_relay(config).await
}

async fn run_connect(
    role: Role,
    url: Option<String>,
    config_path: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let url = match url {
        Some(u) => u,
        None => {
            let (config, _) = lib::config::load_config(config_path)?;
            format!("ws://127.0.0.1:{}/", config.relay.port)
        }
    };

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}", url))?;
    let (mut write, mut read) = ws.split();

    let register = RegisterRequest::new(role)
        .to_text()
        .context("encoding registration")?;
    write
        .send(Message::Text(register))
        .await
        .context("sending registration")?;
    eprintln!(
        "registered as {} on {}; type JSON lines to send, Ctrl+D to quit",
        role, url
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(e) = serde_json::from_str::<serde_json::Value>(text) {
                    eprintln!("warning: not valid JSON ({}); the relay will drop it", e);
                }
                write
                    .send(Message::Text(text.to_string()))
                    .await
                    .context("sending frame")?;
            }
            msg = read.next() => {
                match msg {
                    None => {
                        println!("connection closed");
                        break;
                    }
                    Some(Err(e)) => return Err(e).context("reading from relay"),
                    Some(Ok(Message::Text(text))) => println!("< {}", text),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => println!("closed by relay: {} {}", u16::from(f.code), f.reason),
                            None => println!("closed by relay"),
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn connect_parses_role() {
        let cli = Cli::try_parse_from(["pairlink", "connect", "--role", "controller"]).unwrap();
        match cli.command {
            Some(Commands::Connect { role, url, .. }) => {
                assert_eq!(Role::from(role), Role::Controller);
                assert!(url.is_none());
            }
            _ => panic!("expected connect"),
        }
        assert!(Cli::try_parse_from(["pairlink", "connect", "--role", "esp32"]).is_err());
    }

    #[test]
    fn relay_port_flag() {
        let cli = Cli::try_parse_from(["pairlink", "relay", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Relay { port: Some(9000), .. })));
    }
}
