//! Vault MCP Bridge
//!
//! Serves a vault's notes, tasks and templates to MCP clients, directly or
//! through a relay.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use vault_mcp_bridge::bridge::{ConnectionManager, Link, WsConnector};
use vault_mcp_bridge::client::BridgeClient;
use vault_mcp_bridge::config::{expand_tilde, Config};
use vault_mcp_bridge::error::Result;
use vault_mcp_bridge::mcp::router::McpRouter;
use vault_mcp_bridge::transport::{EmbeddedServer, RelayServer};
use vault_mcp_bridge::vault::{registry_for, HostEnvironment};

/// Vault MCP Bridge
#[derive(Parser)]
#[command(name = "vault-mcp-bridge")]
#[command(author, version, about = "Vault MCP Bridge - expose a vault to Model Context Protocol clients")]
struct Cli {
    /// Vault directory (defaults to VAULT_MCP_VAULT or the current directory)
    #[arg(long, global = true)]
    vault: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the vault over HTTP (default)
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Require `Authorization: Bearer <token>`
        #[arg(long)]
        auth_token: Option<String>,
    },

    /// Run the relay between a dialing host and HTTP clients
    Relay {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        ws_port: Option<u16>,

        #[arg(long)]
        http_port: Option<u16>,

        /// Seconds to wait for the host to answer a request
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Dial a relay and answer its requests from the vault
    Connect {
        /// Relay WebSocket URL
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        reconnect_ms: Option<u64>,

        /// 0 retries forever
        #[arg(long)]
        max_reconnects: Option<u32>,
    },

    /// Call a running server
    Call {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:4123")]
        url: String,

        #[arg(long)]
        auth_token: Option<String>,

        #[command(subcommand)]
        action: CallAction,
    },
}

#[derive(Subcommand)]
enum CallAction {
    /// `tools/list` over RPC
    List,

    /// `GET /tools`
    Tools,

    /// Any method, with optional JSON params
    Rpc {
        method: String,
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::new()?;
    if let Some(vault) = cli.vault.as_deref() {
        config.vault_path = expand_tilde(vault);
    }

    match cli.command {
        None => run_embedded(config).await,
        Some(Commands::Serve {
            host,
            port,
            auth_token,
        }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
                config.auth_token = Some(token);
            }
            run_embedded(config).await
        }
        Some(Commands::Relay {
            host,
            ws_port,
            http_port,
            timeout,
        }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = ws_port {
                config.ws_port = port;
            }
            if let Some(port) = http_port {
                config.http_port = port;
            }
            if let Some(timeout) = timeout {
                config.request_timeout_secs = timeout;
            }
            run_relay(config).await
        }
        Some(Commands::Connect {
            url,
            reconnect_ms,
            max_reconnects,
        }) => {
            if let Some(url) = url {
                config.relay_url = url;
            }
            if let Some(ms) = reconnect_ms {
                config.reconnect_interval_ms = ms;
            }
            if let Some(max) = max_reconnects {
                config.max_reconnect_attempts = max;
            }
            run_host(config).await
        }
        Some(Commands::Call {
            url,
            auth_token,
            action,
        }) => {
            let token = auth_token.or(config.auth_token);
            run_call(BridgeClient::new(url, token), action).await
        }
    }
}

fn load_router(config: &Config) -> Result<McpRouter> {
    let env = HostEnvironment::load(&PathBuf::from(&config.vault_path))?;
    Ok(McpRouter::new(Arc::new(registry_for(&env))))
}

async fn run_embedded(config: Config) -> Result<()> {
    config.check()?;
    let router = load_router(&config)?;
    EmbeddedServer::new(config, router).serve().await
}

async fn run_relay(config: Config) -> Result<()> {
    config.check()?;
    let relay = RelayServer::new(&config);
    let shutdown = relay.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Shutting down relay...");
            shutdown.cancel();
        }
    });
    relay.serve(&config).await
}

async fn run_host(config: Config) -> Result<()> {
    config.check()?;
    let router = load_router(&config)?;
    let link = Arc::new(Link::new(Arc::new(router)));
    let connector = Arc::new(WsConnector::new(config.relay_url.clone()));
    let manager = ConnectionManager::new(link, connector, config.reconnect_policy());

    manager.start();
    tokio::signal::ctrl_c().await?;
    eprintln!("Disconnecting from relay...");
    manager.stop().await;
    Ok(())
}

async fn run_call(client: BridgeClient, action: CallAction) -> Result<()> {
    let reply = match action {
        CallAction::List => client.list().await?,
        CallAction::Tools => client.tools().await?,
        CallAction::Rpc { method, params } => {
            let params = params.map(|p| serde_json::from_str(&p)).transpose()?;
            client.call(&method, params).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
