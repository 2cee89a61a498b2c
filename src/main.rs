use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use minidhcp::config::CLIENT_PORT;
use minidhcp::{
    ClientConfig, DhcpServer, LeaseClient, LeaseJournal, MacAddr, Pool, Result, ServerConfig,
};

#[derive(Parser)]
#[command(name = "minidhcp")]
#[command(author, version, about = "A minimal address-leasing server and client", long_about = None)]
struct Cli {
    /// Server configuration file (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve addresses from POOL_START to POOL_END inclusive
    Serve {
        pool_start: Ipv4Addr,
        pool_end: Ipv4Addr,

        /// Overrides the configured listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Acquire a lease, renew it, and release it on exit
    Client {
        #[arg(long, default_value = "127.0.0.1:67")]
        server: SocketAddr,

        #[arg(long, default_value = "00:11:22:33:44:55")]
        mac: MacAddr,

        /// Send from the well-known client port instead of an ephemeral one
        #[arg(long)]
        use_port_68: bool,

        #[arg(long, default_value_t = 3)]
        max_renewals: u32,
    },
    ShowConfig,
    ListLeases,
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path),
        None => Ok(ServerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            pool_start,
            pool_end,
            port,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            config.pool_start = pool_start;
            config.pool_end = pool_end;
            if let Some(port) = port {
                config.port = port;
            }

            let server = DhcpServer::new(config).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::Client {
            server,
            mac,
            use_port_68,
            max_renewals,
        } => {
            let port = if use_port_68 { CLIENT_PORT } else { 0 };
            let config = ClientConfig {
                server,
                bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
                mac,
                max_renewals,
            };

            let mut client = LeaseClient::bind(&config).await?;
            let lease = tokio::select! {
                lease = client.acquire() => lease?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted before a lease was bound");
                    return Ok(());
                }
            };

            let end = client
                .maintain(lease, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            info!("Lease ended: {}", end);
            Ok(())
        }
        Commands::ShowConfig => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::ListLeases => {
            let config = load_config(cli.config.as_deref())?;
            let Some(path) = config.leases_file.as_deref() else {
                println!("No leases_file configured.");
                return Ok(());
            };

            let records = LeaseJournal::new(path).load().await?;
            let now = Utc::now();
            let mut pool = Pool::from_config(&config)?;
            pool.restore(&records, now);

            let active: Vec<_> = pool.entries().iter().filter(|entry| !entry.is_free()).collect();
            if active.is_empty() {
                println!("No active leases.");
                return Ok(());
            }

            println!(
                "{:<20} {:<16} {:<24} {:<10}",
                "MAC Address", "IP Address", "Expires At", "Remaining"
            );
            println!("{}", "-".repeat(72));

            for entry in active {
                let (Some(mac), Some(expires_at)) = (entry.owner_mac, entry.lease_expiration) else {
                    continue;
                };
                println!(
                    "{:<20} {:<16} {:<24} {:<10}",
                    mac.to_string(),
                    entry.ip().to_string(),
                    expires_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                    format!("{}s", (expires_at - now).num_seconds().max(0))
                );
            }

            Ok(())
        }
    }
}
