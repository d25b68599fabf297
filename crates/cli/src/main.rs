mod fetch;
mod listen;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ticknet::{DownloadConfig, DriverConfig};

#[derive(Parser)]
#[command(name = "ticknet")]
#[command(about = "Game transport tools: HTTP package downloads and a UDP listener")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download <base-url><resource>, trying compressed variants first
    Fetch {
        base_url: String,

        resource: String,

        #[arg(short, long, default_value = "DownloadTemp")]
        out_dir: PathBuf,

        #[arg(long, default_value_t = 0, help = "Size announced by the game server")]
        announced_size: u64,

        #[arg(long, help = "Request only the uncompressed file")]
        no_compression: bool,

        #[arg(long)]
        proxy_host: Option<String>,

        #[arg(long, default_value_t = 8080)]
        proxy_port: u16,

        #[arg(long, default_value_t = 4, help = "Timeout in seconds (minimum 2)")]
        timeout: u64,
    },
    /// Accept UDP connections and echo every datagram back
    Listen {
        #[arg(short, long, default_value_t = ticknet::DEFAULT_PORT)]
        port: u16,

        #[arg(short, long, default_value_t = ticknet::DEFAULT_CONNECTION_LIMIT)]
        max_connections: usize,

        #[arg(long, help = "Keep connections alive on ICMP port unreachable")]
        allow_port_unreach: bool,

        #[arg(long)]
        log_port_unreach: bool,

        #[arg(long)]
        ipv6: bool,

        #[arg(long, help = "Stop after this many seconds")]
        duration: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Fetch {
            base_url,
            resource,
            out_dir,
            announced_size,
            no_compression,
            proxy_host,
            proxy_port,
            timeout,
        } => {
            let config = DownloadConfig {
                proxy_host,
                proxy_port,
                timeout: Duration::from_secs(timeout),
                use_compression: !no_compression,
                ..Default::default()
            };
            fetch::run(&base_url, &resource, announced_size, &out_dir, config)
        }
        Command::Listen {
            port,
            max_connections,
            allow_port_unreach,
            log_port_unreach,
            ipv6,
            duration,
        } => {
            let config = DriverConfig {
                allow_port_unreach,
                log_port_unreach,
                connection_limit: max_connections,
                use_ipv6: ipv6,
                ..Default::default()
            };
            listen::run(config, port, duration.map(Duration::from_secs))
        }
    }
}
