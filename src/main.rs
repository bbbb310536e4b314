use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bifrost::config::Config;
use bifrost::error::BifrostError;
use bifrost::handler::EntryHandler;
use bifrost::sequence::RuleConfig;
use bifrost::server;
use bifrost::shutdown::SafeClose;

#[derive(Parser, Debug)]
#[command(name = "bifrost", about = "A pluggable DNS query router")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Quick-start upstreams (addr:port); builds a forward-only
    /// pipeline when no config file is given.
    #[arg(long)]
    upstream: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!("failed to load configuration: {err}");
                return 1;
            }
        },
        None => {
            if cli.upstream.is_empty() {
                error!("either --config or --upstream is required");
                return 1;
            }
            let mut config = Config::default();
            config.sequence = vec![
                RuleConfig {
                    exec: "single_flight".into(),
                    ..RuleConfig::default()
                },
                RuleConfig {
                    exec: "cache".into(),
                    ..RuleConfig::default()
                },
                RuleConfig {
                    exec: format!("forward {}", cli.upstream.join(" ")),
                    ..RuleConfig::default()
                },
            ];
            config.apply_env();
            config
        }
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Err(err) = config.validate() {
        error!("invalid configuration: {err}");
        return 1;
    }

    let (_registry, root) = match config.build_pipeline() {
        Ok(parts) => parts,
        Err(err) => {
            error!("failed to build pipeline: {err}");
            return 1;
        }
    };

    let handler = Arc::new(EntryHandler::new(
        root,
        config.query_timeout(),
        config.edns_buffer_size,
    ));

    let bind_addr = match config.bind_socket_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!("{err}");
            return 1;
        }
    };
    let udp_sock = match UdpSocket::bind(bind_addr).await {
        Ok(sock) => sock,
        Err(err) => {
            error!("failed to bind UDP {bind_addr}: {err}");
            return 1;
        }
    };
    let tcp_listener = if config.enable_tcp {
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                error!("failed to bind TCP {bind_addr}: {err}");
                return 1;
            }
        }
    } else {
        None
    };

    let closer = SafeClose::new();

    {
        let handler = handler.clone();
        let closer = closer.clone();
        tokio::spawn(async move {
            if let Err(err) = server::run_udp_server(udp_sock, "udp", handler, closer.clone()).await
            {
                closer.send_close(Some(err));
            }
        });
    }
    if let Some(listener) = tcp_listener {
        let handler = handler.clone();
        let closer = closer.clone();
        tokio::spawn(async move {
            if let Err(err) = server::run_tcp_server(listener, "tcp", handler, closer.clone()).await
            {
                closer.send_close(Some(err));
            }
        });
    }

    {
        let closer = closer.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            closer.send_close(None);
        });
    }

    match closer.wait_closed().await {
        None => {
            info!("clean shutdown");
            0
        }
        Some(BifrostError::ServerShutdown) => {
            info!("clean shutdown");
            0
        }
        Some(err) => {
            error!("unexpected termination: {err}");
            2
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
