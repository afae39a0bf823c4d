use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use seller_socket::config::DEFAULT_URL;
use seller_socket::transport::SocketIoConnector;
use seller_socket::{
    ConnectOptions, ConnectionManager, ConnectionStatus, Delivery, ManagerConfig, OutboundCommand,
    Role, UserId,
};
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Seller dashboard real-time channel client
#[derive(Parser, Debug)]
#[command(name = "seller-socket", version, about)]
struct Cli {
    /// Dashboard API endpoint
    #[arg(long, env = "SELLER_SOCKET_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Session token issued by the auth service
    #[arg(long, env = "SELLER_SOCKET_TOKEN", hide_env_values = true)]
    token: String,

    /// Seconds to wait for the server to accept the connection
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stay connected and print every inbound message
    Listen,
    /// Send a direct message to one user
    Send {
        /// Recipient user id (numeric ids are sent as numbers)
        #[arg(long)]
        to: String,
        message: String,
    },
    /// Broadcast to every user of a role
    Broadcast {
        /// admin, customer or seller
        #[arg(long)]
        role: Role,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    let config = ManagerConfig {
        default_url: cli.url.clone(),
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        ..Default::default()
    };
    info!("Seller socket client starting");
    info!("  Endpoint: {}", config.default_url);

    let manager = ConnectionManager::new(config.clone(), SocketIoConnector::new())?;
    let options = ConnectOptions::new(cli.token);

    match cli.command {
        Command::Listen => listen(manager, options).await,
        Command::Send { to, message } => {
            let command = OutboundCommand::direct(parse_user_id(to), message);
            send_once(manager, options, command, config.connect_timeout).await
        }
        Command::Broadcast { role, message } => {
            let command = OutboundCommand::to_role(role, message);
            send_once(manager, options, command, config.connect_timeout).await
        }
    }
}

fn parse_user_id(raw: String) -> UserId {
    match raw.parse::<u64>() {
        Ok(n) => UserId::from(n),
        Err(_) => UserId::from(raw),
    }
}

/// Print inbound events until the link drops or Ctrl-C
async fn listen(manager: ConnectionManager<SocketIoConnector>, options: ConnectOptions) -> Result<()> {
    manager.on_direct_message(|dm| {
        println!(
            "[{}] {} ({}): {}",
            dm.timestamp, dm.from_user_id, dm.from_role, dm.message
        );
    });
    for role in Role::ALL {
        manager.on_role_broadcast(role, |b| {
            println!("[{}] {} -> all {}s: {}", b.timestamp, b.from, b.role, b.message);
        });
    }

    let mut status = manager.subscribe();
    manager.connect(options)?;

    // Main event loop
    loop {
        tokio::select! {
            change = status.next() => match change {
                Some(change) if change.to == ConnectionStatus::Disconnected => {
                    warn!("Disconnected");
                    break;
                }
                Some(change) => {
                    info!("Status: {} -> {}", change.from, change.to);
                }
                None => {
                    error!("Status channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Connect, emit one command, disconnect
async fn send_once(
    manager: ConnectionManager<SocketIoConnector>,
    options: ConnectOptions,
    command: OutboundCommand,
    connect_timeout: Duration,
) -> Result<()> {
    manager.connect(options)?;

    let mut status = manager.watch_status();
    let settled = tokio::time::timeout(
        connect_timeout,
        status.wait_for(|s| *s != ConnectionStatus::Connecting),
    )
    .await
    .context("Timed out waiting for the server")?
    .map(|s| *s)
    .context("Connection manager stopped")?;

    if settled != ConnectionStatus::Connected {
        bail!("Could not connect, check the endpoint and token");
    }

    match manager.send(&command) {
        Delivery::Sent => info!("Sent {}", command.event_name()),
        Delivery::Dropped => {
            manager.shutdown().await;
            bail!("Connection dropped before {} could be sent", command.event_name());
        }
    }

    manager.shutdown().await;
    Ok(())
}
