use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tcp_routing_verify::sender::{self, SenderConfig};

#[derive(Parser)]
#[command(name = "tcp-sample-sender", about = "Open many short TCP connections against a port range")]
struct Args {
    /// The IP address of server to connect to
    #[arg(long, default_value = "localhost")]
    address: String,

    /// Starting port number of IP address to connect to
    #[arg(long, default_value_t = 3333)]
    start_port: u16,

    /// Number of concurrent connections to the remote port
    #[arg(long, default_value_t = 1)]
    concurrent_connections: u32,

    /// Number of ports starting from start-port to connect to
    #[arg(long, default_value_t = 1)]
    port_span: u16,

    /// Number of virtual users that connect to all the ports with concurrent-connections
    #[arg(long, default_value_t = 1)]
    virtual_users: u32,

    /// Connect/send/close cycles per connection
    #[arg(long, default_value_t = 100)]
    rounds: u32,

    /// Connect attempts per cycle
    #[arg(long, default_value_t = 10)]
    connect_retries: u32,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    connect_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.port_span > 0, "--port-span must be > 0");
    anyhow::ensure!(args.concurrent_connections > 0, "--concurrent-connections must be > 0");

    let config = SenderConfig {
        host: args.address,
        start_port: args.start_port,
        port_span: args.port_span,
        concurrent_connections: args.concurrent_connections,
        virtual_users: args.virtual_users,
        rounds: args.rounds,
        connect_retries: args.connect_retries,
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        ..SenderConfig::default()
    };

    let report = sender::run(config).await;
    println!(
        "connected={} failed_connects={} write_errors={}",
        report.connected, report.failed_connects, report.write_errors
    );
    Ok(())
}
