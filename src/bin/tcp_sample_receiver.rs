use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tcp_routing_verify::receiver::SampleReceiver;

#[derive(Parser)]
#[command(name = "tcp-sample-receiver", about = "Identity-tagging TCP echo backend")]
struct Args {
    /// The host:port that the server is bound to
    #[arg(long, default_value = "localhost:3333")]
    address: String,

    /// Identity prefixed to every response; echoes verbatim when unset
    #[arg(long)]
    server_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let receiver = SampleReceiver::bind(args.address.as_str(), args.server_id).await?;
    println!("Listening on {}", receiver.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    receiver.shutdown().await;
    Ok(())
}
