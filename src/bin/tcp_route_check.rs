use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tcp_routing_verify::{Endpoint, RoutingConfig, Verifier};

#[derive(Parser)]
#[command(name = "tcp-route-check", about = "Verify a TCP route on every configured router")]
struct Args {
    /// Config file; defaults to the path in $CONFIG
    #[arg(long)]
    config: Option<PathBuf>,

    /// External port to verify
    #[arg(long)]
    port: u16,

    /// Identity expected behind the route; repeat for a load-balanced set
    #[arg(long = "expect")]
    expect: Vec<String>,

    /// Concurrent connections per load-balancing round
    #[arg(long, default_value_t = 2)]
    samples: usize,

    /// Require the route to be withdrawn instead of reachable
    #[arg(long)]
    withdrawn: bool,

    /// Seconds to wait; defaults to the config's default_timeout
    #[arg(long)]
    budget: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let raw = match &args.config {
        Some(path) => RoutingConfig::load_from_path(path),
        None => RoutingConfig::load_from_env(),
    }
    .context("loading config")?;
    let config = raw.validate().context("validating config")?;

    let budget = args
        .budget
        .map(Duration::from_secs)
        .unwrap_or(config.timeouts().default);
    let verifier = Verifier::new(config.verifier_config()?);
    let hosts = config.router_hosts();

    if args.withdrawn {
        for host in &hosts {
            let endpoint = Endpoint::new(host.as_str(), args.port);
            let outcome = verifier.verify_unreachable(&endpoint, budget).await?;
            println!("{endpoint}: unreachable over {} probes", outcome.attempts);
        }
        return Ok(());
    }

    match args.expect.as_slice() {
        [] => {
            let outcomes = verifier
                .await_reachable_on_all(&hosts, args.port, budget)
                .await?;
            for (host, outcome) in hosts.iter().zip(outcomes) {
                println!("{host}:{}: reachable after {} attempts", args.port, outcome.attempts);
            }
        }
        [expected] => {
            let outcomes = verifier
                .await_identity_on_all(&hosts, args.port, expected, budget)
                .await?;
            for (host, outcome) in hosts.iter().zip(outcomes) {
                println!("{host}:{}: {} after {} attempts", args.port, outcome.value, outcome.attempts);
            }
        }
        expected => {
            for host in &hosts {
                let endpoint = Endpoint::new(host.as_str(), args.port);
                let balanced = verifier
                    .verify_load_balanced(&endpoint, expected, args.samples, budget)
                    .await?;
                println!("{endpoint}: balanced over {:?}", balanced.distinct());
            }
        }
    }
    Ok(())
}
