use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use tcp_routing_verify::control::lrp::{DesiredLrp, DesiredLrpUpdate, TcpRoute};
use tcp_routing_verify::control::receptor::{ReceptorClient, DEFAULT_RECEPTOR_ADDRESS};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Action {
    Create,
    Update,
    Delete,
    List,
}

#[derive(Parser)]
#[command(name = "desired-lrp-client", about = "Manage sample receiver LRPs on the receptor")]
struct Args {
    /// Action to perform against the receptor
    #[arg(long, value_enum, default_value_t = Action::Create)]
    action: Action,

    /// Identity the receiver tags its responses with
    #[arg(long, default_value = "server-1")]
    server_id: String,

    /// External port routed to the receiver
    #[arg(long, default_value_t = 64000)]
    external_port: u16,

    /// Port the receiver listens on inside the container
    #[arg(long, default_value_t = 5222)]
    container_port: u16,

    #[arg(long, default_value = DEFAULT_RECEPTOR_ADDRESS)]
    receptor_address: String,

    /// Defaults to a fresh v4 uuid on create
    #[arg(long)]
    process_guid: Option<String>,

    #[arg(long, default_value_t = 1)]
    instances: i32,

    /// Router group the route belongs to
    #[arg(long)]
    router_group_guid: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = ReceptorClient::new(&args.receptor_address);

    let mut route = TcpRoute::new(args.external_port, args.container_port);
    if let Some(guid) = &args.router_group_guid {
        route = route.in_router_group(guid.clone());
    }

    match args.action {
        Action::Create => {
            let guid = args
                .process_guid
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let lrp = DesiredLrp::tcp_receiver(
                &guid,
                &[args.container_port],
                &[route],
                &args.server_id,
                args.instances,
            )?;
            client.desire_lrp(&lrp).await.context("creating desired lrp")?;
            println!("Desired LRP successfully created: {guid}");
        }
        Action::Update => {
            let guid = args
                .process_guid
                .context("--process-guid is required for update")?;
            let update = DesiredLrpUpdate::default()
                .instances(args.instances)
                .tcp_routes(&[route])?;
            client
                .update_desired_lrp(&guid, &update)
                .await
                .context("updating desired lrp")?;
            println!("Desired LRP successfully updated: {guid}");
        }
        Action::Delete => {
            let guid = args
                .process_guid
                .context("--process-guid is required for delete")?;
            client
                .delete_desired_lrp(&guid)
                .await
                .context("deleting desired lrp")?;
            println!("Desired LRP successfully deleted: {guid}");
        }
        Action::List => {
            let lrps = client.desired_lrps().await.context("listing desired lrps")?;
            println!("{}", serde_json::to_string_pretty(&lrps)?);
        }
    }
    Ok(())
}
