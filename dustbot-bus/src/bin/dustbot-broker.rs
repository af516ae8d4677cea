use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use dustbot_bus::Broker;

#[derive(Parser, Debug)]
#[command(name = "dustbot-broker")]
#[command(author, version, about = "dustbot message bus broker")]
struct Args {
    /// Address the broker listens on.
    #[arg(long, default_value = "127.0.0.1:7379")]
    bind: String,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("dustbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let broker = Broker::bind(&args.bind).await?;
    info!("dustbot broker listening on {}", broker.local_addr()?);

    tokio::select! {
        _ = broker.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl-C: {:?}", e);
            }
            info!("Ctrl-C detected; broker shutting down.");
        }
    }
    Ok(())
}
