//! The collect worker: pays out daily compound interest on invested
//! dustbunnies.

use clap::Parser;

use dustbot_commands::banking::CollectWorker;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "collect")]
#[command(author, version, about = "dustbot collect command worker")]
struct Args {
    /// Bus broker address.
    #[arg(long, default_value = "127.0.0.1:7379")]
    bus: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    worker::run(CollectWorker::new(), &args.bus).await?;
    Ok(())
}
