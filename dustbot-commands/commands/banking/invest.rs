//! The invest worker: moves dustbunnies into the banking principal.

use clap::Parser;

use dustbot_commands::banking::InvestWorker;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "invest")]
#[command(author, version, about = "dustbot invest command worker")]
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
    worker::run(InvestWorker::new(), &args.bus).await?;
    Ok(())
}
