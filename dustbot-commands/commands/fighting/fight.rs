//! The fight worker: records a duel challenge on the target's aggregate.

use clap::Parser;

use dustbot_commands::fighting::FightWorker;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "fight")]
#[command(author, version, about = "dustbot fight command worker")]
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
    worker::run(FightWorker::new(), &args.bus).await?;
    Ok(())
}
