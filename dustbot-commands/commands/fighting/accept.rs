//! The accept worker: runs the duel simulation and settles win/loss
//! counters, with optional LLM narration.

use clap::Parser;

use dustbot_commands::fighting::AcceptWorker;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "accept")]
#[command(author, version, about = "dustbot accept command worker")]
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
    worker::run(AcceptWorker::new(), &args.bus).await?;
    Ok(())
}
