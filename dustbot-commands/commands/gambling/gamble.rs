//! The gamble worker: `!gamble <amount|all>` with a 50/50 roll.

use clap::Parser;

use dustbot_commands::gambling::GambleWorker;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "gamble")]
#[command(author, version, about = "dustbot gamble command worker")]
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
    worker::run(GambleWorker::new(), &args.bus).await?;
    Ok(())
}
