//! System logger: persists `system.*` and `admin.*` envelopes, including
//! the structured log records every worker publishes.

use clap::Parser;

use dustbot_commands::loggers::SystemLogger;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "system_logger")]
#[command(author, version, about = "dustbot system history logger")]
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
    worker::run(SystemLogger::new(), &args.bus).await?;
    Ok(())
}
