//! Command logger: persists every `command.*` envelope into the rolling
//! history and bumps the author's command counters.

use clap::Parser;

use dustbot_commands::loggers::CommandLogger;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "command_logger")]
#[command(author, version, about = "dustbot command history logger")]
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
    worker::run(CommandLogger::new(), &args.bus).await?;
    Ok(())
}
