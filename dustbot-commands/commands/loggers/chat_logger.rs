//! Chat logger: persists every `chat.received` envelope into the rolling
//! history and bumps the author's chat counters.

use clap::Parser;

use dustbot_commands::loggers::ChatLogger;
use dustbot_core::logging::init_tracing;
use dustbot_core::worker;

#[derive(Parser, Debug)]
#[command(name = "chat_logger")]
#[command(author, version, about = "dustbot chat history logger")]
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
    worker::run(ChatLogger::new(), &args.bus).await?;
    Ok(())
}
