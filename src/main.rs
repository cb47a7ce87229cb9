use anyhow::Result;
use tracing::error;

mod analysis;
mod cli;
mod crawler;
mod error;
mod extract;
mod proxy;
mod storage;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = cli::parse_args();

    // Logging is initialized once the configuration is known
    match cli::process_command(args).await {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
