use bifrost_agent::cli::commands;
use bifrost_agent::cli::{parse_cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    match cli.command {
        Commands::Start { config } => {
            commands::start(config).await?;
        }
    }

    Ok(())
}
