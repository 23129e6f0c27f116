use clap::Parser;
use infrastructure::config::Config;
use presentation::cli::{Cli, CliApp};
use shared::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("warn");
    let cli = Cli::parse();
    let mut app = CliApp::new(Config::load());
    app.run(cli).await?;
    Ok(())
}
