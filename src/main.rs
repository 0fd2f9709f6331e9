use clap::Parser;
use tracing::error;

use stl_analysis::cli::{self, Cli, Command};
use stl_analysis::{config, server, telemetry};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = config::Config::from_env().expect("Failed to load configuration");

    // Log files will be created as: logs/info.log.2024-12-22, logs/error.log.2024-12-22, etc.
    telemetry::init_tracing(&config.log_dir).expect("Failed to initialise logging");

    let outcome = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => return server::serve(config).await,
        Command::Validate { path, encoding } => cli::run_validate(&config, &path, encoding).await,
        Command::Analyze { path, settings } => {
            cli::run_analyze(&config, &path, settings.as_deref()).await
        }
        Command::Migrate => cli::run_migrate(&config).await,
    };

    outcome.map_err(|e| {
        error!("{}", e);
        std::io::Error::other(e)
    })
}
