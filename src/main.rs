use reef_redis::cli::Cli;
use reef_redis::telemetry::{init_logging, init_telemetry};
use reef_redis::{AppError, Config, Server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.log_level())?;
    init_telemetry();

    let config = Config::from_sources(&cli)?;
    info!(
        dir = %config.snapshot.dir,
        dbfilename = %config.snapshot.dbfilename,
        "Starting server"
    );

    let server = Server::bind(config).await?;
    server.run_until_ctrl_c().await
}
