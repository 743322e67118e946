use dotenv::dotenv;
use std::process::ExitCode;
use tracing::{error, info};
use upstream_guard::{init_logging, GuardConfig, UpstreamGuard};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_logging();
    info!("Upstream guard starting up");

    let config = match GuardConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let guard = match UpstreamGuard::from_config(config) {
        Ok(guard) => guard,
        Err(e) => {
            error!(error = %e, "Failed to build upstream guard");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&guard.status().await) {
        Ok(status) => println!("{}", status),
        Err(e) => {
            error!(error = %e, "Failed to render status");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
