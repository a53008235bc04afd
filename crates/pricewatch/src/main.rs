//! PriceWatch entry point

mod cli;

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pw_config::Config;
use pw_pipeline::Scheduler;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse_args();

    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration invalid");
            return ExitCode::from(1);
        }
    };

    let scheduler = match Scheduler::new(config) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = %e, "failed to initialise components");
            return ExitCode::from(1);
        }
    };

    if args.once {
        info!("running single tick");
        match scheduler.run_once().await {
            Ok(()) => {
                info!("single run completed");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "single run failed");
                ExitCode::from(2)
            }
        }
    } else {
        // Loop mode catches per-tick failures internally and only returns
        // on shutdown.
        match scheduler.run_loop().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "scheduler crashed");
                ExitCode::from(2)
            }
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
