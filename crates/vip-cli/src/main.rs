//! VIP CLI
//!
//! Runs the acceptance test suite against a deployed site.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vip_cli::Cli;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries test output and rendered config; logs go to stderr
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.json);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    // First interrupt cancels the run so cleanup can finish; a second one exits
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("interrupted, cancelling run (interrupt again to exit immediately)");
        trigger.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("interrupted twice, exiting without cleanup");
            std::process::exit(130);
        }
    });

    match cli.run(cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = e.kind(), error = %e, "vip failed");
            ExitCode::from(e.exit_code())
        }
    }
}
