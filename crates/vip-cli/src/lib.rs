//! VIP CLI library

pub mod commands;
pub mod config;
pub mod duration;
pub mod local;
pub mod run;

pub use vip_common::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use vip_common::kube_utils::ClientOptions;

/// VIP - verify a deployed site end to end
#[derive(Parser, Debug)]
#[command(name = "vip")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Kubeconfig to use (falls back to VIP_KUBECONFIG, then kube defaults)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true, env = "VIP_CONTEXT")]
    pub context: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "VIP_LOG_JSON")]
    pub json: bool,
}

impl GlobalArgs {
    /// Cluster connection options
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            kubeconfig: self.kubeconfig.clone(),
            context: self.context.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the acceptance tests against a site
    Run(commands::run::RunArgs),
    /// Render the test configuration without running anything
    Render(commands::run::RunArgs),
    /// Delete resources left behind by an interrupted run
    Cleanup(commands::cleanup::CleanupArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args, &self.global, &cancel).await,
            Commands::Render(mut args) => {
                args.config_only = true;
                commands::run::run(args, &self.global, &cancel).await
            }
            Commands::Cleanup(args) => commands::cleanup::run(args, &self.global).await,
        }
    }
}
