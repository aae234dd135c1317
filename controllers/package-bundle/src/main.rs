//! Package Bundle Controller
//!
//! Reconciles PackageBundleController resources: resolves the active
//! package bundle, finds the newest bundle compatible with the cluster's
//! Kubernetes version, and reports the result in `status.state`.
//!
//! Exactly one PackageBundleController, named by configuration, is owned by
//! this process; every other one is marked `ignored`.

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::{ControllerConfig, LogFormat};
use anyhow::{Context, Result, anyhow};
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ControllerConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());
    let config = config.context("Failed to load configuration")?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    info!("Starting Package Bundle Controller");
    config.log();

    let controller = Controller::new(config)
        .await
        .context("Failed to initialize controller")?;
    controller.run().await?;

    Ok(())
}
