//! Keel operator: reconciles cluster resources against the external service.

#![forbid(unsafe_code)]

mod config;
mod controllers;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keel_core::crd::{IpAccessList, Project};
use kube::CustomResourceExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::OperatorConfig;

#[derive(Parser, Debug)]
#[command(name = "keel-operator", version, about = "Keel operator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controllers
    Run(OperatorConfig),
    /// Print the CustomResourceDefinitions as YAML
    Crds,
}

fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("ignoring log filter {directives:?}: {e}");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install().context("installing metrics exporter")?;
    info!(%addr, "serving Prometheus metrics");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Crds => {
            for crd in [Project::crd(), IpAccessList::crd()] {
                println!("---\n{}", serde_yaml::to_string(&crd)?);
            }
            Ok(())
        }
        Command::Run(config) => {
            init_tracing(&config.log_filter);
            if let Some(addr) = config.metrics_addr {
                init_metrics(addr)?;
            }
            info!(version = env!("CARGO_PKG_VERSION"), "starting keel-operator");
            controllers::run(config).await
        }
    }
}
