//! Dapr CLI
//!
//! Opens the Dapr dashboard through a Kubernetes port-forward.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dapr_cli::{status, Cli};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // kube's rustls stack needs a process-wide crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install TLS crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        status::failure(&e);
        std::process::exit(1);
    }
}
