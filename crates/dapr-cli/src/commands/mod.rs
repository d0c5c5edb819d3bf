//! CLI commands

use std::fmt::Display;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::{Error, Result};

pub mod dashboard;
pub mod port_forward;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// Build a kube [`Client`] from an optional kubeconfig path and context.
///
/// With neither set, kube defaults apply (in-cluster config, `KUBECONFIG`,
/// `~/.kube/config`). Any failure is reported as [`Error::ClientInit`].
pub async fn resolve_kube_client(kubeconfig: Option<&str>, context: Option<&str>) -> Result<Client> {
    build_kube_client(kubeconfig, context)
        .await
        .map_err(|e| match e {
            Error::CommandFailed { message } => Error::client_init(message),
            other => Error::client_init(other.to_string()),
        })
}

async fn build_kube_client(kubeconfig: Option<&str>, context: Option<&str>) -> Result<Client> {
    if kubeconfig.is_none() && context.is_none() {
        debug!("Using default kube configuration");
        return Client::try_default().await.cmd_err();
    }

    let kc = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path).map_err(|e| {
            Error::command_failed(format!("failed to read kubeconfig {}: {}", path, e))
        })?,
        None => Kubeconfig::read()
            .map_err(|e| Error::command_failed(format!("failed to read kubeconfig: {}", e)))?,
    };

    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    kube_client_from_kubeconfig(kc, &options).await
}

/// Build a kube [`Client`] from an already-loaded [`Kubeconfig`] with options.
pub async fn kube_client_from_kubeconfig(
    kubeconfig: Kubeconfig,
    options: &KubeConfigOptions,
) -> Result<Client> {
    let config = Config::from_custom_kubeconfig(kubeconfig, options)
        .await
        .cmd_err()?;
    Client::try_from(config).cmd_err()
}
