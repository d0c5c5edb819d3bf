//! `dapr dashboard`: open the Dapr dashboard running in Kubernetes.
//!
//! Finds the namespace hosting the `dapr-dashboard` pod, port-forwards a local
//! port to it and keeps the tunnel open until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Search dapr-system, then default, and serve on localhost:8080
//! dapr dashboard -k
//!
//! # Dashboard deployed elsewhere, served on another port
//! dapr dashboard -k -n monitoring -p 9999
//! ```

use std::future::Future;
use std::sync::Arc;

use clap::Args;
use tracing::{info, warn};

use super::port_forward::{Termination, TunnelSession};
use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::cluster::{ClusterClient, KubeCluster};
use crate::config::{self, LaunchConfig};
use crate::interrupt::{self, InterruptGuard};
use crate::resolver::{resolve_namespace, Resolved};
use crate::status;
use crate::{Error, Result};

/// Start the Dapr dashboard
#[derive(Args, Debug)]
pub struct DashboardArgs {
    /// Open the dashboard of the Dapr control plane running in Kubernetes
    #[arg(short = 'k', long, required = true)]
    pub kubernetes: bool,

    /// The local port on which to serve the dashboard [default: 8080]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// The namespace where the dashboard is running (skips the namespace search)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// The address on which to listen [default: localhost]
    #[arg(long)]
    pub address: Option<String>,

    /// Path to kubeconfig file
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,
}

/// Run the dashboard command.
pub async fn run(args: DashboardArgs) -> Result<()> {
    let persisted = config::load_config()?;
    let kubeconfig = config::resolve_kubeconfig(args.kubeconfig.as_deref(), &persisted);
    let launch_config =
        LaunchConfig::from_sources(args.namespace, args.port, args.address, &persisted);

    let client = super::resolve_kube_client(kubeconfig.as_deref(), args.context.as_deref()).await?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeCluster::new(client));

    launch(cluster, &launch_config, interrupt::ctrl_c(), &SystemBrowser).await
}

/// Resolve, forward and block until `interrupt` fires or the session faults.
///
/// Returns `Ok(())` after an operator stop. Resolution, bind and connect
/// failures, as well as a forwarding fault, are returned as errors.
pub async fn launch<F>(
    cluster: Arc<dyn ClusterClient>,
    config: &LaunchConfig,
    interrupt: F,
    browser: &dyn BrowserLauncher,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let Resolved { namespace, pod } =
        resolve_namespace(cluster.as_ref(), &config.candidates, &config.service_name)
            .await
            .ok_or_else(|| Error::Resolution {
                namespaces: config.candidates.clone(),
            })?;

    let mut session = TunnelSession::new(
        cluster,
        &namespace,
        &config.service_name,
        &config.local_host,
        config.local_port,
        config.remote_port,
        config.stream_output,
    )?
    .with_pod(pod);
    session.init().await?;

    let stop_signal = session.stop_signal();
    let _interrupt = InterruptGuard::register(interrupt, session.stopper());

    let url = session.url();
    status::info(format!("Dapr dashboard found in namespace:\t{}", namespace));
    status::info(format!("Dapr dashboard available at:\t{}", url));

    if let Err(e) = browser.open(&url) {
        warn!(error = %e, "Browser launch failed");
        status::failure("Failed to start Dapr dashboard in browser automatically");
        status::failure(format!(
            "Visit {} in your browser to view the dashboard",
            url
        ));
    }

    match stop_signal.wait().await {
        Termination::Faulted(reason) => Err(Error::connect(format!(
            "port-forward to {} ended unexpectedly: {}",
            url, reason
        ))),
        Termination::Stopped | Termination::NeverStarted => {
            info!(namespace = %namespace, "Dashboard port-forward closed");
            status::success("Dapr dashboard stopped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockBrowserLauncher;
    use crate::cluster::MockClusterClient;
    use clap::Parser;
    use mockall::predicate::eq;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: DashboardArgs,
    }

    #[test]
    fn kubernetes_flag_is_required() {
        assert!(TestCli::try_parse_from(["dashboard"]).is_err());
        assert!(TestCli::try_parse_from(["dashboard", "-p", "9000"]).is_err());
    }

    #[test]
    fn parses_short_flags() {
        let cli = TestCli::try_parse_from(["dashboard", "-k", "-p", "9000", "-n", "ops"])
            .expect("valid args");
        assert!(cli.args.kubernetes);
        assert_eq!(cli.args.port, Some(9000));
        assert_eq!(cli.args.namespace.as_deref(), Some("ops"));
        assert!(cli.args.address.is_none());
    }

    #[test]
    fn rejects_negative_port() {
        assert!(TestCli::try_parse_from(["dashboard", "-k", "-p", "-1"]).is_err());
    }

    #[tokio::test]
    async fn unresolved_service_reports_every_candidate() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_find_running_pod()
            .times(2)
            .returning(|_, _| Ok(None));
        cluster.expect_open_port_stream().never();

        let mut browser = MockBrowserLauncher::new();
        browser.expect_open().never();

        let err = launch(
            Arc::new(cluster),
            &LaunchConfig::default(),
            std::future::pending(),
            &browser,
        )
        .await
        .expect_err("dashboard not deployed");

        match &err {
            Error::Resolution { namespaces } => {
                assert_eq!(namespaces, &vec!["dapr-system", "default"]);
            }
            other => panic!("expected resolution error, got {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.contains("dapr-system"));
        assert!(msg.contains("default"));
    }

    #[tokio::test]
    async fn resolved_namespace_is_listed_once() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_find_running_pod()
            .with(eq("dapr-system"), eq("dapr-dashboard"))
            .times(1)
            .returning(|_, _| Ok(Some("dapr-dashboard-abc".to_string())));
        cluster
            .expect_open_port_stream()
            .withf(|ns, pod, _| ns == "dapr-system" && pod == "dapr-dashboard-abc")
            .times(1)
            .returning(|_, _, _| Ok(Box::new(tokio::io::duplex(64).0)));

        let mut browser = MockBrowserLauncher::new();
        browser.expect_open().times(1).returning(|_| Ok(()));

        let config = LaunchConfig {
            local_host: "127.0.0.1".to_string(),
            local_port: std::net::TcpListener::bind("127.0.0.1:0")
                .expect("bind ephemeral port")
                .local_addr()
                .expect("local addr")
                .port(),
            ..Default::default()
        };
        // Interrupt is already pending, so the launcher stops right after startup
        launch(Arc::new(cluster), &config, async {}, &browser)
            .await
            .expect("clean stop");
    }

    #[tokio::test]
    async fn invalid_session_config_aborts_before_network() {
        let mut cluster = MockClusterClient::new();
        cluster
            .expect_find_running_pod()
            .with(eq("dapr-system"), eq("dapr-dashboard"))
            .returning(|_, _| Ok(Some("dapr-dashboard-abc".to_string())));
        cluster.expect_open_port_stream().never();

        let config = LaunchConfig {
            remote_port: 0,
            ..Default::default()
        };
        let err = launch(
            Arc::new(cluster),
            &config,
            std::future::pending(),
            &MockBrowserLauncher::new(),
        )
        .await
        .expect_err("remote port 0");
        assert!(matches!(err, Error::Config { .. }), "got {:?}", err);
    }
}
