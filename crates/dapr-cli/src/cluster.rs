//! Cluster access used by the dashboard command.
//!
//! Provides a trait-based abstraction over the two cluster operations the
//! port-forward needs, allowing tests to run without a Kubernetes API server
//! while production code goes through `kube`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// Bidirectional byte stream to a pod port.
pub trait PodIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PodIo for T {}

/// Boxed stream returned by [`ClusterClient::open_port_stream`].
pub type PortStream = Box<dyn PodIo>;

/// Trait abstracting the cluster operations behind the dashboard port-forward
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Name of a running pod in `namespace` whose name starts with `name_prefix`
    async fn find_running_pod(&self, namespace: &str, name_prefix: &str)
        -> Result<Option<String>>;

    /// Open a byte stream to `port` on `pod`
    async fn open_port_stream(&self, namespace: &str, pod: &str, port: u16) -> Result<PortStream>;
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn find_running_pod(
        &self,
        namespace: &str,
        name_prefix: &str,
    ) -> Result<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;
        Ok(first_running_pod(&list.items, name_prefix))
    }

    async fn open_port_stream(&self, namespace: &str, pod: &str, port: u16) -> Result<PortStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut forwarder = pods.portforward(pod, &[port]).await.map_err(|e| {
            Error::connect(format!(
                "failed to open port-forward to {}/{}:{}: {}",
                namespace, pod, port, e
            ))
        })?;

        let stream = forwarder.take_stream(port).ok_or_else(|| {
            Error::connect(format!("no stream for port {} on pod {}", port, pod))
        })?;

        // The forwarder drives the websocket; keep it alive until the stream closes.
        let pod_name = pod.to_string();
        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!(pod = %pod_name, port, error = %e, "Port-forward connection closed with error");
            }
        });

        Ok(Box::new(stream))
    }
}

/// First pod that is `Running` and whose name starts with `name_prefix`.
pub fn first_running_pod(pods: &[Pod], name_prefix: &str) -> Option<String> {
    pods.iter()
        .filter(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .filter_map(|pod| pod.metadata.name.clone())
        .find(|name| name.starts_with(name_prefix))
}
