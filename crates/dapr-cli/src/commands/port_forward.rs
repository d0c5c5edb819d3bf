//! Port-forward session to a service pod.
//!
//! A [`TunnelSession`] binds a local TCP listener and relays every accepted
//! connection to a port on the running pod behind a service. The lifecycle is
//! strictly `Created → Initialized → Stopped`; a failed [`TunnelSession::init`]
//! ends in `Failed`. Neither terminal state can be initialized again.
//!
//! Stopping is cooperative: [`TunnelSession::stop`] (or a [`Stopper`] handle
//! held by another task) cancels a token, the forwarding task notices, tears
//! down its connections and the listener, and only then publishes its
//! [`Termination`] through the [`StopSignal`].

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::config::{authority, dashboard_url, effective_port};
use crate::interrupt::Stoppable;
use crate::{Error, Result};

/// The workload a session forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub namespace: String,
    pub service_name: String,
}

/// Immutable parameters of one port-forward session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub local_host: String,
    /// `0` means unset; the default local port is used.
    pub local_port: u16,
    pub remote_port: u16,
    pub service: ServiceRef,
    /// Log every forwarded connection at `info` instead of `debug`.
    pub stream_output: bool,
}

impl TunnelConfig {
    fn validate(&self) -> Result<()> {
        if self.service.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.service.service_name.trim().is_empty() {
            return Err(Error::config("service name must not be empty"));
        }
        let host = self.local_host.trim();
        if host.is_empty() {
            return Err(Error::config("local host must not be empty"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(Error::config(format!(
                "local host '{}' is not a valid host name or address",
                self.local_host
            )));
        }
        if self.remote_port == 0 {
            return Err(Error::config("remote port must be between 1 and 65535"));
        }
        Ok(())
    }

    /// Local port after mapping "unset" to the default.
    pub fn effective_local_port(&self) -> u16 {
        effective_port(self.local_port)
    }

    /// `host:port` the listener binds to.
    pub fn bind_address(&self) -> String {
        authority(&self.local_host, self.effective_local_port())
    }
}

/// Lifecycle of a [`TunnelSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initialized,
    Stopped,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// How a session ended, as published by its [`StopSignal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Forwarding ended because a stop was requested.
    Stopped,
    /// Forwarding ended on its own, e.g. the pod went away.
    Faulted(String),
    /// Forwarding never began and the session has been dropped.
    NeverStarted,
}

/// Completion signal of a session's forwarding activity.
///
/// Resolves once, after the listeners and every relayed connection have been
/// released. Clones observe the same event. A session that never forwarded
/// does not fire; its waiters are released with
/// [`Termination::NeverStarted`] when the session is dropped.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<Termination>>,
}

impl StopSignal {
    /// Wait for forwarding to finish.
    pub async fn wait(mut self) -> Termination {
        match self.rx.wait_for(Option::is_some).await {
            Ok(termination) => termination.clone().unwrap_or(Termination::NeverStarted),
            Err(_) => Termination::NeverStarted,
        }
    }

    /// Whether [`StopSignal::wait`] would return immediately.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some() || self.rx.has_changed().is_err()
    }
}

/// Cloneable handle that requests a session stop from any task.
#[derive(Debug, Clone)]
pub struct Stopper {
    token: CancellationToken,
    state: Arc<Mutex<SessionState>>,
}

impl Stopper {
    /// Request termination. Safe to call any number of times, from any task.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        match *state {
            SessionState::Created => {
                debug!("Port-forward stopped before initialization");
                *state = SessionState::Stopped;
                self.token.cancel();
            }
            SessionState::Initialized if !self.token.is_cancelled() => {
                info!("Stopping port-forward");
                self.token.cancel();
            }
            current => {
                debug!(state = %current, "Port-forward stop already requested, ignoring");
            }
        }
    }
}

impl Stoppable for Stopper {
    fn stop(&self) {
        Stopper::stop(self)
    }
}

/// A single local-port → pod-port forwarding session.
pub struct TunnelSession {
    cluster: Arc<dyn ClusterClient>,
    config: TunnelConfig,
    pod: Option<String>,
    state: Arc<Mutex<SessionState>>,
    token: CancellationToken,
    done_tx: Option<watch::Sender<Option<Termination>>>,
    done_rx: watch::Receiver<Option<Termination>>,
    local_addr: Option<SocketAddr>,
    forwarder: Option<JoinHandle<()>>,
}

impl TunnelSession {
    /// Create a session without touching the network.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        namespace: &str,
        service_name: &str,
        local_host: &str,
        local_port: u16,
        remote_port: u16,
        stream_output: bool,
    ) -> Result<Self> {
        Self::from_config(
            cluster,
            TunnelConfig {
                local_host: local_host.to_string(),
                local_port,
                remote_port,
                service: ServiceRef {
                    namespace: namespace.to_string(),
                    service_name: service_name.to_string(),
                },
                stream_output,
            },
        )
    }

    /// Create a session from a prepared [`TunnelConfig`].
    pub fn from_config(cluster: Arc<dyn ClusterClient>, config: TunnelConfig) -> Result<Self> {
        config.validate()?;
        let (done_tx, done_rx) = watch::channel(None);
        Ok(Self {
            cluster,
            config,
            pod: None,
            state: Arc::new(Mutex::new(SessionState::Created)),
            token: CancellationToken::new(),
            done_tx: Some(done_tx),
            done_rx,
            local_addr: None,
            forwarder: None,
        })
    }

    /// Forward to a pod already known to back the service, skipping the
    /// lookup during [`TunnelSession::init`].
    pub fn with_pod(mut self, pod: impl Into<String>) -> Self {
        self.pod = Some(pod.into());
        self
    }

    /// Bind the local endpoint, verify the pod port is reachable and start forwarding.
    ///
    /// Only valid once, on a freshly created session. Every address the local
    /// host resolves to is bound; the port being taken on any of them is a
    /// [`Error::Bind`]. On error the session is `Failed`, the local port is
    /// released and no forwarding task exists.
    pub async fn init(&mut self) -> Result<()> {
        {
            let state = lock(&self.state);
            if *state != SessionState::Created {
                return Err(Error::InvalidState {
                    state: *state,
                    expected: "created",
                });
            }
        }

        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut state = lock(&self.state);
                if *state == SessionState::Created {
                    *state = SessionState::Failed;
                }
                Err(e)
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        let bind_address = self.config.bind_address();
        let listeners = bind_listeners(&bind_address).await?;
        let local_addr = listeners[0]
            .local_addr()
            .map_err(|e| Error::bind(bind_address.clone(), e))?;

        let ServiceRef {
            namespace,
            service_name,
        } = &self.config.service;
        let remote_port = self.config.remote_port;

        let pod = match &self.pod {
            Some(pod) => pod.clone(),
            None => match self.cluster.find_running_pod(namespace, service_name).await {
                Ok(Some(pod)) => pod,
                Ok(None) => {
                    return Err(Error::connect(format!(
                        "no running pod found for {} in namespace {}",
                        service_name, namespace
                    )))
                }
                Err(e) => {
                    return Err(Error::connect(format!(
                        "failed to look up pods for {} in namespace {}: {}",
                        service_name, namespace, e
                    )))
                }
            },
        };

        // Probe the remote port so an unreachable pod fails here, not on first use
        let probe = self
            .cluster
            .open_port_stream(namespace, &pod, remote_port)
            .await
            .map_err(|e| match e {
                Error::Connect { .. } => e,
                other => Error::connect(other.to_string()),
            })?;
        drop(probe);

        let target = Arc::new(RelayTarget {
            cluster: Arc::clone(&self.cluster),
            namespace: namespace.clone(),
            pod: pod.clone(),
            remote_port,
            stream_output: self.config.stream_output,
        });

        let done_tx = {
            let mut state = lock(&self.state);
            // A stop while connecting leaves the state `Stopped`
            let done_tx = match (*state, self.done_tx.take()) {
                (SessionState::Created, Some(tx)) => tx,
                (current, tx) => {
                    self.done_tx = tx;
                    return Err(Error::InvalidState {
                        state: current,
                        expected: "created",
                    });
                }
            };
            *state = SessionState::Initialized;
            done_tx
        };

        info!(
            local = %local_addr,
            listeners = listeners.len(),
            namespace = %namespace,
            pod = %pod,
            remote_port,
            "Forwarding from {} -> {}",
            local_addr,
            remote_port
        );

        self.local_addr = Some(local_addr);
        self.forwarder = Some(tokio::spawn(forward(
            listeners,
            target,
            self.token.clone(),
            Arc::clone(&self.state),
            done_tx,
        )));
        Ok(())
    }

    /// Request termination. Repeated calls are ignored.
    pub fn stop(&self) {
        self.stopper().stop();
    }

    /// Handle for stopping this session from another task.
    pub fn stopper(&self) -> Stopper {
        Stopper {
            token: self.token.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Signal that fires once forwarding has fully terminated.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.done_rx.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Address of the first bound listener, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Browser URL for the forwarded service.
    pub fn url(&self) -> String {
        dashboard_url(&self.config.local_host, self.config.effective_local_port())
    }

    /// Whether the forwarding task is still running.
    #[cfg(test)]
    fn is_forwarding(&self) -> bool {
        self.forwarder.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Stoppable for TunnelSession {
    fn stop(&self) {
        TunnelSession::stop(self)
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Bind every address `bind_address` resolves to, on the same port.
///
/// The port already being in use on any address fails the whole bind, so a
/// session never shares a host name with another process. Addresses that
/// cannot be bound for other reasons (e.g. IPv6 disabled) are skipped as long
/// as one listener remains.
async fn bind_listeners(bind_address: &str) -> Result<Vec<TcpListener>> {
    let mut addrs: Vec<SocketAddr> = Vec::new();
    for addr in lookup_host(bind_address)
        .await
        .map_err(|e| Error::bind(bind_address, e))?
    {
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }

    let mut listeners = Vec::with_capacity(addrs.len());
    let mut last_error = None;
    for addr in addrs {
        match TcpListener::bind(addr).await {
            Ok(listener) => listeners.push(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                return Err(Error::bind(addr.to_string(), e));
            }
            Err(e) => {
                debug!(addr = %addr, error = %e, "Skipping unbindable address");
                last_error = Some(e);
            }
        }
    }

    if listeners.is_empty() {
        let source = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        });
        return Err(Error::bind(bind_address, source));
    }
    Ok(listeners)
}

/// Where accepted connections are relayed to.
struct RelayTarget {
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
    pod: String,
    remote_port: u16,
    stream_output: bool,
}

impl RelayTarget {
    /// Relay one local connection. Failing to reach the pod is returned as an
    /// error; I/O errors on an established relay only end this connection.
    async fn relay(self: Arc<Self>, mut socket: TcpStream, peer: SocketAddr) -> Result<()> {
        if self.stream_output {
            info!(peer = %peer, "Handling connection for {}", self.remote_port);
        } else {
            debug!(peer = %peer, "Handling connection for {}", self.remote_port);
        }

        let mut upstream = self
            .cluster
            .open_port_stream(&self.namespace, &self.pod, self.remote_port)
            .await?;

        match tokio::io::copy_bidirectional(&mut socket, &mut upstream).await {
            Ok((sent, received)) => {
                debug!(peer = %peer, sent, received, "Connection closed");
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "Connection ended with error");
            }
        }
        Ok(())
    }
}

type Accepted = io::Result<(TcpStream, SocketAddr)>;

/// Feed connections from one listener into the shared accept queue.
async fn accept_into(listener: TcpListener, queue: mpsc::Sender<Accepted>) {
    loop {
        let accepted = listener.accept().await;
        let failed = accepted.is_err();
        if queue.send(accepted).await.is_err() || failed {
            break;
        }
    }
}

/// Accept loop. Runs until the token is cancelled or the session faults.
async fn forward(
    listeners: Vec<TcpListener>,
    target: Arc<RelayTarget>,
    token: CancellationToken,
    state: Arc<Mutex<SessionState>>,
    done: watch::Sender<Option<Termination>>,
) {
    let (queue, mut accepted) = mpsc::channel::<Accepted>(listeners.len().max(1));
    let mut acceptors = JoinSet::new();
    for listener in listeners {
        acceptors.spawn(accept_into(listener, queue.clone()));
    }
    drop(queue);

    let mut connections: JoinSet<Result<()>> = JoinSet::new();

    let termination = loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break Termination::Stopped,

            Some(joined) = connections.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(pod = %target.pod, error = %e, "Lost connection to pod");
                    break Termination::Faulted(e.to_string());
                }
                Err(e) if e.is_panic() => {
                    break Termination::Faulted(format!("connection task panicked: {}", e));
                }
                Err(_) => {}
            },

            next = accepted.recv() => match next {
                Some(Ok((socket, peer))) => {
                    connections.spawn(Arc::clone(&target).relay(socket, peer));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Error accepting connection");
                    break Termination::Faulted(format!("failed to accept connection: {}", e));
                }
                None => break Termination::Faulted("every listener closed".to_string()),
            },
        }
    };

    // Listeners are owned by the acceptors and close with them
    acceptors.shutdown().await;
    drop(accepted);
    connections.shutdown().await;

    *lock(&state) = SessionState::Stopped;
    match &termination {
        Termination::Faulted(reason) => warn!(reason = %reason, "Port-forward terminated"),
        _ => info!("Port-forward stopped"),
    }
    done.send_replace(Some(termination));
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
