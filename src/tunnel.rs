//! Port-forward tunnels to the device service pod.
//!
//! A [`Tunnel`] binds a local TCP listener and forwards every accepted
//! connection to a fixed port on a single pod through the Kubernetes
//! `portforward` subresource. The pod is picked with [`locate`] right before
//! the tunnel is activated; it is not re-validated afterwards.
//!
//! # Example
//!
//! ```ignore
//! use device_tunnel::{DeviceClient, Tunnel, TunnelConfig};
//!
//! let client = kube::Client::try_default().await?;
//! let tunnel = Tunnel::open(client, "prod", &TunnelConfig::default()).await?;
//!
//! let mut devices = DeviceClient::connect_tunnel(&tunnel).await?;
//! let all = devices.list().await?;
//!
//! devices.close();
//! tunnel.close();
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::TunnelConfig;
use crate::error::{BoxError, Error, Result};
use crate::locate::{PodLister, locate};

/// Pause after a failed `accept` so persistent errors such as `EMFILE` do not
/// spin the accept loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What a forward connects: a local listen address and a port on a pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Namespace of the pod.
    pub namespace: String,
    /// Name of the pod.
    pub pod: String,
    /// Port on the pod.
    pub remote_port: u16,
    /// Local address to listen on. Port 0 picks an ephemeral port.
    pub local: SocketAddr,
}

/// Constructs forwards to pods.
pub trait Forwarder {
    /// The forward this forwarder constructs.
    type Forward: Forward;

    /// Constructs an inactive forward to `target`.
    fn forward(&self, target: &ForwardTarget) -> Self::Forward;
}

/// A single forward from a local listener to a pod port.
pub trait Forward {
    /// Error returned when activation fails.
    type Error: Into<BoxError>;

    /// Starts listening and forwarding. Returns the bound local address.
    fn activate(
        &mut self,
    ) -> impl Future<Output = std::result::Result<SocketAddr, Self::Error>> + Send;

    /// Stops forwarding and frees the listener. Calling this more than once,
    /// or before activation, is harmless.
    fn release(&mut self);
}

/// Lifecycle of a [`Tunnel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
    /// Constructed, not yet activated.
    Unopened,
    /// Activation in progress.
    Opening,
    /// Listening and forwarding.
    Active,
    /// Released.
    Closed,
}

/// An open port-forward owned by the caller.
///
/// Dropping the tunnel releases it, so a tunnel abandoned mid-activation (for
/// example by a caller-side timeout) never outlives its owner. Prefer
/// [`Tunnel::close`] to make the release explicit.
#[derive(Debug)]
pub struct Tunnel<F: Forward = PodForward> {
    namespace: String,
    pod: String,
    remote_port: u16,
    local_addr: Option<SocketAddr>,
    state: TunnelState,
    forward: F,
}

impl Tunnel {
    /// Locates the device service pod in `namespace` and forwards a local
    /// port to it through the Kubernetes API.
    ///
    /// # Errors
    ///
    /// See [`open`].
    pub async fn open(client: Client, namespace: &str, config: &TunnelConfig) -> Result<Self> {
        let forwarder = PodForwarder::new(client.clone());
        open(&client, &forwarder, namespace, config).await
    }
}

impl<F: Forward> Tunnel<F> {
    fn new(target: &ForwardTarget, forward: F) -> Self {
        Self {
            namespace: target.namespace.clone(),
            pod: target.pod.clone(),
            remote_port: target.remote_port,
            local_addr: None,
            state: TunnelState::Unopened,
            forward,
        }
    }

    /// Namespace of the target pod.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the target pod.
    #[must_use]
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Port on the target pod.
    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Local address accepting connections, once active.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Local port accepting connections, once active.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// Local `host:port` to dial, once active.
    #[must_use]
    pub fn address(&self) -> Option<String> {
        self.local_addr.map(|addr| addr.to_string())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Stops forwarding and frees the local listener.
    pub fn close(mut self) {
        self.release();
    }

    async fn activate(&mut self) -> Result<()> {
        self.state = TunnelState::Opening;

        match self.forward.activate().await {
            Ok(addr) => {
                self.local_addr = Some(addr);
                self.state = TunnelState::Active;
                tracing::info!(
                    "forwarding {addr} to {}/{}:{}",
                    self.namespace,
                    self.pod,
                    self.remote_port
                );
                Ok(())
            }

            Err(e) => {
                self.release();
                Err(Error::ForwardFailed {
                    namespace: self.namespace.clone(),
                    pod: self.pod.clone(),
                    port: self.remote_port,
                    source: e.into(),
                })
            }
        }
    }

    fn release(&mut self) {
        if self.state == TunnelState::Closed {
            return;
        }

        self.forward.release();
        self.state = TunnelState::Closed;
        tracing::debug!(
            "closed tunnel to {}/{}:{}",
            self.namespace,
            self.pod,
            self.remote_port
        );
    }
}

impl<F: Forward> Drop for Tunnel<F> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Locates a ready pod and opens an active tunnel to it.
///
/// The pod is the first ready one matching `config.selector` in `namespace`.
/// On success the caller owns the returned tunnel and must close (or drop)
/// it. On failure nothing stays open.
///
/// Deadlines are the caller's: wrap this future in `tokio::time::timeout`.
/// A cancelled call releases any forward it already constructed.
///
/// # Errors
///
/// - Any error from [`locate`], unchanged.
/// - [`Error::ForwardFailed`] if the forward could not be activated.
pub async fn open<L, F>(
    lister: &L,
    forwarder: &F,
    namespace: &str,
    config: &TunnelConfig,
) -> Result<Tunnel<F::Forward>>
where
    L: PodLister + ?Sized,
    F: Forwarder + ?Sized,
{
    let pod = locate(lister, namespace, &config.selector).await?;

    let target = ForwardTarget {
        namespace: namespace.to_string(),
        pod,
        remote_port: config.remote_port,
        local: SocketAddr::new(config.bind_address, config.local_port.unwrap_or(0)),
    };

    let mut tunnel = Tunnel::new(&target, forwarder.forward(&target));
    tunnel.activate().await?;
    Ok(tunnel)
}

/// [`Forwarder`] backed by the Kubernetes `portforward` subresource.
#[derive(Clone)]
pub struct PodForwarder {
    client: Client,
}

impl PodForwarder {
    /// Creates a forwarder using `client` to reach the API server.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Forwarder for PodForwarder {
    type Forward = PodForward;

    fn forward(&self, target: &ForwardTarget) -> PodForward {
        PodForward {
            pods: Api::namespaced(self.client.clone(), &target.namespace),
            pod: target.pod.clone(),
            remote_port: target.remote_port,
            local: target.local,
            task: None,
        }
    }
}

/// A forward created by [`PodForwarder`].
///
/// Each connection accepted on the local listener opens its own
/// `portforward` stream to the pod. Dropping the forward releases it.
pub struct PodForward {
    pods: Api<Pod>,
    pod: String,
    remote_port: u16,
    local: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PodForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodForward")
            .field("pod", &self.pod)
            .field("remote_port", &self.remote_port)
            .field("local", &self.local)
            .field("active", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

impl Forward for PodForward {
    type Error = BoxError;

    async fn activate(&mut self) -> std::result::Result<SocketAddr, BoxError> {
        let listener = TcpListener::bind(self.local).await?;
        let local = listener.local_addr()?;

        // Fail activation now rather than on the first connection if the pod
        // cannot be reached.
        let check = self.pods.portforward(&self.pod, &[self.remote_port]).await?;
        check.abort();

        tracing::debug!("listening on {local} for {}:{}", self.pod, self.remote_port);

        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.pods.clone(),
            self.pod.clone(),
            self.remote_port,
        )));

        Ok(local)
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PodForward {
    fn drop(&mut self) {
        self.release();
    }
}

/// Accepts local connections and forwards each one to the pod.
///
/// Connection tasks live in a `JoinSet`, so aborting this task aborts them.
async fn accept_loop(listener: TcpListener, pods: Api<Pod>, pod: String, port: u16) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((conn, peer)) => {
                    tracing::debug!("accepted {peer} for {pod}:{port}");

                    let pods = pods.clone();
                    let pod = pod.clone();
                    connections.spawn(async move {
                        if let Err(e) = forward_connection(&pods, &pod, port, conn).await {
                            tracing::warn!("forwarding {peer} to {pod}:{port} failed: {e}");
                        }
                    });
                }

                Err(e) => accept_failed(&pod, port, &e).await,
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn accept_failed(pod: &str, port: u16, err: &io::Error) {
    tracing::warn!(
        "failed to accept connection for {pod}:{port}: {err}; retrying in {:?}",
        ACCEPT_ERROR_BACKOFF
    );
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn forward_connection(
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
    mut conn: TcpStream,
) -> std::result::Result<(), BoxError> {
    let mut forwarder = pods.portforward(pod, &[port]).await?;
    let mut upstream = forwarder
        .take_stream(port)
        .ok_or("port not found in forwarder")?;

    tokio::io::copy_bidirectional(&mut conn, &mut upstream).await?;

    drop(upstream);
    forwarder.join().await?;
    Ok(())
}
