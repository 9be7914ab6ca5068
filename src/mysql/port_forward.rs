//! Local TCP tunnel into an instance pod
//!
//! A [`PodTunnel`] binds an ephemeral loopback port and forwards every
//! accepted connection to a fixed port of one pod through the API server.
//! Dropping the tunnel stops the listener.

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Error, Debug)]
pub enum PortForwardError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pod {pod} did not expose a stream for port {port}")]
    NoStream { pod: String, port: u16 },

    #[error("Port forward join error: {0}")]
    Join(String),
}

pub struct PodTunnel {
    local_port: u16,
    pod: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _handle: JoinHandle<()>,
}

impl PodTunnel {
    /// Open a tunnel from an ephemeral local port to `remote_port` of a pod.
    pub async fn open(
        client: Client,
        namespace: &str,
        pod: &str,
        remote_port: u16,
    ) -> Result<Self, PortForwardError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_port = listener.local_addr()?.port();
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let target = pod.to_string();
        let handle = tokio::spawn(async move {
            accept_loop(listener, pods, target, remote_port, shutdown_rx).await;
        });

        debug!(namespace, pod, local_port, remote_port, "Pod tunnel listening");

        Ok(Self {
            local_port,
            pod: pod.to_string(),
            shutdown_tx: Some(shutdown_tx),
            _handle: handle,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            debug!(pod = %self.pod, local_port = self.local_port, "Closing pod tunnel");
            let _ = tx.send(());
        }
    }
}

impl Drop for PodTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    pods: Api<Pod>,
    pod: String,
    remote_port: u16,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    trace!(client_addr = %addr, pod = %pod, "Tunnel connection accepted");
                    let pods = pods.clone();
                    let pod = pod.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forward(pods, &pod, remote_port, stream).await {
                            warn!(error = %e, pod = %pod, "Tunnel connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Tunnel accept failed"),
            }
        }
    }
}

async fn forward(
    pods: Api<Pod>,
    pod: &str,
    remote_port: u16,
    mut local: TcpStream,
) -> Result<(), PortForwardError> {
    let mut pf = pods.portforward(pod, &[remote_port]).await?;
    let mut upstream = pf
        .take_stream(remote_port)
        .ok_or_else(|| PortForwardError::NoStream {
            pod: pod.to_string(),
            port: remote_port,
        })?;

    // Either side closing ends the session.
    let _ = tokio::io::copy_bidirectional(&mut local, &mut upstream).await;
    drop(upstream);

    pf.join()
        .await
        .map_err(|e| PortForwardError::Join(e.to_string()))
}
