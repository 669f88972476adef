use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, Span, debug, debug_span, info, info_span, warn};

use super::{
    relay::{RelayOptions, RelayPair},
    traits::ForwardSession,
};

type Result<T> = crate::SshResult<T>;

/// Back-off applied when the process runs out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// One local listener forwarding to one fixed remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Optional local bind address (defaults to loopback).
    pub bind_address: Option<String>,
    /// Local bind port.
    pub bind_port: u16,
    /// Target host to reach through the tunnel.
    pub target_host: String,
    /// Target port to reach through the tunnel.
    pub target_port: u16,
}

impl TunnelSpec {
    pub fn bind_host(&self) -> &str {
        self.bind_address.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn bind_authority(&self) -> String {
        format!("{}:{}", self.bind_host(), self.bind_port)
    }

    pub fn target_authority(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// Accepts local TCP connections and relays each one through its own
/// `direct-tcpip` channel on a shared session.
///
/// The accept loop never waits on a tunnel: channel opening and relaying run
/// in tracked background tasks, and a failure in one of them only closes that
/// connection. Cancelling the token stops the loop and every in-flight relay.
pub struct TunnelManager<S> {
    session: S,
    spec: TunnelSpec,
    relay: RelayOptions,
    cancel: CancellationToken,
    span: Span,
}

impl<S> TunnelManager<S>
where
    S: ForwardSession,
{
    pub fn new(session: S, spec: TunnelSpec) -> Self {
        let span = info_span!("tunnel", bind = %spec.bind_authority(), target = %spec.target_authority());
        Self {
            session,
            spec,
            relay: RelayOptions::default(),
            cancel: CancellationToken::new(),
            span,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_relay_options(mut self, relay: RelayOptions) -> Self {
        self.relay = relay;
        self
    }

    /// Emit tunnel and relay events under `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bind the local listener. Failure is reported immediately, never retried.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = self.spec.bind_authority();
        let listener = TcpListener::bind((self.spec.bind_host(), self.spec.bind_port))
            .await
            .map_err(|source| crate::SshCoreError::BindFailed {
                address: address.clone(),
                source,
            })?;
        self.span.in_scope(|| {
            info!(
                local = %listener.local_addr().map(|a| a.to_string()).unwrap_or(address),
                "local TCP forward listening"
            )
        });
        Ok(listener)
    }

    /// Bind and accept until cancelled.
    pub async fn serve(self) -> Result<()> {
        let listener = self.bind().await?;
        self.run(listener).await
    }

    /// Accept on an already bound listener until cancelled or the listener fails.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        let span = self.span.clone();
        self.accept_loop(listener).instrument(span).await
    }

    async fn accept_loop(self, listener: TcpListener) -> Result<()> {
        let tracker = TaskTracker::new();
        let shutdown = self.cancel.child_token();
        let next_id = AtomicU64::new(1);

        let outcome = loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, origin)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    let span = debug_span!(parent: &self.span, "connection", id, peer = %origin);
                    let connection = Connection {
                        session: self.session.clone(),
                        spec: self.spec.clone(),
                        relay: RelayPair::new(self.relay).with_span(span.clone()),
                        cancel: shutdown.child_token(),
                    };
                    tracker.spawn(connection.handle(stream, origin).instrument(span));
                }
                Err(err) if is_transient_accept_error(&err) => {
                    warn!(?err, "transient accept error; continuing");
                    if is_resource_exhaustion(&err) {
                        time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
                Err(err) => {
                    warn!(?err, "local TCP forward listener failed");
                    break Err(crate::SshCoreError::Accept(err));
                }
            }
        };

        drop(listener);
        shutdown.cancel();
        tracker.close();
        if !tracker.is_empty() {
            debug!(active = tracker.len(), "waiting for in-flight relays");
        }
        tracker.wait().await;
        info!("local TCP forward stopped");
        outcome
    }
}

struct Connection<S> {
    session: S,
    spec: TunnelSpec,
    relay: RelayPair,
    cancel: CancellationToken,
}

impl<S> Connection<S>
where
    S: ForwardSession,
{
    async fn handle(self, mut stream: TcpStream, origin: SocketAddr) {
        stream.set_nodelay(true).ok();
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                let _ = stream.shutdown().await;
                return;
            }
            opened = self.session.open_direct_tcpip(
                self.spec.target_host.clone(),
                self.spec.target_port,
                origin.ip().to_string(),
                origin.port(),
            ) => opened,
        };
        let remote = match opened {
            Ok(remote) => remote,
            Err(err) => {
                let err = crate::SshCoreError::channel_open(self.spec.target_authority(), err);
                warn!(error = %err, "closing local connection");
                let _ = stream.shutdown().await;
                return;
            }
        };
        debug!("channel opened; relaying");
        let summary = self.relay.run(stream, remote, self.cancel).await;
        debug!(
            upstream = summary.upstream_bytes,
            downstream = summary.downstream_bytes,
            end = ?summary.end,
            "connection closed"
        );
    }
}

/// Errors that only affect the connection being accepted.
fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || is_resource_exhaustion(err)
}

/// No descriptor for the new socket, but the listener is fine.
#[cfg(unix)]
const DESCRIPTOR_EXHAUSTED: &[i32] = &[
    23, // ENFILE
    24, // EMFILE
];
#[cfg(windows)]
const DESCRIPTOR_EXHAUSTED: &[i32] = &[
    10024, // WSAEMFILE
];
#[cfg(not(any(unix, windows)))]
const DESCRIPTOR_EXHAUSTED: &[i32] = &[];

fn is_resource_exhaustion(err: &io::Error) -> bool {
    err.raw_os_error().is_some_and(|code| DESCRIPTOR_EXHAUSTED.contains(&code))
}
