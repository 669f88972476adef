use std::{fmt, io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, trace, warn};

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_HALF_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Which way bytes flow through a relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Local connection towards the remote channel.
    Upstream,
    /// Remote channel towards the local connection.
    Downstream,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "local->remote",
            Direction::Downstream => "remote->local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for a [`RelayPair`].
#[derive(Clone, Copy, Debug)]
pub struct RelayOptions {
    /// Size of the transient copy buffer used by each direction.
    pub buffer_size: usize,
    /// How long the surviving direction may keep running after the other one
    /// reached end-of-stream before both ends are torn down.
    /// `Duration::ZERO` closes both directions as soon as either one finishes.
    pub half_close_grace: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            half_close_grace: DEFAULT_HALF_CLOSE_GRACE,
        }
    }
}

/// How a relay finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayEnd {
    /// Both directions reached end-of-stream on their own.
    Completed,
    /// One direction finished and the other was closed after the grace period.
    GraceExpired,
    /// A direction failed with a genuine I/O error.
    Failed(Direction),
    /// The owning tunnel was shut down.
    Cancelled,
}

/// Byte counts and termination cause of one relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelaySummary {
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    pub end: RelayEnd,
}

/// Bidirectional byte relay between a local connection and a remote channel.
///
/// Each call to [`RelayPair::run`] spawns two copy tasks that own their stream
/// halves exclusively. Whichever direction finishes first shuts down its
/// destination writer, which propagates the half-close to the peer; the
/// mirrored direction then gets [`RelayOptions::half_close_grace`] before the
/// pair is cancelled. Once both tasks return, every half has been dropped and
/// both endpoints are closed.
#[derive(Clone, Debug)]
pub struct RelayPair {
    options: RelayOptions,
    span: Span,
}

impl RelayPair {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            options,
            span: Span::current(),
        }
    }

    /// Emit all relay events under `span` instead of the caller's span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn run<L, R>(&self, local: L, remote: R, cancel: CancellationToken) -> RelaySummary
    where
        L: AsyncRead + AsyncWrite + Send + 'static,
        R: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (local_rd, local_wr) = tokio::io::split(local);
        let (remote_rd, remote_wr) = tokio::io::split(remote);
        let pair = cancel.child_token();
        let buffer_size = self.options.buffer_size.max(1);

        let mut upstream: JoinHandle<PipeOutcome> = tokio::spawn(
            pipe(Direction::Upstream, local_rd, remote_wr, pair.clone(), buffer_size).instrument(self.span.clone()),
        );
        let mut downstream: JoinHandle<PipeOutcome> = tokio::spawn(
            pipe(Direction::Downstream, remote_rd, local_wr, pair.clone(), buffer_size).instrument(self.span.clone()),
        );

        let (first_direction, first) = tokio::select! {
            res = &mut upstream => (Direction::Upstream, res),
            res = &mut downstream => (Direction::Downstream, res),
        };
        let first = PipeOutcome::from_join(first_direction, first);
        let (remaining_direction, remaining) = match first_direction {
            Direction::Upstream => (Direction::Downstream, &mut downstream),
            Direction::Downstream => (Direction::Upstream, &mut upstream),
        };

        let mut grace_expired = false;
        let second = match time::timeout(self.options.half_close_grace, &mut *remaining).await {
            Ok(res) => PipeOutcome::from_join(remaining_direction, res),
            Err(_) => {
                self.span
                    .in_scope(|| debug!(direction = %remaining_direction, "half-close grace elapsed; closing relay"));
                grace_expired = true;
                pair.cancel();
                PipeOutcome::from_join(remaining_direction, remaining.await)
            }
        };

        let end = if let PipeEnd::Failed = first.end {
            RelayEnd::Failed(first.direction)
        } else if let PipeEnd::Failed = second.end {
            RelayEnd::Failed(second.direction)
        } else if cancel.is_cancelled() {
            RelayEnd::Cancelled
        } else if grace_expired {
            RelayEnd::GraceExpired
        } else {
            RelayEnd::Completed
        };

        let (upstream_bytes, downstream_bytes) = match first.direction {
            Direction::Upstream => (first.bytes, second.bytes),
            Direction::Downstream => (second.bytes, first.bytes),
        };
        RelaySummary {
            upstream_bytes,
            downstream_bytes,
            end,
        }
    }
}

impl Default for RelayPair {
    fn default() -> Self {
        Self::new(RelayOptions::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PipeEnd {
    Eof,
    Cancelled,
    Failed,
}

struct PipeOutcome {
    direction: Direction,
    bytes: u64,
    end: PipeEnd,
}

impl PipeOutcome {
    fn from_join(direction: Direction, res: Result<PipeOutcome, tokio::task::JoinError>) -> Self {
        res.unwrap_or_else(|err| {
            warn!(%direction, ?err, "relay task aborted");
            PipeOutcome {
                direction,
                bytes: 0,
                end: PipeEnd::Failed,
            }
        })
    }
}

/// Copy `reader` into `writer` until end-of-stream, error, or cancellation,
/// then shut the writer down. A genuine failure cancels the whole pair.
async fn pipe<Rd, Wr>(direction: Direction, mut reader: Rd, mut writer: Wr, pair: CancellationToken, buffer_size: usize) -> PipeOutcome
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut bytes = 0u64;
    let end = loop {
        let read = tokio::select! {
            biased;
            _ = pair.cancelled() => break PipeEnd::Cancelled,
            read = reader.read(&mut buf) => read,
        };
        let n = match read {
            Ok(0) => break PipeEnd::Eof,
            Ok(n) => n,
            Err(err) => break classify(direction, err),
        };
        let written = tokio::select! {
            biased;
            _ = pair.cancelled() => break PipeEnd::Cancelled,
            written = writer.write_all(&buf[..n]) => written,
        };
        if let Err(err) = written {
            break classify(direction, err);
        }
        bytes += n as u64;
    };

    if let Err(err) = writer.shutdown().await
        && !is_expected_close(&err)
    {
        debug!(%direction, ?err, "failed to shut down relay writer");
    }
    if end == PipeEnd::Failed {
        pair.cancel();
    }
    trace!(%direction, bytes, ?end, "relay direction finished");
    PipeOutcome { direction, bytes, end }
}

fn classify(direction: Direction, err: io::Error) -> PipeEnd {
    if is_expected_close(&err) {
        // Treat common half-close races as graceful termination.
        debug!(%direction, kind = ?err.kind(), "peer closed connection");
        return PipeEnd::Eof;
    }
    let err = crate::SshCoreError::RelayIo {
        direction: direction.as_str(),
        source: err,
    };
    warn!(error = %err, "relay I/O error");
    PipeEnd::Failed
}

fn is_expected_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
#[path = "relay_tests.rs"]
mod tests;
