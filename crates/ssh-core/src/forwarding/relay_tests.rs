//! Unit tests for the bidirectional relay.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{DuplexStream, ReadBuf, duplex};

use super::*;

const WAIT: Duration = Duration::from_secs(2);

fn options(grace: Duration) -> RelayOptions {
    RelayOptions {
        buffer_size: 1024,
        half_close_grace: grace,
    }
}

/// Returns (local client, remote peer, relay task).
fn start_relay(opts: RelayOptions, cancel: CancellationToken) -> (DuplexStream, DuplexStream, JoinHandle<RelaySummary>) {
    let (local_client, local_server) = duplex(4096);
    let (remote_channel, remote_peer) = duplex(4096);
    let relay = RelayPair::new(opts);
    let task = tokio::spawn(async move { relay.run(local_server, remote_channel, cancel).await });
    (local_client, remote_peer, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_bytes_unmodified_in_both_directions() {
    let (mut local, mut remote, task) = start_relay(options(WAIT), CancellationToken::new());

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let writer_payload = payload.clone();
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let writer = tokio::spawn(async move {
        local_wr.write_all(&writer_payload).await.unwrap();
        local_wr
    });
    let mut received = vec![0u8; payload.len()];
    remote.read_exact(&mut received).await.unwrap();
    assert_eq!(received, payload);
    let local_wr = writer.await.unwrap();

    remote.write_all(b"pong").await.unwrap();
    let mut buf = [0u8; 4];
    local_rd.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    local = local_rd.unsplit(local_wr);
    drop(local);
    drop(remote);
    let summary = time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(summary.upstream_bytes, payload.len() as u64);
    assert_eq!(summary.downstream_bytes, 4);
    assert_eq!(summary.end, RelayEnd::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_half_close_reaches_remote() {
    let (mut local, mut remote, _task) = start_relay(options(WAIT), CancellationToken::new());

    local.write_all(b"last words").await.unwrap();
    local.shutdown().await.unwrap();

    let mut received = Vec::new();
    time::timeout(WAIT, remote.read_to_end(&mut received))
        .await
        .expect("remote should observe EOF")
        .unwrap();
    assert_eq!(received, b"last words");

    // The other direction keeps working until the peer closes it.
    remote.write_all(b"reply").await.unwrap();
    let mut buf = [0u8; 5];
    local.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"reply");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_direction_is_closed_after_grace() {
    let (mut local, remote, task) = start_relay(options(Duration::from_millis(50)), CancellationToken::new());

    local.shutdown().await.unwrap();
    let summary = time::timeout(WAIT, task).await.expect("relay should finish").unwrap();
    assert_eq!(summary.end, RelayEnd::GraceExpired);

    let mut buf = [0u8; 1];
    let read = time::timeout(WAIT, local.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0, "local side should be closed once the relay ends");
    drop(remote);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_grace_closes_both_directions_on_first_eof() {
    let (mut local, mut remote, task) = start_relay(options(Duration::ZERO), CancellationToken::new());

    local.write_all(b"bye").await.unwrap();
    local.shutdown().await.unwrap();
    let summary = time::timeout(WAIT, task).await.expect("relay should not linger").unwrap();
    assert_eq!(summary.end, RelayEnd::GraceExpired);
    assert_eq!(summary.upstream_bytes, 3);

    let mut received = Vec::new();
    time::timeout(WAIT, remote.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"bye");
    let mut buf = [0u8; 1];
    assert_eq!(time::timeout(WAIT, local.read(&mut buf)).await.unwrap().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_closes_both_ends() {
    let cancel = CancellationToken::new();
    let (mut local, mut remote, task) = start_relay(options(WAIT), cancel.clone());

    cancel.cancel();
    let summary = time::timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(summary.end, RelayEnd::Cancelled);

    let mut buf = [0u8; 1];
    assert_eq!(time::timeout(WAIT, local.read(&mut buf)).await.unwrap().unwrap(), 0);
    assert_eq!(time::timeout(WAIT, remote.read(&mut buf)).await.unwrap().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn io_failure_tears_down_pair_without_waiting_for_grace() {
    let (remote_channel, mut remote_peer) = duplex(4096);
    let relay = RelayPair::new(options(Duration::from_secs(60)));
    let task = tokio::spawn(async move { relay.run(FailingStream, remote_channel, CancellationToken::new()).await });

    let summary = time::timeout(WAIT, task).await.expect("failure should not wait for grace").unwrap();
    assert_eq!(summary.end, RelayEnd::Failed(Direction::Upstream));

    let mut buf = [0u8; 1];
    assert_eq!(time::timeout(WAIT, remote_peer.read(&mut buf)).await.unwrap().unwrap(), 0);
}

#[test]
fn expected_close_kinds_are_not_failures() {
    assert_eq!(classify(Direction::Upstream, io::ErrorKind::BrokenPipe.into()), PipeEnd::Eof);
    assert_eq!(classify(Direction::Downstream, io::ErrorKind::ConnectionReset.into()), PipeEnd::Eof);
    assert_eq!(classify(Direction::Upstream, io::Error::other("boom")), PipeEnd::Failed);
}

/// Reads always fail; writes are swallowed.
struct FailingStream;

impl AsyncRead for FailingStream {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("disk on fire")))
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
