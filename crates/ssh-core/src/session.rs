use russh::{
    Disconnect,
    client::{self, Handle},
};
use std::{sync::Arc, time::Duration};

use tokio::time;
use tracing::{debug, warn};

pub type SessionHandle<H> = Handle<H>;
pub type SharedSessionHandle<H> = Arc<Handle<H>>;

/// Politely close the SSH connection. Errors are logged, never propagated:
/// the session is going away either way.
pub async fn disconnect<H>(session: &SharedSessionHandle<H>)
where
    H: client::Handler + Send,
{
    if session.is_closed() {
        debug!("session already closed; skipping disconnect");
        return;
    }
    if let Err(err) = session.disconnect(Disconnect::ByApplication, "", "").await {
        warn!(?err, "SSH disconnect failed");
    }
}

/// Resolve once the transport has gone away, checking every `poll`.
pub async fn closed<H>(session: &SharedSessionHandle<H>, poll: Duration)
where
    H: client::Handler + Send,
{
    let mut ticker = time::interval(poll);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if session.is_closed() {
            debug!("SSH session closed by peer");
            return;
        }
    }
}
