use std::{path::PathBuf, sync::Arc};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::keys::{self, HashAlg, PublicKey};
use tracing::{debug, info, warn};

use crate::ClientError;

/// How the server's host key is trusted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Look the key up in an OpenSSH `known_hosts` file (`~/.ssh/known_hosts` when unset).
    KnownHosts { path: Option<PathBuf> },
    /// Accept only keys whose `SHA256:` fingerprint is listed.
    Pinned(Vec<String>),
    /// Accept every key. Only for throwaway test hosts.
    AcceptAny,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts { path: None }
    }
}

impl HostKeyPolicy {
    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::AcceptAny)
    }
}

pub struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }

    fn authority(&self) -> String {
        if self.port == 22 {
            self.host.clone()
        } else {
            format!("[{}]:{}", self.host, self.port)
        }
    }

    pub fn check(&self, server_key: &PublicKey) -> Result<bool> {
        let fingerprint = server_key.fingerprint(HashAlg::Sha256).to_string();
        match &self.policy {
            HostKeyPolicy::KnownHosts { path } => {
                let known = match path {
                    Some(path) => keys::check_known_hosts_path(&self.host, self.port, server_key, path),
                    None => keys::check_known_hosts(&self.host, self.port, server_key),
                };
                match known {
                    Ok(true) => {
                        info!(host = %self.authority(), "host key verified against known_hosts");
                        Ok(true)
                    }
                    Ok(false) => Err(ClientError::HostKeyFailed(format!(
                        "host key for {} is not in known_hosts ({} {}); add it with `ssh-keyscan -p {} {}` or pin it with --pin-hostkey",
                        self.authority(),
                        server_key.algorithm(),
                        fingerprint,
                        self.port,
                        self.host
                    ))),
                    Err(keys::Error::KeyChanged { line }) => Err(ClientError::HostKeyFailed(format!(
                        "host key for {} changed (received {}); offending known_hosts line {}",
                        self.authority(),
                        fingerprint,
                        line
                    ))),
                    Err(err) => Err(ClientError::HostKeyFailed(format!("failed to read known_hosts: {err}"))),
                }
            }
            HostKeyPolicy::Pinned(pins) => {
                if pins.iter().any(|pin| pin.trim() == fingerprint) {
                    info!(host = %self.authority(), %fingerprint, "host key matches pinned fingerprint");
                    Ok(true)
                } else {
                    debug!(pins = pins.len(), "no pinned fingerprint matched");
                    Err(ClientError::HostKeyFailed(format!(
                        "host key fingerprint {} for {} does not match any pinned fingerprint",
                        fingerprint,
                        self.authority()
                    )))
                }
            }
            HostKeyPolicy::AcceptAny => {
                warn!(host = %self.authority(), %fingerprint, "accepting unverified host key");
                Ok(true)
            }
        }
    }
}

/// russh event handler for the tunnel session. Only host-key trust is handled;
/// every server-initiated channel is refused by russh's defaults.
#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
}

impl ClientHandler {
    pub fn new(verifier: HostKeyVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verifier = Arc::clone(&self.verifier);
        let key = server_public_key.clone();
        async move { verifier.check(&key) }
    }
}
