//! Session negotiation: connection configuration, dialing, and ordered
//! authentication against a single remote host.

use std::{env, sync::Arc, time::Duration};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::{Disconnect, client};
use ssh_core::{crypto::preferred_algorithms, session::SharedSessionHandle};
use tracing::{debug, info, warn};

use crate::{
    ClientError,
    auth::{self, AuthMethod},
    hostkeys::{ClientHandler, HostKeyPolicy, HostKeyVerifier},
};

/// Environment variables consulted, in order, for the local principal.
pub const PRINCIPAL_ENV_KEYS: [&str; 4] = ["TB_USER", "USER", "LOGNAME", "USERNAME"];

const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_KEEPALIVE_MAX: usize = 3;

/// Transport tuning handed to russh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    pub keepalive_interval: Option<Duration>,
    pub keepalive_max: usize,
    pub inactivity_timeout: Option<Duration>,
    /// Offer legacy key exchange, cipher and MAC suites.
    pub legacy_crypto: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_max: DEFAULT_KEEPALIVE_MAX,
            inactivity_timeout: None,
            legacy_crypto: false,
        }
    }
}

impl TransportOptions {
    fn to_russh(self) -> client::Config {
        client::Config {
            preferred: preferred_algorithms(self.legacy_crypto),
            nodelay: true,
            inactivity_timeout: self.inactivity_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_max: self.keepalive_max,
            ..Default::default()
        }
    }
}

/// Everything needed to establish one authenticated session.
///
/// Built once by [`build_config`] and consumed by [`connect`]; the method list
/// cannot change after construction.
#[derive(Debug)]
pub struct SessionConfig {
    identity: String,
    methods: Vec<AuthMethod>,
    host_key_policy: HostKeyPolicy,
    transport: TransportOptions,
}

impl SessionConfig {
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn method_labels(&self) -> Vec<&'static str> {
        self.methods.iter().map(AuthMethod::label).collect()
    }

    pub fn host_key_policy(&self) -> &HostKeyPolicy {
        &self.host_key_policy
    }

    pub fn transport(&self) -> TransportOptions {
        self.transport
    }
}

/// Build a [`SessionConfig`]. A missing identity is resolved from the local
/// principal; the host-key policy starts as known_hosts verification.
pub fn build_config(identity: Option<String>, methods: Vec<AuthMethod>) -> Result<SessionConfig> {
    let identity = match identity.filter(|id| !id.is_empty()) {
        Some(id) => id,
        None => resolve_local_principal()?,
    };
    Ok(SessionConfig {
        identity,
        methods,
        host_key_policy: HostKeyPolicy::default(),
        transport: TransportOptions::default(),
    })
}

/// The user name of the local principal.
pub fn resolve_local_principal() -> Result<String> {
    principal_from(|key| env::var(key).ok(), whoami::fallible::username)
}

fn principal_from(var: impl Fn(&str) -> Option<String>, os_user: impl FnOnce() -> std::io::Result<String>) -> Result<String> {
    if let Some(value) = PRINCIPAL_ENV_KEYS.iter().find_map(|key| var(key).filter(|v| !v.is_empty())) {
        return Ok(value);
    }
    match os_user() {
        Ok(current) if !current.is_empty() => Ok(current),
        Ok(_) => Err(ClientError::IdentityResolution(
            "the local user name is empty; pass --username".to_string(),
        )),
        Err(err) => Err(ClientError::IdentityResolution(format!(
            "could not determine the local user name ({err}); pass --username"
        ))),
    }
}

/// Dial `remote_host:remote_port`, verify the host key, and authenticate with
/// the configured methods in order. The first success wins.
pub async fn connect(remote_host: &str, remote_port: u16, config: SessionConfig) -> Result<SharedSessionHandle<ClientHandler>> {
    let SessionConfig {
        identity,
        mut methods,
        host_key_policy,
        transport,
    } = config;
    if methods.is_empty() {
        return Err(ClientError::Transport("no authentication methods configured".to_string()));
    }
    if host_key_policy.is_insecure() {
        warn!("host key verification disabled; the server's identity will not be checked");
    }
    if transport.legacy_crypto {
        warn!("legacy cipher suites enabled");
    }

    let target = format!("{remote_host}:{remote_port}");
    let handler = ClientHandler::new(HostKeyVerifier::new(remote_host, remote_port, host_key_policy));
    info!(%target, user = %identity, "connecting");
    let mut session = client::connect(Arc::new(transport.to_russh()), (remote_host, remote_port), handler)
        .await
        .map_err(|err| match err {
            ClientError::HostKeyFailed(_) => err,
            other => ClientError::Transport(format!("failed to establish SSH session with {target}: {other}")),
        })?;
    debug!(methods = ?methods.iter().map(AuthMethod::label).collect::<Vec<_>>(), "authenticating");

    if let Err(err) = auth::authenticate(&mut session, &identity, &mut methods).await {
        if let Err(disconnect_err) = session.disconnect(Disconnect::ByApplication, "", "").await {
            debug!(?disconnect_err, "disconnect after failed authentication");
        }
        return Err(err);
    }
    info!(%target, user = %identity, "SSH session established");
    Ok(Arc::new(session))
}
