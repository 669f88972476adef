pub mod auth;
pub mod error;
pub mod hostkeys;
pub mod negotiator;

use std::{path::PathBuf, time::Duration};

pub use auth::{
    AuthMethod, PromptIo, PromptQuestion, TerminalPrompt, answer_challenge, identity_auth, interactive_auth, interactive_auth_with,
    password_auth, password_prompt_auth, password_prompt_auth_with, resolve_agent_auth, resolve_agent_auth_from,
};
pub use error::{ClientError, ClientResult};
pub use hostkeys::{ClientHandler, HostKeyPolicy, HostKeyVerifier};
pub use negotiator::{SessionConfig, TransportOptions, build_config, connect, resolve_local_principal};
use secrecy::SecretString;
use ssh_core::{
    forwarding::{RelayOptions, TunnelManager, TunnelSpec},
    session,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the run loop checks whether the server dropped the session.
const SESSION_POLL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Remote user; the local principal when unset.
    pub username: Option<String>,
    pub tunnel: TunnelSpec,
    pub identities: Vec<PathBuf>,
    pub agent_auth: bool,
    pub keyboard_interactive: bool,
    pub password: Option<SecretString>,
    pub prompt_password: bool,
    pub host_key_policy: HostKeyPolicy,
    pub transport: TransportOptions,
    pub relay: RelayOptions,
}

/// Authenticate, then forward the configured tunnel until `cancel` fires or the
/// session drops.
pub async fn run_client(config: ClientConfig, cancel: CancellationToken) -> ClientResult<()> {
    let ClientConfig {
        host,
        port,
        username,
        tunnel,
        identities,
        agent_auth,
        keyboard_interactive,
        password,
        prompt_password,
        host_key_policy,
        transport,
        relay,
    } = config;

    let username = match username.filter(|u| !u.is_empty()) {
        Some(user) => user,
        None => resolve_local_principal()?,
    };
    let methods = resolve_methods(&host, &username, identities, agent_auth, keyboard_interactive, password, prompt_password).await?;
    let session_config = build_config(Some(username), methods)?
        .with_host_key_policy(host_key_policy)
        .with_transport(transport);

    let session = tokio::select! {
        _ = cancel.cancelled() => {
            info!("cancelled before the session was established");
            return Ok(());
        }
        session = connect(&host, port, session_config) => session?,
    };

    let outcome = forward(&session, tunnel, relay, &cancel).await;

    session::disconnect(&session).await;
    match std::sync::Arc::try_unwrap(session) {
        Ok(handle) => {
            if let Err(err) = handle.await {
                warn!(?err, "SSH session shutdown error");
            }
        }
        Err(_) => warn!("SSH session handle still in use; skipping shutdown wait"),
    }
    outcome
}

async fn forward(
    session: &session::SharedSessionHandle<ClientHandler>,
    spec: TunnelSpec,
    relay: RelayOptions,
    cancel: &CancellationToken,
) -> ClientResult<()> {
    let shutdown = cancel.child_token();
    let tunnel = TunnelManager::new(session.clone(), spec)
        .with_cancel(shutdown.clone())
        .with_relay_options(relay);
    let listener = tunnel.bind().await?;
    let run = tunnel.run(listener);
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => res.map_err(ClientError::from),
        _ = session::closed(session, SESSION_POLL) => {
            warn!("SSH session closed by the server; stopping tunnel");
            shutdown.cancel();
            run.await
                .map_err(ClientError::from)
                .and_then(|()| Err(ClientError::Transport("SSH session closed by the server".to_string())))
        }
    }
}

/// Assemble the ordered method list: key files, agent, password, then
/// keyboard-interactive.
async fn resolve_methods(
    host: &str,
    username: &str,
    identities: Vec<PathBuf>,
    agent_auth: bool,
    keyboard_interactive: bool,
    password: Option<SecretString>,
    prompt_password: bool,
) -> ClientResult<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    for path in identities {
        match identity_auth(&path).await {
            Ok(method) => methods.push(method),
            Err(ClientError::PromptRead(err)) => {
                warn!(key = %path.display(), error = %err, "passphrase prompt failed; skipping key");
            }
            Err(err) => return Err(err),
        }
    }
    if agent_auth {
        match resolve_agent_auth().await {
            Ok(method) => methods.push(method),
            Err(ClientError::AgentUnavailable(reason)) => {
                warn!(%reason, "SSH agent unavailable; skipping agent authentication");
            }
            Err(err) => return Err(err),
        }
    }
    if let Some(password) = password {
        methods.push(password_auth(password));
    } else if prompt_password {
        methods.push(password_prompt_auth(format!("{username}@{host}'s password: ")));
    }
    if keyboard_interactive {
        methods.push(interactive_auth());
    }
    Ok(methods)
}
