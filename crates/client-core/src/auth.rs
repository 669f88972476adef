use std::{
    env,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use rpassword::prompt_password;
use russh::{
    MethodSet,
    client::{self, AuthResult, KeyboardInteractiveAuthResponse},
    keys::{self, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::session::SessionHandle;
use tokio::task;
use tracing::{debug, info, warn};

use crate::ClientError;

/// Environment variable naming the SSH agent socket.
pub const SSH_AUTH_SOCK: &str = "SSH_AUTH_SOCK";

/// One keyboard-interactive question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptQuestion {
    pub text: String,
    /// Whether the answer may be shown while typed.
    pub echo: bool,
}

impl PromptQuestion {
    pub fn new(text: impl Into<String>, echo: bool) -> Self {
        Self { text: text.into(), echo }
    }
}

/// User-facing I/O used by keyboard-interactive authentication.
pub trait PromptIo: Send {
    /// Show a message without waiting for input.
    fn announce(&mut self, text: &str) -> io::Result<()>;
    /// Show `prompt` and read one line of visible input.
    fn read_visible(&mut self, prompt: &str) -> io::Result<String>;
    /// Show `prompt` and read one line with echo suppressed.
    fn read_hidden(&mut self, prompt: &str) -> io::Result<String>;
}

/// [`PromptIo`] on the controlling terminal.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompt;

impl PromptIo for TerminalPrompt {
    fn announce(&mut self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{text}")?;
        out.flush()
    }

    fn read_visible(&mut self, prompt: &str) -> io::Result<String> {
        {
            let mut out = io::stdout().lock();
            write!(out, "{prompt}")?;
            out.flush()?;
        }
        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(input.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_hidden(&mut self, prompt: &str) -> io::Result<String> {
        prompt_password(prompt)
    }
}

/// Answer one keyboard-interactive challenge.
///
/// With no questions the challenge is announce-only: `instruction`, prefixed
/// by `user`, is shown and an empty answer list is returned without reading
/// input.
/// Otherwise exactly one answer per question is returned, in order. The first
/// read failure aborts the whole exchange.
pub fn answer_challenge(io: &mut dyn PromptIo, user: &str, instruction: &str, questions: &[PromptQuestion]) -> Result<Vec<String>> {
    if questions.is_empty() {
        let banner = format!("{user} {instruction}");
        io.announce(banner.trim()).map_err(ClientError::PromptRead)?;
        return Ok(Vec::new());
    }
    if !instruction.trim().is_empty() {
        io.announce(instruction.trim_end()).map_err(ClientError::PromptRead)?;
    }
    let mut answers = Vec::with_capacity(questions.len());
    for question in questions {
        let answer = if question.echo {
            io.read_visible(&question.text)
        } else {
            io.read_hidden(&question.text)
        };
        answers.push(answer.map_err(ClientError::PromptRead)?);
    }
    Ok(answers)
}

/// Agent-backed signer. The keys stay in the agent; we only hold the socket.
pub struct AgentSigner {
    socket: PathBuf,
    #[cfg(unix)]
    client: keys::agent::client::AgentClient<tokio::net::UnixStream>,
}

/// Keyboard-interactive responder. Also reads prompted passwords.
#[derive(Clone)]
pub struct InteractivePrompt {
    io: Arc<Mutex<Box<dyn PromptIo>>>,
}

impl InteractivePrompt {
    pub fn new(io: impl PromptIo + 'static) -> Self {
        Self {
            io: Arc::new(Mutex::new(Box::new(io))),
        }
    }

    /// Answer a challenge on a blocking thread.
    pub async fn respond(&self, user: &str, instruction: &str, questions: Vec<PromptQuestion>) -> Result<Vec<String>> {
        let io = Arc::clone(&self.io);
        let user = user.to_string();
        let instruction = instruction.to_string();
        task::spawn_blocking(move || {
            let mut io = io
                .lock()
                .map_err(|_| ClientError::Other("prompt I/O lock poisoned".to_string()))?;
            answer_challenge(&mut **io, &user, &instruction, &questions)
        })
        .await?
    }

    /// Read one hidden line on a blocking thread.
    pub async fn read_secret(&self, prompt: &str) -> Result<SecretString> {
        let io = Arc::clone(&self.io);
        let prompt = prompt.to_string();
        task::spawn_blocking(move || {
            let mut io = io
                .lock()
                .map_err(|_| ClientError::Other("prompt I/O lock poisoned".to_string()))?;
            io.read_hidden(&prompt)
                .map(SecretString::from)
                .map_err(ClientError::PromptRead)
        })
        .await?
    }
}

/// A private key loaded from disk.
pub struct LoadedIdentity {
    path: PathBuf,
    key: Arc<keys::PrivateKey>,
}

/// An authentication method the negotiator can attempt.
pub enum AuthMethod {
    Agent(AgentSigner),
    Interactive(InteractivePrompt),
    Identity(LoadedIdentity),
    Password(SecretString),
    /// Password read from the user when this method's turn comes.
    PasswordPrompt { prompt: String, io: InteractivePrompt },
}

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::Agent(_) => "agent",
            AuthMethod::Interactive(_) => "keyboard-interactive",
            AuthMethod::Identity(_) => "publickey",
            AuthMethod::Password(_) | AuthMethod::PasswordPrompt { .. } => "password",
        }
    }

    pub(crate) async fn attempt<H>(&mut self, session: &mut SessionHandle<H>, username: &str, rsa_hint: Option<HashAlg>) -> Result<AuthResult>
    where
        H: client::Handler + Send,
    {
        match self {
            AuthMethod::Agent(signer) => authenticate_via_agent(session, username, signer, rsa_hint).await,
            AuthMethod::Interactive(prompt) => authenticate_keyboard_interactive(session, username, prompt).await,
            AuthMethod::Identity(identity) => {
                debug!(key = %identity.path.display(), "attempting public-key auth");
                let hash_alg = if identity.key.algorithm().is_rsa() { rsa_hint } else { None };
                let key = PrivateKeyWithHashAlg::new(identity.key.clone(), hash_alg);
                session
                    .authenticate_publickey(username.to_string(), key)
                    .await
                    .map_err(Into::into)
            }
            AuthMethod::Password(password) => session
                .authenticate_password(username.to_string(), password.expose_secret().to_string())
                .await
                .map_err(Into::into),
            AuthMethod::PasswordPrompt { prompt, io } => {
                let password = io.read_secret(prompt).await?;
                session
                    .authenticate_password(username.to_string(), password.expose_secret().to_string())
                    .await
                    .map_err(Into::into)
            }
        }
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Agent(signer) => f.debug_tuple("Agent").field(&signer.socket).finish(),
            AuthMethod::Identity(identity) => f.debug_tuple("Identity").field(&identity.path).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// Connect to the agent named by `SSH_AUTH_SOCK`.
pub async fn resolve_agent_auth() -> Result<AuthMethod> {
    resolve_agent_auth_from(env::var_os(SSH_AUTH_SOCK).map(PathBuf::from)).await
}

/// Connect to the agent listening on `socket`. A missing or unreachable
/// socket is an error, never a silent skip.
pub async fn resolve_agent_auth_from(socket: Option<PathBuf>) -> Result<AuthMethod> {
    let socket = socket
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| ClientError::AgentUnavailable(format!("{SSH_AUTH_SOCK} is not set")))?;

    #[cfg(unix)]
    {
        let stream = tokio::net::UnixStream::connect(&socket)
            .await
            .map_err(|err| ClientError::AgentUnavailable(format!("cannot connect to {}: {err}", socket.display())))?;
        let client = keys::agent::client::AgentClient::connect(stream);
        debug!(socket = %socket.display(), "connected to SSH agent");
        Ok(AuthMethod::Agent(AgentSigner { socket, client }))
    }

    #[cfg(not(unix))]
    {
        Err(ClientError::AgentUnavailable(format!(
            "agent at {} is not supported on this platform",
            socket.display()
        )))
    }
}

/// Keyboard-interactive authentication on the terminal. Never fails to build.
pub fn interactive_auth() -> AuthMethod {
    interactive_auth_with(TerminalPrompt)
}

pub fn interactive_auth_with(io: impl PromptIo + 'static) -> AuthMethod {
    AuthMethod::Interactive(InteractivePrompt::new(io))
}

/// Load a private key file, prompting for its passphrase when encrypted.
pub async fn identity_auth(path: &Path) -> Result<AuthMethod> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || {
        let key = match keys::load_secret_key(&path, None) {
            Ok(key) => key,
            Err(keys::Error::KeyIsEncrypted) => {
                let prompt = format!("Enter passphrase for {}: ", path.display());
                let passphrase = prompt_password(prompt).map_err(ClientError::PromptRead)?;
                keys::load_secret_key(&path, Some(&passphrase))
                    .map_err(|err| ClientError::Crypto(format!("failed to decrypt {}: {err}", path.display())))?
            }
            Err(err) => {
                return Err(ClientError::Crypto(format!(
                    "{} is not a valid private key: {err}",
                    path.display()
                )));
            }
        };
        Ok(AuthMethod::Identity(LoadedIdentity {
            path,
            key: Arc::new(key),
        }))
    })
    .await?
}

pub fn password_auth(password: SecretString) -> AuthMethod {
    AuthMethod::Password(password)
}

/// Password auth that prompts on the terminal only once it is attempted.
pub fn password_prompt_auth(prompt: impl Into<String>) -> AuthMethod {
    password_prompt_auth_with(prompt, TerminalPrompt)
}

pub fn password_prompt_auth_with(prompt: impl Into<String>, io: impl PromptIo + 'static) -> AuthMethod {
    AuthMethod::PasswordPrompt {
        prompt: prompt.into(),
        io: InteractivePrompt::new(io),
    }
}

/// Try `methods` in order; the first full success wins.
pub(crate) async fn authenticate<H>(session: &mut SessionHandle<H>, username: &str, methods: &mut [AuthMethod]) -> Result<()>
where
    H: client::Handler + Send,
{
    if methods.is_empty() {
        return Err(ClientError::Transport("no authentication methods available".to_string()));
    }

    let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for method in methods.iter_mut() {
        let label = method.label();
        match method.attempt(session, username, rsa_hash_hint).await {
            Ok(AuthResult::Success) => {
                info!(method = label, "authentication succeeded");
                return Ok(());
            }
            Ok(AuthResult::Failure { .. }) => {
                warn!(method = label, "authentication rejected by server");
            }
            Err(err) => {
                warn!(method = label, error = %err, "authentication attempt failed");
            }
        }
    }

    Err(ClientError::Transport(format!(
        "all authentication methods were rejected for {username}"
    )))
}

#[cfg(unix)]
async fn authenticate_via_agent<H>(
    session: &mut SessionHandle<H>,
    username: &str,
    signer: &mut AgentSigner,
    rsa_hint: Option<HashAlg>,
) -> Result<AuthResult>
where
    H: client::Handler + Send,
{
    let identities = signer
        .client
        .request_identities()
        .await
        .map_err(|e| ClientError::AgentUnavailable(format!("failed to list identities from SSH agent: {e}")))?;
    if identities.is_empty() {
        return Err(ClientError::AuthFailed("SSH agent has no loaded keys".to_string()));
    }

    debug!(count = identities.len(), "attempting agent-based authentication");

    for key in identities {
        let hash_alg = match key.algorithm() {
            keys::Algorithm::Rsa { .. } => rsa_hint,
            _ => None,
        };
        match session
            .authenticate_publickey_with(username.to_string(), key, hash_alg, &mut signer.client)
            .await
        {
            Ok(result) if result.success() => return Ok(result),
            Ok(_) => continue,
            Err(err) => {
                warn!(error = ?err, "agent authentication attempt failed");
            }
        }
    }

    Ok(AuthResult::Failure {
        remaining_methods: MethodSet::empty(),
        partial_success: false,
    })
}

#[cfg(not(unix))]
async fn authenticate_via_agent<H>(
    _session: &mut SessionHandle<H>,
    _username: &str,
    _signer: &mut AgentSigner,
    _rsa_hint: Option<HashAlg>,
) -> Result<AuthResult>
where
    H: client::Handler + Send,
{
    Err(ClientError::AgentUnavailable("agent authentication is not supported on this platform".to_string()))
}

async fn authenticate_keyboard_interactive<H>(session: &mut SessionHandle<H>, username: &str, prompt: &InteractivePrompt) -> Result<AuthResult>
where
    H: client::Handler + Send,
{
    let mut response = session
        .authenticate_keyboard_interactive_start(username.to_string(), Option::<String>::None)
        .await?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => {
                return Ok(AuthResult::Success);
            }
            KeyboardInteractiveAuthResponse::Failure {
                remaining_methods,
                partial_success,
            } => {
                return Ok(AuthResult::Failure {
                    remaining_methods,
                    partial_success,
                });
            }
            KeyboardInteractiveAuthResponse::InfoRequest {
                name,
                instructions,
                prompts,
            } => {
                debug!(challenge = %name, prompts = prompts.len(), "keyboard-interactive challenge");
                let questions = prompts
                    .into_iter()
                    .map(|p| PromptQuestion::new(p.prompt, p.echo))
                    .collect();
                let answers = prompt.respond(username, &instructions, questions).await?;
                response = session.authenticate_keyboard_interactive_respond(answers).await?;
            }
        }
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
