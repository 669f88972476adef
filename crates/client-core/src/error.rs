use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// The SSH agent could not be reached; only that auth method is lost
    #[error("SSH agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Reading an interactive answer failed; aborts that auth attempt
    #[error("failed to read interactive input: {0}")]
    PromptRead(#[source] std::io::Error),

    /// The local principal could not be determined
    #[error("unable to determine local user: {0}")]
    IdentityResolution(String),

    /// Connecting, handshaking or authenticating to the remote host failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Host key verification failed
    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Forwarding error from ssh-core
    #[error(transparent)]
    Core(#[from] ssh_core::SshCoreError),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

impl From<tokio::task::JoinError> for ClientError {
    fn from(err: tokio::task::JoinError) -> Self {
        ClientError::Other(format!("task join error: {err}"))
    }
}
