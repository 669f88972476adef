use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Invalid port number
    #[error("port must be a valid number between 0-65535: {0}")]
    InvalidPort(String),

    /// Invalid forwarding specification
    #[error("invalid {kind} forward spec: {message}")]
    InvalidForwardSpec { kind: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Local listener could not be bound
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Listener-level accept failure; the listener is no longer usable
    #[error("listener accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The session refused or failed to open a forwarding channel
    #[error("failed to open channel to {target}: {reason}")]
    ChannelOpen { target: String, reason: String },

    /// A relay direction failed with a genuine I/O error
    #[error("relay {direction} failed: {source}")]
    RelayIo {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Create an invalid forward spec error
    pub fn invalid_forward(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidForwardSpec {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a channel open error for `target`
    pub fn channel_open(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ChannelOpen {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}
