pub mod crypto;
pub mod error;
pub mod forwarding;
pub mod session;

pub use error::{SshCoreError, SshResult};
