//! Local TCP forwarding over an authenticated SSH session.
//!
//! [`TunnelManager`] owns the local listener and hands every accepted
//! connection, together with a freshly opened `direct-tcpip` channel, to a
//! [`RelayPair`]. The session is only reached through [`ForwardSession`], so
//! the whole module can be driven by an in-memory session in tests.

mod parsing;
mod relay;
mod traits;
mod tunnel;

// Re-export public API
pub use parsing::{parse_host_port, parse_local_tcp};
pub use relay::{Direction, RelayEnd, RelayOptions, RelayPair, RelaySummary};
pub use traits::{ForwardSession, ForwardStream, ForwardStreamIo};
pub use tunnel::{TunnelManager, TunnelSpec};
