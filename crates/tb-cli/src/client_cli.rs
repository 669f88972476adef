use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use client_core::{ClientConfig, HostKeyPolicy, TransportOptions};
use secrecy::SecretString;
use ssh_core::forwarding::{RelayOptions, parse_host_port, parse_local_tcp};

/// Environment variable carrying a password for non-interactive use.
pub const PASSWORD_ENV: &str = "TB_PASSWORD";

pub const DEFAULT_LOCAL_FORWARD: &str = "localhost:1600:localhost:1500";

#[derive(Debug, Parser)]
#[command(name = "tb", about = "Forward a local TCP port to a remote endpoint over SSH", version)]
pub struct ClientArgs {
    /// Target host; supports optional [user@]host[:port] syntax
    #[arg(value_name = "HOST")]
    target: String,
    /// Local forward in [bind_address:]port:host:hostport form
    #[arg(
        short = 'L',
        long = "local-forward",
        value_name = "SPEC",
        default_value = DEFAULT_LOCAL_FORWARD,
        help_heading = "Tunnel Options"
    )]
    local_forward: String,
    /// Seconds a half-closed connection may keep relaying the other direction
    #[arg(long = "half-close-grace", value_name = "SECONDS", default_value_t = 5, help_heading = "Tunnel Options")]
    half_close_grace: u64,
    /// Override remote username (defaults to user@host or the local user)
    #[arg(short = 'l', long = "username", value_name = "USER", help_heading = "Client Options")]
    username: Option<String>,
    /// Override the parsed port (defaults to 22 or the :port suffix)
    #[arg(short = 'P', long, value_name = "PORT", help_heading = "Client Options")]
    port: Option<u16>,
    /// Send keepalive probes every N seconds; 0 disables them
    #[arg(long = "keepalive-interval", value_name = "SECONDS", default_value_t = 30, help_heading = "Client Options")]
    keepalive_interval: u64,
    /// Disconnect after this many unanswered keepalives
    #[arg(long = "keepalive-max", value_name = "COUNT", default_value_t = 3, help_heading = "Client Options")]
    keepalive_max: usize,
    /// Allow legacy key exchange, cipher and MAC suites
    #[arg(long = "insecure-crypto", action = ArgAction::SetTrue, help_heading = "Client Options")]
    insecure_crypto: bool,
    /// Raise log verbosity (repeatable); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, help_heading = "Client Options")]
    verbose: u8,
    /// Private key to use for public-key authentication (repeatable)
    #[arg(long = "identity", value_name = "KEY", action = ArgAction::Append, help_heading = "Auth Options")]
    identities: Vec<PathBuf>,
    /// Skip authentication through the agent named by SSH_AUTH_SOCK
    #[arg(long = "no-agent", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    no_agent: bool,
    /// Disable keyboard-interactive authentication
    #[arg(long = "no-keyboard-interactive", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    no_keyboard_interactive: bool,
    /// Try password authentication, prompting unless TB_PASSWORD is set
    #[arg(long = "password-auth", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    password_auth: bool,
    /// known_hosts file used to verify the server (default ~/.ssh/known_hosts)
    #[arg(long = "known-hosts", value_name = "PATH", help_heading = "Host Key Options")]
    known_hosts: Option<PathBuf>,
    /// Trust only this SHA256 host key fingerprint (repeatable)
    #[arg(
        long = "pin-hostkey",
        value_name = "SHA256:...",
        action = ArgAction::Append,
        conflicts_with = "known_hosts",
        help_heading = "Host Key Options"
    )]
    pinned_hostkeys: Vec<String>,
    /// Accept any host key without verification (unsafe)
    #[arg(
        long = "insecure-accept-any-hostkey",
        action = ArgAction::SetTrue,
        conflicts_with_all = ["known_hosts", "pinned_hostkeys"],
        help_heading = "Host Key Options"
    )]
    accept_any_hostkey: bool,
}

impl ClientArgs {
    pub fn parse_config() -> Result<(ClientConfig, u8)> {
        let args = ClientArgs::parse();
        let verbosity = args.verbosity();
        Ok((ClientConfig::try_from(args)?, verbosity))
    }

    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

impl TryFrom<ClientArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: ClientArgs) -> Result<Self> {
        let ClientArgs {
            target,
            local_forward,
            half_close_grace,
            username,
            port,
            keepalive_interval,
            keepalive_max,
            insecure_crypto,
            verbose: _,
            identities,
            no_agent,
            no_keyboard_interactive,
            password_auth,
            known_hosts,
            pinned_hostkeys,
            accept_any_hostkey,
        } = args;

        let target = parse_target(&target)?;
        let port = port.unwrap_or(target.port);
        let username = username.or(target.inferred_username).filter(|u| !u.is_empty());

        let tunnel = parse_local_tcp(&local_forward).with_context(|| format!("invalid --local-forward `{local_forward}`"))?;
        let host_key_policy = resolve_host_key_policy(known_hosts, pinned_hostkeys, accept_any_hostkey)?;
        let (password, prompt_password) = resolve_password_source(password_auth);

        if keepalive_max == 0 {
            bail!("--keepalive-max must be greater than zero");
        }
        let transport = TransportOptions {
            keepalive_interval: (keepalive_interval > 0).then(|| Duration::from_secs(keepalive_interval)),
            keepalive_max,
            inactivity_timeout: None,
            legacy_crypto: insecure_crypto,
        };
        let relay = RelayOptions {
            half_close_grace: Duration::from_secs(half_close_grace),
            ..RelayOptions::default()
        };

        Ok(ClientConfig {
            host: target.host,
            port,
            username,
            tunnel,
            identities,
            agent_auth: !no_agent,
            keyboard_interactive: !no_keyboard_interactive,
            password,
            prompt_password,
            host_key_policy,
            transport,
            relay,
        })
    }
}

struct TargetParts {
    host: String,
    port: u16,
    inferred_username: Option<String>,
}

fn parse_target(input: &str) -> Result<TargetParts> {
    let (inferred_username, host_part) = match input.rsplit_once('@') {
        Some((user, host)) => (Some(user.to_string()), host),
        None => (None, input),
    };
    let (host, port) = parse_host_port(host_part, 22).with_context(|| format!("invalid target `{input}`"))?;
    Ok(TargetParts {
        host,
        port,
        inferred_username,
    })
}

fn resolve_host_key_policy(known_hosts: Option<PathBuf>, pins: Vec<String>, accept_any: bool) -> Result<HostKeyPolicy> {
    if accept_any {
        return Ok(HostKeyPolicy::AcceptAny);
    }
    if !pins.is_empty() {
        if let Some(bad) = pins.iter().find(|pin| !pin.starts_with("SHA256:")) {
            bail!("--pin-hostkey expects a SHA256:... fingerprint, got `{bad}`");
        }
        return Ok(HostKeyPolicy::Pinned(pins));
    }
    Ok(HostKeyPolicy::KnownHosts { path: known_hosts })
}

/// A password from the environment enables password auth on its own;
/// `--password-auth` without one defers to a prompt.
fn resolve_password_source(password_auth: bool) -> (Option<SecretString>, bool) {
    match env::var(PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => (Some(SecretString::from(value)), false),
        _ => (None, password_auth),
    }
}
