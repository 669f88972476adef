pub mod client_cli;

/// Install the global subscriber. `RUST_LOG` wins; otherwise each `-v` raises
/// the default level from `info`.
pub fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}
