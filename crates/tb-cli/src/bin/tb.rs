use anyhow::Result;
use client_core::run_client;
use tb_cli::{client_cli::ClientArgs, init_tracing};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, verbosity) = ClientArgs::parse_config()?;
    init_tracing(verbosity);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                on_signal.cancel();
            }
            Err(err) => warn!(?err, "failed to listen for Ctrl-C"),
        }
    });

    run_client(config, cancel).await?;
    Ok(())
}
