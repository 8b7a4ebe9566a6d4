// lan-remote -- keeps an Icom Wi-Fi remote session alive from the command line.
//
// Usage:
//   lan-remote -a 192.168.1.50
//   lan-remote -a ic-705.local -p 50001 --device-name IC-705 -v
//   lan-remote -a 192.168.1.50 --username-hex 2b3f555c --password-hex 2b3f555c3f257758
//
// Credentials are given already obfuscated, as hex. Without them the
// factory account is used. SIGINT/SIGTERM disconnect cleanly.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use riglib_icom_lan::config::DEFAULT_CONTROL_PORT;
use riglib_icom_lan::{Credentials, IcomLanBuilder, IcomLanSession};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Icom LAN remote client -- opens and maintains a control session.
#[derive(Parser, Debug)]
#[command(name = "lan-remote", version, about)]
struct Cli {
    /// Device hostname or IP address.
    #[arg(short = 'a', long)]
    address: String,

    /// Device control port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_CONTROL_PORT)]
    port: u16,

    /// Local port to bind (defaults to the control port).
    #[arg(long)]
    local_port: Option<u16>,

    /// Obfuscated username, hex encoded.
    #[arg(long, value_parser = parse_hex, requires = "password_hex")]
    username_hex: Option<HexBytes>,

    /// Obfuscated password, hex encoded.
    #[arg(long, value_parser = parse_hex, requires = "username_hex")]
    password_hex: Option<HexBytes>,

    /// Device model name sent with the stream request.
    #[arg(long, default_value = "IC-705")]
    device_name: String,

    /// Give up if the session ID exchange takes longer than this many
    /// seconds. Retries forever when omitted.
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Raw bytes given on the command line as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

fn parse_hex(s: &str) -> std::result::Result<HexBytes, String> {
    hex::decode(s.trim())
        .map(HexBytes)
        .map_err(|e| e.to_string())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn build_session(cli: &Cli) -> Result<IcomLanBuilder> {
    let mut builder = IcomLanBuilder::new()
        .host(&cli.address)
        .port(cli.port)
        .device_name(&cli.device_name);

    if let Some(port) = cli.local_port {
        builder = builder.local_port(port);
    }

    match (&cli.username_hex, &cli.password_hex) {
        (Some(user), Some(pass)) => {
            let credentials =
                Credentials::from_encoded(&user.0, &pass.0).context("invalid credentials")?;
            builder = builder.credentials(credentials);
        }
        (None, None) => {}
        _ => bail!("--username-hex and --password-hex must be given together"),
    }

    if let Some(secs) = cli.handshake_timeout {
        builder = builder.handshake_timeout(Duration::from_secs(secs));
    }

    Ok(builder)
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run(session: IcomLanSession) -> Result<()> {
    let shutdown = session.shutdown_handle();
    let wait = session.wait();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => {
            result.context("session ended")?;
            Ok(())
        }
        _ = shutdown_signal() => {
            if let Err(e) = shutdown.disconnect().await {
                error!(error = %e, "disconnect failed");
            }
            let _ = wait.await;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let builder = build_session(&cli)?;
    info!(address = %cli.address, port = cli.port, "connecting");
    let session = builder.connect().await.context("cannot start session")?;

    if let Err(e) = run(session).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    info!("exiting");
    Ok(())
}
