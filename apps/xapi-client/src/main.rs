//! xAPI Client Binary
//!
//! Connects to the xAPI trading service, logs in, subscribes to trade and
//! tick-price pushes, and logs everything received until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p xapi-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `XAPI_USER_ID`: account number
//! - `XAPI_PASSWORD`: account password
//!
//! ## Optional
//! - `XAPI_HOST`: server host (default: xapi.xtb.com)
//! - `XAPI_REQUEST_PORT`: command channel port (default: 5124)
//! - `XAPI_STREAM_PORT`: streaming channel port (default: 5125)
//! - `XAPI_TLS`: set to "false" to disable TLS (default: true)
//! - `XAPI_APP_NAME`: application name sent at login
//! - `XAPI_SYMBOL`: symbol for the tick subscription (default: EURUSD)
//! - `RUST_LOG`: log level (default: info)

use anyhow::Context;
use tokio::signal;
use xapi_client::{ClientConfig, CommandClient, Directive, HandlerTable, StreamClient, telemetry};

/// Default symbol for the tick-price subscription.
const DEFAULT_SYMBOL: &str = "EURUSD";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();
    telemetry::init();

    let config = ClientConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let mut client = CommandClient::connect(&config.request_endpoint(), &config.transport)
        .await
        .context("connecting command channel")?;

    let session = client
        .login(&config.credentials)
        .await
        .context("logging in")?;

    let mut stream = StreamClient::connect(
        &config.stream_endpoint(),
        &config.transport,
        session,
        example_handlers(),
    )
    .await
    .context("connecting streaming channel")?;

    let symbol = std::env::var("XAPI_SYMBOL").unwrap_or_else(|_| DEFAULT_SYMBOL.to_string());

    stream.subscribe(Directive::new("getTrades")).await?;
    stream
        .subscribe(Directive::new("getTickPrices").with_param("symbol", symbol.clone()))
        .await?;

    tracing::info!(%symbol, "streaming, press Ctrl+C to stop");
    await_shutdown().await;

    stream.disconnect().await;
    client.disconnect().await;

    tracing::info!("client stopped");
    Ok(())
}

/// Handlers for the push kinds the service emits; each one just logs the
/// full message.
fn example_handlers() -> HandlerTable {
    HandlerTable::new()
        .on("tickPrices", |msg| tracing::info!(%msg, "tick"))
        .on("trade", |msg| tracing::info!(%msg, "trade"))
        .on("balance", |msg| tracing::info!(%msg, "balance"))
        .on("tradeStatus", |msg| tracing::info!(%msg, "trade status"))
        .on("profit", |msg| tracing::info!(%msg, "profit"))
        .on("news", |msg| tracing::info!(%msg, "news"))
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        host = %config.host,
        request_port = config.request_port,
        stream_port = config.stream_port,
        tls = config.tls,
        max_connect_attempts = config.transport.max_connect_attempts,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
