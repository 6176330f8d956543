//! Watch List Client
//!
//! Connects to a market watch server, optionally proposes a new watch list,
//! and prints every sync and error it receives. The session reconnects on
//! its own when the server goes away.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin watch-client -- ws://localhost:8090 AAPL,MSFT,TSLA
//! ```

use std::sync::Arc;

use anyhow::Context;
use market_watch::domain::symbol::split_symbol_list;
use market_watch::{
    Session, SessionEvent, SyncMessage, WatchConfig, WsConnector, init_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry_guard = init_telemetry();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let mut args = std::env::args().skip(1);
    let address = args
        .next()
        .context("usage: watch-client <ws-url> [SYMBOL,...]")?;
    let proposal = args.next().map(|list| split_symbol_list(&list));

    let config = WatchConfig::from_env().context("invalid configuration")?;
    let mut session = Session::connect(Arc::new(WsConnector::new()), address.as_str(), &config.session)
        .await
        .with_context(|| format!("failed to connect to {address}"))?;

    if let Some(symbols) = proposal {
        session
            .send(&SyncMessage::new(symbols).into())
            .context("failed to send watch list")?;
    }

    loop {
        let event = tokio::select! {
            event = session.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing session");
                let _ = session.destroy();
                break;
            }
        };

        match event {
            Some(SessionEvent::Sync(sync)) => println!("watching: {}", sync.symbols.join(", ")),
            Some(SessionEvent::Error(error)) => println!("rejected: {}", error.reason),
            Some(SessionEvent::Disconnect) => tracing::warn!("Disconnected from {address}"),
            Some(SessionEvent::Reconnect) => tracing::info!("Reconnected to {address}"),
            Some(SessionEvent::Unhandled(message)) => {
                tracing::debug!(kind = message.kind().as_str(), "Unhandled message");
            }
            Some(SessionEvent::Finish(cause)) => {
                if let Some(e) = cause {
                    anyhow::bail!("session ended: {e}");
                }
                break;
            }
            None => break,
        }
    }

    Ok(())
}
