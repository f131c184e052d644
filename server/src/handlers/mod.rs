//! Handlers for acquired traffic

pub mod knock;

pub use knock::handle_knock;

use crate::capture::Knock;
use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use protocol::KnockEngine;
use std::future::Future;
use tokio::sync::mpsc;

/// Feed knocks to the engine one at a time until `shutdown` resolves
///
/// `shutdown` is created once by the caller and polled across iterations, so
/// a signal arriving while a knock is being handled is not lost.
pub async fn serve<F>(
    knock_rx: &mut mpsc::Receiver<Knock>,
    engine: &KnockEngine,
    logging: &LoggingConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            knock = knock_rx.recv() => match knock {
                Some(knock) => {
                    handle_knock(knock, engine, logging);
                }
                None => anyhow::bail!("All capture threads stopped"),
            },
            signal = &mut shutdown => {
                signal.context("Failed to listen for shutdown signal")?;
                return Ok(());
            }
        }
    }
}
