//! Periodic status snapshot and balance checkpoint.
//!
//! A single ticker-driven task wakes once per second and, in sequence,
//! publishes an account-equity update, recomputes the status snapshot, and
//! writes the balance checkpoint file. Each sub-step's failure is isolated:
//! one failing step never skips the others.

use crate::broker::engine::PaperBroker;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fixed snapshot cadence.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Plain-text balance checkpoint:
/// `{symbol}-{venue}-paperbroker-startingbalance.txt` holding one decimal.
#[derive(Debug, Clone)]
pub struct BalanceCheckpoint {
    path: PathBuf,
}

impl BalanceCheckpoint {
    pub fn new(dir: &Path, symbol: &str, venue: &str) -> Self {
        let path = dir.join(format!("{symbol}-{venue}-paperbroker-startingbalance.txt"));
        Self { path }
    }

    /// Read the persisted balance, if any. Malformed contents are treated as
    /// absent and logged.
    pub fn load(&self) -> Option<Decimal> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };

        match Decimal::from_str(raw.trim()) {
            Ok(balance) => {
                info!(path = %self.path.display(), %balance, "Resumed balance from checkpoint");
                Some(balance)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable balance checkpoint, ignoring");
                None
            }
        }
    }

    /// Overwrite the checkpoint with the current balance.
    pub fn store(&self, balance: Decimal) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, balance.to_string())
    }

    /// [`store`](Self::store) moved off the runtime's worker threads.
    pub async fn store_async(&self, balance: Decimal) -> std::io::Result<()> {
        let checkpoint = self.clone();
        tokio::task::spawn_blocking(move || checkpoint.store(balance))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Drives the 1-second snapshot tick until the shutdown signal fires.
pub struct SnapshotScheduler;

impl SnapshotScheduler {
    pub fn spawn(broker: PaperBroker, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        broker.snapshot_tick().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Snapshot scheduler stopping");
                            break;
                        }
                    }
                }
            }

            // One final checkpoint on the way out.
            if let Err(e) = broker.write_checkpoint().await {
                error!(error = %e, "Final balance checkpoint failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("paper-broker-ckpt-{tag}-{}", std::process::id()))
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = temp_dir("roundtrip");
        let ckpt = BalanceCheckpoint::new(&dir, "BTC-USD", "dydx");

        assert!(ckpt.load().is_none());
        ckpt.store(dec!(10432.55)).unwrap();
        assert_eq!(ckpt.load(), Some(dec!(10432.55)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_checkpoint_filename() {
        let ckpt = BalanceCheckpoint::new(Path::new("data"), "ETH-USD", "paradex");
        assert!(ckpt
            .path()
            .ends_with("ETH-USD-paradex-paperbroker-startingbalance.txt"));
    }

    #[tokio::test]
    async fn test_store_async_roundtrip() {
        let dir = temp_dir("async");
        let ckpt = BalanceCheckpoint::new(&dir, "BTC-USD", "dydx");

        ckpt.store_async(dec!(9876.5)).await.unwrap();
        assert_eq!(ckpt.load(), Some(dec!(9876.5)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_checkpoint_ignored() {
        let dir = temp_dir("malformed");
        std::fs::create_dir_all(&dir).unwrap();
        let ckpt = BalanceCheckpoint::new(&dir, "BTC-USD", "dydx");
        std::fs::write(ckpt.path(), "not a number").unwrap();

        assert!(ckpt.load().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
