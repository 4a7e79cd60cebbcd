//! Append-only CSV trade log.
//!
//! One file per engine run, named `{timestamp}-{symbol}-{venue}-Trades.csv`,
//! with a single `####` marker line followed by one row per fill. Writes run
//! on a dedicated task fed by a channel so the fill path never blocks on
//! disk; write failures are logged and the log simply lags.

use crate::broker::types::{Fill, OrderRecord};
use chrono::{SecondsFormat, Utc};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// One CSV row: asset, orderId, side, size, orderType, submittedTime,
/// filledTime, fillPrice, fee, epochMillis.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub asset: String,
    pub order_id: String,
    pub side: String,
    pub size: String,
    pub order_type: String,
    pub submitted_time: String,
    pub filled_time: String,
    pub fill_price: String,
    pub fee: String,
    pub epoch_millis: i64,
}

impl TradeRow {
    /// Build a row from a terminal order and its fill.
    pub fn from_fill(order: &OrderRecord, fill: &Fill) -> Self {
        let filled_time = order
            .filled_time
            .unwrap_or(fill.ts)
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        Self {
            asset: order.symbol.clone(),
            order_id: order.id.clone(),
            side: order.side.to_string(),
            size: fill.size.to_string(),
            order_type: order.order_type.to_string(),
            submitted_time: order
                .entry_time
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            filled_time,
            fill_price: fill.price.to_string(),
            fee: fill.fee.to_string(),
            epoch_millis: fill.ts.timestamp_millis(),
        }
    }

    fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{}",
            self.asset,
            self.order_id,
            self.side,
            self.size,
            self.order_type,
            self.submitted_time,
            self.filled_time,
            self.fill_price,
            self.fee,
            self.epoch_millis
        )
    }
}

/// Handle for submitting rows to the writer task.
#[derive(Clone)]
pub struct TradeLog {
    tx: mpsc::UnboundedSender<TradeRow>,
    path: PathBuf,
}

impl TradeLog {
    /// Open a fresh trade log and spawn its writer task.
    pub fn open(dir: &Path, symbol: &str, venue: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let path = dir.join(format!("{stamp}-{symbol}-{venue}-Trades.csv"));

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(File::from_std(file), rx, path.clone()));

        info!(path = %path.display(), "Trade log opened");
        Ok(Self { tx, path })
    }

    /// Queue a fill row; returns immediately.
    pub fn record(&self, row: TradeRow) {
        if self.tx.send(row).is_err() {
            warn!(path = %self.path.display(), "Trade log writer is gone; dropping row");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn writer_task(mut file: File, mut rx: mpsc::UnboundedReceiver<TradeRow>, path: PathBuf) {
    if let Err(e) = file.write_all(b"####\n").await {
        error!(path = %path.display(), error = %e, "Failed to write trade log marker");
    }
    while let Some(row) = rx.recv().await {
        let line = format!("{}\n", row.to_csv_line());
        if let Err(e) = file.write_all(line.as_bytes()).await {
            error!(path = %path.display(), error = %e, "Failed to append trade row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{Liquidity, OrderTicket, Side};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn fill_pair() -> (OrderRecord, Fill) {
        let ticket = OrderTicket::limit("BTC-USD", Side::Buy, dec!(0.5), dec!(50000));
        let mut order = OrderRecord::from_ticket("PB-7".into(), &ticket, Utc::now());
        order.mark_open().unwrap();
        let ts = Utc::now();
        order.mark_filled(ts).unwrap();
        let fill = Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.requested_size,
            price: dec!(50000),
            fee: dec!(1.25),
            liquidity: Liquidity::Maker,
            ts,
        };
        (order, fill)
    }

    #[test]
    fn test_row_schema() {
        let (order, fill) = fill_pair();
        let row = TradeRow::from_fill(&order, &fill);
        let line = row.to_csv_line();
        let fields: Vec<&str> = line.split(',').collect();

        assert_eq!(fields.len(), 10);
        assert_eq!(fields[0], "BTC-USD");
        assert_eq!(fields[1], "PB-7");
        assert_eq!(fields[2], "BUY");
        assert_eq!(fields[4], "LIMIT");
        assert_eq!(fields[7], "50000");
        assert_eq!(fields[8], "1.25");
    }

    #[tokio::test]
    async fn test_log_file_has_marker_and_rows() {
        let dir = std::env::temp_dir().join(format!("paper-broker-test-{}", std::process::id()));
        let log = TradeLog::open(&dir, "BTC-USD", "dydx").unwrap();

        let (order, fill) = fill_pair();
        log.record(TradeRow::from_fill(&order, &fill));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("####"));
        assert!(lines.next().unwrap().starts_with("BTC-USD,PB-7,BUY"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
