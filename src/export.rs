//! Flat CSV export of settled trades
//!
//! One row per [`Trade`], with the entry feature snapshot flattened into
//! columns (empty when missing) and a `label_win` column for dataset use.

use std::io::Write;

use crate::{backtest::Trade, Error, Result};

/// Column order of [`write_trades_csv`]
pub const TRADE_COLUMNS: [&str; 27] = [
    "pattern",
    "direction",
    "entry_index",
    "exit_index",
    "entry_time",
    "exit_time",
    "entry_price",
    "exit_price",
    "stop_loss",
    "take_profit",
    "position_size",
    "pnl_amount",
    "pnl_percent",
    "exit_reason",
    "capital_after",
    "risk_reward",
    "rsi",
    "ema_fast",
    "ema_medium",
    "ema_slow",
    "atr",
    "atr_percentile",
    "volume_ratio",
    "body",
    "upper_wick",
    "lower_wick",
    "label_win",
];

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

fn record(t: &Trade) -> [String; 27] {
    let f = t.features;
    [
        t.kind.map(|k| k.as_str().to_string()).unwrap_or_default(),
        t.side.as_str().to_string(),
        t.entry_index.to_string(),
        t.exit_index.to_string(),
        t.entry_time.to_string(),
        t.exit_time.to_string(),
        format!("{:.6}", t.entry_price),
        format!("{:.6}", t.exit_price),
        format!("{:.6}", t.stop_loss),
        format!("{:.6}", t.take_profit),
        format!("{:.2}", t.position_size),
        format!("{:.2}", t.pnl_amount),
        format!("{:.4}", t.pnl_percent),
        t.exit_reason.as_str().to_string(),
        format!("{:.2}", t.capital_after),
        format!("{:.4}", t.risk_reward),
        opt(f.and_then(|f| f.rsi)),
        opt(f.and_then(|f| f.ema_fast)),
        opt(f.and_then(|f| f.ema_medium)),
        opt(f.and_then(|f| f.ema_slow)),
        opt(f.and_then(|f| f.atr)),
        opt(f.and_then(|f| f.atr_percentile)),
        opt(f.and_then(|f| f.volume_ratio)),
        opt(f.map(|f| f.body)),
        opt(f.map(|f| f.upper_wick)),
        opt(f.map(|f| f.lower_wick)),
        u8::from(t.is_win()).to_string(),
    ]
}

/// Write the header and one row per trade to `writer`.
pub fn write_trades_csv<W: Write>(writer: W, trades: &[Trade]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(TRADE_COLUMNS)?;
    for t in trades {
        wtr.write_record(record(t))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Trades as a CSV string.
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut buf = Vec::new();
    write_trades_csv(&mut buf, trades)?;
    String::from_utf8(buf).map_err(|_| Error::InvalidValue("CSV output is not UTF-8"))
}
