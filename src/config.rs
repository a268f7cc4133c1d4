//! Kernel settings.
//!
//! Plain key/value configuration with no dynamic reload. Everything has
//! a sensible default so a `Settings::default()` kernel works out of
//! the box; a TOML file can override any subset of fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory the append-only order log files are written to.
    pub order_log_dir: PathBuf,
    /// Root directory for order book snapshots.
    pub snapshot_dir: PathBuf,
    /// Whether accepted orders are persisted to the order log before
    /// they are exposed to the book. Disabled for throw-away kernels
    /// (tests, redo replays of an existing log).
    pub save_order_log: bool,
    /// How long the redo tailer sleeps after catching up with the log.
    pub redo_snapshot_interval_ms: u64,
    /// Slippage allowance applied to the best opposite price when a
    /// market order is converted into a marketable limit order.
    pub market_order_offset: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            order_log_dir: PathBuf::from("./kernel_order_log"),
            snapshot_dir: PathBuf::from("./orderbook_snapshot"),
            save_order_log: true,
            redo_snapshot_interval_ms: 1_000,
            market_order_offset: 1.2,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&raw).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e)
        })?;
        Ok(settings)
    }

    /// Redo tailer sleep interval as a `Duration`.
    #[inline]
    pub fn redo_snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.redo_snapshot_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.save_order_log);
        assert_eq!(s.redo_snapshot_interval(), Duration::from_millis(1000));
        assert!(s.market_order_offset > 1.0);
    }

    #[test]
    fn test_partial_toml_override() {
        let s: Settings = toml::from_str(
            r#"
            save_order_log = false
            market_order_offset = 1.05
            "#,
        )
        .unwrap();
        assert!(!s.save_order_log);
        assert_eq!(s.market_order_offset, 1.05);
        // Untouched fields keep their defaults
        assert_eq!(s.redo_snapshot_interval_ms, 1_000);
    }
}
