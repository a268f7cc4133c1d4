//! Book snapshots: bounded-replay-time persistence of a quiesced kernel.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<description>/<unix_ts>/ask/<price>.list   bincode Vec<Order>, FIFO order
//! <root>/<description>/<unix_ts>/bid/<price>.list
//! <root>/<description>/<unix_ts>/finished.log       completion sentinel (last order)
//! ```
//!
//! The sentinel is written last; a directory without it is an aborted
//! snapshot and is never restored. Restore reads price files with one
//! scoped task per file and rebuilds bucket FIFO order, per-level
//! totals, and the cached best prices.

use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use log::{info, warn};

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::order::{Order, Side};
use crate::report::ExecutionReport;

const SENTINEL_FILE: &str = "finished.log";

fn side_dir(side: Side) -> &'static str {
    match side {
        Side::Ask => "ask",
        Side::Bid => "bid",
    }
}

/// Serialize every price bucket of a quiesced kernel.
///
/// The caller must guarantee quiescence (the `&Kernel` borrow keeps
/// the single-writer acceptor out for the duration). `last_order` is
/// the most recently processed order and becomes the sentinel payload.
pub fn snapshot(
    kernel: &Kernel,
    root: &Path,
    description: &str,
    last_order: &Order,
) -> Result<PathBuf> {
    let dir = root
        .join(description)
        .join(chrono::Utc::now().timestamp().to_string());

    for (side, book_side) in [
        (Side::Ask, kernel.ask_side()),
        (Side::Bid, kernel.bid_side()),
    ] {
        let side_path = dir.join(side_dir(side));
        fs::create_dir_all(&side_path)?;
        for bucket in book_side.buckets() {
            let orders: Vec<Order> = bucket.iter().copied().collect();
            let encoded = bincode::serialize(&orders)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            fs::write(side_path.join(format!("{}.list", bucket.price)), encoded)?;
        }
    }

    // Sentinel last: its presence marks the snapshot as restorable.
    let sentinel = bincode::serialize(last_order)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(dir.join(SENTINEL_FILE), sentinel)?;

    info!(
        "snapshot of {} orders written to {}",
        kernel.order_count(),
        dir.display()
    );
    Ok(dir)
}

/// Restore the newest complete snapshot under `<root>/<description>`.
///
/// Returns the rebuilt kernel (publishing reports to `report_tx`) and
/// the sentinel's last-order metadata. A single unreadable price file
/// is logged and skipped; a missing sentinel fails the whole restore.
pub fn restore(
    root: &Path,
    description: &str,
    report_tx: Sender<ExecutionReport>,
) -> Result<(Kernel, Order)> {
    let base = root.join(description);
    let dir = newest_complete_snapshot(&base)
        .ok_or_else(|| KernelError::NoValidSnapshot(base.display().to_string()))?;

    let sentinel_bytes = fs::read(dir.join(SENTINEL_FILE))?;
    let last_order: Order = bincode::deserialize(&sentinel_bytes)
        .map_err(|_| KernelError::NoValidSnapshot(dir.display().to_string()))?;

    let mut kernel = Kernel::new(report_tx);
    for side in [Side::Ask, Side::Bid] {
        for orders in read_side_buckets(&dir.join(side_dir(side))) {
            for order in orders {
                kernel.insert_resting(order);
            }
        }
    }

    info!(
        "restored {} orders from {}",
        kernel.order_count(),
        dir.display()
    );
    Ok((kernel, last_order))
}

/// Newest timestamp directory that carries the completion sentinel.
fn newest_complete_snapshot(base: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(base).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let ts: i64 = e.file_name().to_str()?.parse().ok()?;
            let path = e.path();
            path.join(SENTINEL_FILE).exists().then_some((ts, path))
        })
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, path)| path)
}

/// Read every `<price>.list` file in a side directory, one scoped task
/// per file. Unreadable files are skipped with a warning; price-level
/// files are independent of each other.
fn read_side_buckets(side_path: &Path) -> Vec<Vec<Order>> {
    let files: Vec<PathBuf> = match fs::read_dir(side_path) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => return Vec::new(),
    };

    std::thread::scope(|scope| {
        let handles: Vec<_> = files
            .iter()
            .map(|path| scope.spawn(move || read_bucket_file(path)))
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok().flatten())
            .collect()
    })
}

fn read_bucket_file(path: &Path) -> Option<Vec<Order>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!("skipping unreadable bucket file {}: {e}", path.display());
            return None;
        }
    };
    match bincode::deserialize(&bytes) {
        Ok(orders) => Some(orders),
        Err(e) => {
            warn!("skipping undecodable bucket file {}: {e}", path.display());
            None
        }
    }
}
