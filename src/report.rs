//! Execution reports emitted by the matching engine.
//!
//! One report covers one contiguous slice of a taker order's
//! processing: either a whole cleared price bucket, the partial
//! consumption of the final bucket, or a terminal cancellation. Each
//! report carries post-fill snapshots and a per-order signed quantity
//! delta map that must sum to exactly zero.

use rustc_hash::FxHashMap;

use crate::order::Order;

/// Post-fill view of one matching pass.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    /// Taker snapshot as of the end of this report's fills
    pub taker_order: Order,
    /// Post-fill snapshots of every maker touched, oldest first
    pub maker_orders: Vec<Order>,
    /// Signed quantity delta per order ID: `left_before - left_after`.
    /// Makers give up quantity with their own sign, the taker absorbs
    /// the mirror image, so the values always sum to zero.
    pub matched_size_by_order_id: FxHashMap<u64, i64>,
}

impl ExecutionReport {
    /// Start a report for the given taker snapshot.
    pub fn new(taker_order: Order) -> Self {
        Self {
            taker_order,
            maker_orders: Vec::new(),
            matched_size_by_order_id: FxHashMap::default(),
        }
    }

    /// A cancellation report: no fills, just the terminal snapshot.
    pub fn cancelled(taker_order: Order) -> Self {
        Self::new(taker_order)
    }

    /// Record a fill delta against an order ID.
    #[inline]
    pub fn record(&mut self, order_id: u64, delta: i64) {
        *self.matched_size_by_order_id.entry(order_id).or_insert(0) += delta;
    }

    /// Total executed quantity magnitude in this report.
    pub fn executed_qty(&self) -> i64 {
        self.matched_size_by_order_id
            .values()
            .filter(|d| **d > 0)
            .sum()
    }

    /// The zero-sum invariant: taker and maker deltas cancel exactly.
    /// A violation is a programming error in the fill accounting.
    pub fn is_zero_sum(&self) -> bool {
        self.matched_size_by_order_id.values().sum::<i64>() == 0
    }
}
