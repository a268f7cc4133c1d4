//! Order book index: price buckets and side indices.
//!
//! Each side is an ordered map from price to a FIFO bucket of resting
//! orders, walked best-to-worst. The bid side stores negated prices as
//! its sort key so both sides iterate best-first in ascending key
//! order. The best price is cached on every side; an empty side
//! reports its sentinel (`i64::MAX` asks / `i64::MIN` bids).

use std::collections::{BTreeMap, VecDeque};

use crate::order::{Order, Side};

/// A FIFO queue of resting orders all sharing one price and side.
///
/// The oldest order sits at the front and is matched first; new
/// resting orders are appended at the back (price-time priority).
#[derive(Clone, Debug)]
pub struct PriceBucket {
    /// Price shared by every order in the bucket
    pub price: i64,
    /// Running sum of the constituent orders' `left`; carries the
    /// side's sign
    pub total_left: i64,
    orders: VecDeque<Order>,
}

impl PriceBucket {
    /// Create a bucket holding a single freshly rested order.
    pub fn new(order: Order) -> Self {
        let mut orders = VecDeque::new();
        let price = order.price;
        let total_left = order.left;
        orders.push_back(order);
        Self {
            price,
            total_left,
            orders,
        }
    }

    /// Append a resting order at the FIFO tail.
    pub fn push_back(&mut self, order: Order) {
        debug_assert_eq!(order.price, self.price);
        self.total_left += order.left;
        self.orders.push_back(order);
    }

    /// Oldest order (the next to match).
    #[inline]
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Oldest order, mutable (for partial fills in place).
    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut Order> {
        self.orders.front_mut()
    }

    /// Remove and return the oldest order. Does not touch
    /// `total_left`; matching already accounted for the fill.
    #[inline]
    pub fn pop_front(&mut self) -> Option<Order> {
        self.orders.pop_front()
    }

    /// Apply a signed delta to the running total after mutating an
    /// order's `left` in place.
    #[inline]
    pub fn adjust_total(&mut self, delta: i64) {
        self.total_left += delta;
    }

    /// Remove an order by ID (linear scan; buckets stay small).
    pub fn remove_by_id(&mut self, order_id: u64) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.order_id == order_id)?;
        let order = self.orders.remove(pos)?;
        self.total_left -= order.left;
        Some(order)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Iterate orders oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    /// Consume the bucket, yielding its orders oldest-first.
    pub fn into_orders(self) -> VecDeque<Order> {
        self.orders
    }
}

/// One side of the book: ordered price levels plus the cached best.
#[derive(Clone, Debug)]
pub struct BookSide {
    side: Side,
    levels: BTreeMap<i64, PriceBucket>,
    best: i64,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            best: side.empty_best_price(),
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Sort key: asks ascend by price, bids by negated price, so both
    /// sides iterate best-first.
    #[inline]
    fn key(&self, price: i64) -> i64 {
        match self.side {
            Side::Ask => price,
            Side::Bid => -price,
        }
    }

    /// Cached best price, or the side's sentinel when empty.
    #[inline]
    pub fn best_price(&self) -> i64 {
        self.best
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Number of price levels.
    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Number of resting orders across all levels.
    pub fn order_count(&self) -> usize {
        self.levels.values().map(PriceBucket::len).sum()
    }

    // ========================================================================
    // Structural mutation
    // ========================================================================

    /// Rest an order: append to its price bucket, creating the bucket
    /// on first insert at that price, then re-evaluate the cached best.
    pub fn insert_resting(&mut self, order: Order) {
        debug_assert_eq!(order.side(), self.side);
        let price = order.price;
        self.levels
            .entry(self.key(price))
            .and_modify(|bucket| bucket.push_back(order))
            .or_insert_with(|| PriceBucket::new(order));

        if self.best == self.side.empty_best_price() {
            self.best = price;
        } else {
            self.best = match self.side {
                Side::Ask => self.best.min(price),
                Side::Bid => self.best.max(price),
            };
        }
    }

    #[inline]
    pub fn get_bucket(&self, price: i64) -> Option<&PriceBucket> {
        self.levels.get(&self.key(price))
    }

    #[inline]
    pub fn get_bucket_mut(&mut self, price: i64) -> Option<&mut PriceBucket> {
        self.levels.get_mut(&self.key(price))
    }

    /// Best-priced bucket, if any.
    #[inline]
    pub fn first_bucket(&self) -> Option<&PriceBucket> {
        self.levels.values().next()
    }

    #[inline]
    pub fn first_bucket_mut(&mut self) -> Option<&mut PriceBucket> {
        self.levels.values_mut().next()
    }

    /// Detach the best-priced bucket wholesale (for a full clear).
    ///
    /// Deliberately leaves the cached best stale: the matching walk
    /// pops several buckets and re-establishes the cache once, via
    /// [`BookSide::refresh_best`], after all clearing work has joined.
    pub fn pop_first_bucket(&mut self) -> Option<PriceBucket> {
        self.levels.pop_first().map(|(_, bucket)| bucket)
    }

    /// Drop the bucket at `price`, fixing the cached best if that was
    /// the top of book.
    pub fn remove_bucket(&mut self, price: i64) -> Option<PriceBucket> {
        let bucket = self.levels.remove(&self.key(price))?;
        if self.best == price {
            self.refresh_best();
        }
        Some(bucket)
    }

    /// Re-derive the cached best from the first bucket (or sentinel).
    pub fn refresh_best(&mut self) {
        self.best = self
            .first_bucket()
            .map(|b| b.price)
            .unwrap_or_else(|| self.side.empty_best_price());
    }

    /// Remove a single resting order, dropping its bucket if that
    /// empties it.
    pub fn cancel(&mut self, order_id: u64, price: i64) -> Option<Order> {
        let key = self.key(price);
        let bucket = self.levels.get_mut(&key)?;
        let removed = bucket.remove_by_id(order_id)?;
        if bucket.is_empty() || bucket.total_left == 0 {
            self.levels.remove(&key);
        }
        self.refresh_best();
        Some(removed)
    }

    // ========================================================================
    // Matching support
    // ========================================================================

    /// Whether a taker limited at `taker_price` may trade against a
    /// bucket on this side at `bucket_price`.
    #[inline]
    pub fn crosses(&self, taker_price: i64, bucket_price: i64) -> bool {
        match self.side {
            // An ask taker trades into bids at or above its limit
            Side::Bid => bucket_price >= taker_price,
            // A bid taker trades into asks at or below its limit
            Side::Ask => bucket_price <= taker_price,
        }
    }

    /// Sum of quantity magnitude available to a taker limited at
    /// `taker_price` (the fill-or-kill pre-scan).
    pub fn eligible_liquidity(&self, taker_price: i64) -> i64 {
        let mut available = 0i64;
        for bucket in self.levels.values() {
            if !self.crosses(taker_price, bucket.price) {
                break;
            }
            available += bucket.total_left.abs();
        }
        available
    }

    /// L2 view: `(price, total_left)` per level, best first.
    pub fn depth(&self) -> Vec<(i64, i64)> {
        self.levels
            .values()
            .map(|b| (b.price, b.total_left))
            .collect()
    }

    /// Iterate buckets best-first.
    pub fn buckets(&self) -> impl Iterator<Item = &PriceBucket> {
        self.levels.values()
    }
}
