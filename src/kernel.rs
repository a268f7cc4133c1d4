//! Matching kernel: price-time-priority matching over one instrument.
//!
//! A kernel owns both book sides and is designed for single-writer
//! use: exactly one acceptor thread drives it, so no locks guard the
//! book. The one concession to parallelism is bucket clearing: a price
//! level that is consumed in full is detached from the side index and
//! handed to a scoped worker task that closes its orders and emits the
//! execution report. All clear tasks are joined before the walked
//! side's best-price cache is recomputed.

use crossbeam_channel::Sender;
use log::{error, warn};

use crate::book::{BookSide, PriceBucket};
use crate::error::{KernelError, Result};
use crate::order::{now_nanos, Order, OrderStatus, OrderType, Side, TimeInForce};
use crate::report::ExecutionReport;

/// L2 view of the book: `(price, total_left)` per level, best first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookDepth {
    pub asks: Vec<(i64, i64)>,
    pub bids: Vec<(i64, i64)>,
}

/// The matching engine core plus its order book index.
pub struct Kernel {
    ask: BookSide,
    bid: BookSide,
    report_tx: Sender<ExecutionReport>,
}

impl Kernel {
    /// Create an empty kernel publishing execution reports to `report_tx`.
    ///
    /// The report sink must be drained continuously or matching stalls
    /// on a bounded channel.
    pub fn new(report_tx: Sender<ExecutionReport>) -> Self {
        Self {
            ask: BookSide::new(Side::Ask),
            bid: BookSide::new(Side::Bid),
            report_tx,
        }
    }

    // ========================================================================
    // Book access
    // ========================================================================

    /// Best ask price; `i64::MAX` when the ask side is empty.
    #[inline]
    pub fn ask1_price(&self) -> i64 {
        self.ask.best_price()
    }

    /// Best bid price; `i64::MIN` when the bid side is empty.
    #[inline]
    pub fn bid1_price(&self) -> i64 {
        self.bid.best_price()
    }

    #[inline]
    pub fn ask_side(&self) -> &BookSide {
        &self.ask
    }

    #[inline]
    pub fn bid_side(&self) -> &BookSide {
        &self.bid
    }

    /// Total resting orders across both sides.
    pub fn order_count(&self) -> usize {
        self.ask.order_count() + self.bid.order_count()
    }

    /// Take an L2 snapshot of both sides.
    pub fn take_depth(&self) -> BookDepth {
        BookDepth {
            asks: self.ask.depth(),
            bids: self.bid.depth(),
        }
    }

    // ========================================================================
    // Book mutation
    // ========================================================================

    /// Rest an order that cannot trade (or whose remainder cannot).
    pub fn insert_resting(&mut self, order: Order) {
        match order.side() {
            Side::Ask => self.ask.insert_resting(order),
            Side::Bid => self.bid.insert_resting(order),
        }
    }

    /// Remove a resting order. The request carries the order's price
    /// so the bucket can be located without a book-wide index; both
    /// sides are probed since a cancel does not state its side.
    pub fn cancel_order(&mut self, request: &Order) -> Option<Order> {
        let removed = self
            .ask
            .cancel(request.order_id, request.price)
            .or_else(|| self.bid.cancel(request.order_id, request.price));
        match removed {
            Some(mut order) => {
                order.status = OrderStatus::Cancelled;
                order.update_time = now_nanos();
                self.send_report(ExecutionReport::cancelled(order));
                Some(order)
            }
            None => {
                warn!(
                    "cancel for unknown order {} at price {}",
                    request.order_id, request.price
                );
                None
            }
        }
    }

    /// Mark an order cancelled without touching the book and report it.
    pub fn emit_cancelled(&self, mut order: Order) {
        order.status = OrderStatus::Cancelled;
        order.update_time = now_nanos();
        self.send_report(ExecutionReport::cancelled(order));
    }

    // ========================================================================
    // Matching
    // ========================================================================

    /// Match a taker order against the opposite side of the book.
    ///
    /// Walks buckets best-to-worst, stops at the price-cross boundary,
    /// consumes makers FIFO within each bucket, and handles the
    /// remainder per the order's time-in-force. Market orders must be
    /// converted to marketable fill-or-kill limits before they get
    /// here; anything else is rejected as unsupported rather than
    /// matched on a meaningless price.
    pub fn match_order(&mut self, mut taker: Order) -> Result<()> {
        match (taker.order_type, taker.time_in_force) {
            (OrderType::Market, TimeInForce::Fok) => {}
            (OrderType::Market, tif) => {
                return Err(KernelError::UnsupportedOrder {
                    order_type: OrderType::Market,
                    time_in_force: tif,
                });
            }
            (OrderType::Limit, TimeInForce::Poc) => {
                // A post-only order reaching the matching path crossed
                // the book; it is cancelled, never matched.
                self.emit_cancelled(taker);
                return Ok(());
            }
            (OrderType::Limit, _) => {}
        }

        let report_tx = self.report_tx.clone();
        let walked = match taker.side() {
            Side::Ask => &mut self.bid,
            Side::Bid => &mut self.ask,
        };

        // Fill-or-kill pre-scan: reject all-or-nothing before any
        // mutation. IOC shares the eligibility rule but consumes
        // whatever exists instead.
        if taker.time_in_force == TimeInForce::Fok
            && walked.eligible_liquidity(taker.price) < taker.left.abs()
        {
            taker.status = OrderStatus::Cancelled;
            taker.update_time = now_nanos();
            send_report_checked(&report_tx, ExecutionReport::cancelled(taker));
            return Ok(());
        }
        std::thread::scope(|scope| {
            while taker.left != 0 {
                let Some(front) = walked.first_bucket() else {
                    break;
                };
                if !walked.crosses(taker.price, front.price) {
                    break;
                }

                if front.total_left.abs() <= taker.left.abs() {
                    // Whole bucket consumable: detach it and clear it
                    // on a worker task. Clearing only touches orders
                    // the task now owns, so sibling clears are
                    // independent.
                    let Some(bucket) = walked.pop_first_bucket() else {
                        break;
                    };
                    taker.left += bucket.total_left;
                    taker.filled_total -= bucket.total_left * bucket.price;
                    taker.update_time = now_nanos();
                    let mut snapshot = taker;
                    if snapshot.left == 0 {
                        snapshot.status = OrderStatus::Closed;
                    }
                    let tx = report_tx.clone();
                    scope.spawn(move || clear_bucket(bucket, snapshot, tx));
                } else {
                    // Bucket holds more than the taker needs: walk its
                    // FIFO from the oldest order until the taker zeroes.
                    let Some(bucket) = walked.first_bucket_mut() else {
                        break;
                    };
                    let report = consume_partial(bucket, &mut taker);
                    send_report_checked(&report_tx, report);
                    break;
                }
            }
            // Scope exit joins every clear task before the epilogue.
        });

        // Clears mutated the walked side; only now is its cached best
        // safe to re-derive.
        walked.refresh_best();

        if taker.left != 0 {
            match taker.time_in_force {
                TimeInForce::Gtc => self.insert_resting(taker),
                // IOC cancels the unfilled remainder instead of
                // resting it. FOK only lands here if the pre-scan and
                // the walk disagreed, which the single-writer design
                // rules out; cancelling is still the safe terminal.
                TimeInForce::Ioc | TimeInForce::Fok | TimeInForce::Poc => {
                    self.emit_cancelled(taker);
                }
            }
        }

        Ok(())
    }

    #[inline]
    fn send_report(&self, report: ExecutionReport) {
        send_report_checked(&self.report_tx, report);
    }
}

/// Close every order of a detached bucket and emit its report.
///
/// Runs on a scoped worker task; the bucket is owned, so this never
/// races with the matching walk.
fn clear_bucket(bucket: PriceBucket, taker_snapshot: Order, tx: Sender<ExecutionReport>) {
    let now = taker_snapshot.update_time;
    let mut report = ExecutionReport::new(taker_snapshot);
    report.record(taker_snapshot.order_id, -bucket.total_left);
    for mut maker in bucket.into_orders() {
        report.record(maker.order_id, maker.left);
        maker.filled_total += maker.left * maker.price;
        maker.left = 0;
        maker.status = OrderStatus::Closed;
        maker.update_time = now;
        report.maker_orders.push(maker);
    }
    send_report_checked(&tx, report);
}

/// Consume the front of a bucket FIFO until the taker's `left` reaches
/// zero. Only called when the bucket holds strictly more quantity than
/// the taker needs, so the taker always terminates here.
fn consume_partial(bucket: &mut PriceBucket, taker: &mut Order) -> ExecutionReport {
    let now = now_nanos();
    let taker_left_on_entry = taker.left;
    let mut report = ExecutionReport::new(*taker);

    while taker.left != 0 {
        let Some(maker) = bucket.front_mut() else {
            break;
        };
        if maker.left.abs() <= taker.left.abs() {
            // Maker fully consumed
            let maker_fill = maker.left;
            maker.filled_total += maker_fill * maker.price;
            taker.filled_total -= maker_fill * maker.price;
            maker.left = 0;
            maker.status = OrderStatus::Closed;
            maker.update_time = now;
            report.record(maker.order_id, maker_fill);
            report.maker_orders.push(*maker);
            bucket.adjust_total(-maker_fill);
            taker.left += maker_fill;
            bucket.pop_front();
        } else {
            // Maker absorbs the taker's entire remainder and stays
            let taker_fill = taker.left;
            maker.filled_total -= taker_fill * maker.price;
            taker.filled_total += taker_fill * maker.price;
            maker.left += taker_fill;
            maker.update_time = now;
            report.record(maker.order_id, -taker_fill);
            report.maker_orders.push(*maker);
            bucket.adjust_total(taker_fill);
            taker.left = 0;
        }
    }

    taker.update_time = now;
    if taker.left == 0 {
        taker.status = OrderStatus::Closed;
    }
    report.record(taker.order_id, taker_left_on_entry - taker.left);
    report.taker_order = *taker;
    report
}

/// Verify the zero-sum invariant and hand the report to the sink.
fn send_report_checked(tx: &Sender<ExecutionReport>, report: ExecutionReport) {
    if !report.is_zero_sum() {
        error!(
            "zero-sum violation in report for taker {}: {:?}",
            report.taker_order.order_id, report.matched_size_by_order_id
        );
        debug_assert!(report.is_zero_sum(), "non-zero-sum execution report");
    }
    if tx.send(report).is_err() {
        error!("execution report sink disconnected; report dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    fn kernel() -> (Kernel, Receiver<ExecutionReport>) {
        let (tx, rx) = unbounded();
        (Kernel::new(tx), rx)
    }

    fn order(id: u64, amount: i64, price: i64, tif: TimeInForce) -> Order {
        let mut o = Order::limit(amount, price, tif);
        o.order_id = id;
        o
    }

    fn drain(rx: &Receiver<ExecutionReport>) -> Vec<ExecutionReport> {
        rx.try_iter().collect()
    }

    #[test]
    fn test_exact_cross_closes_both() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));

        k.match_order(order(2, -100, 200, TimeInForce::Gtc)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.taker_order.order_id, 2);
        assert_eq!(r.taker_order.left, 0);
        assert_eq!(r.taker_order.filled_total, -20_000);
        assert_eq!(r.taker_order.status, OrderStatus::Closed);

        assert_eq!(r.maker_orders.len(), 1);
        let maker = &r.maker_orders[0];
        assert_eq!(maker.order_id, 1);
        assert_eq!(maker.left, 0);
        assert_eq!(maker.filled_total, 20_000);
        assert_eq!(maker.status, OrderStatus::Closed);

        assert!(r.is_zero_sum());
        assert_eq!(r.matched_size_by_order_id[&1], 100);
        assert_eq!(r.matched_size_by_order_id[&2], -100);

        assert_eq!(k.ask1_price(), i64::MAX);
        assert_eq!(k.bid1_price(), i64::MIN);
        assert_eq!(k.order_count(), 0);
    }

    #[test]
    fn test_oversized_taker_rests_remainder() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));

        k.match_order(order(2, -1000, 199, TimeInForce::Gtc)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        let maker = &reports[0].maker_orders[0];
        assert_eq!(maker.filled_total, 20_000);
        assert_eq!(maker.left, 0);

        // Remainder rests as the new best ask
        assert_eq!(k.bid1_price(), i64::MIN);
        assert_eq!(k.ask1_price(), 199);
        let resting = k.ask_side().get_bucket(199).unwrap().front().unwrap().clone();
        assert_eq!(resting.order_id, 2);
        assert_eq!(resting.left, -900);
        assert_eq!(resting.filled_total, -20_000);
        assert_eq!(resting.status, OrderStatus::Open);
    }

    #[test]
    fn test_sweep_multiple_levels() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 150, 200, TimeInForce::Gtc));
        k.insert_resting(order(3, 110, 199, TimeInForce::Gtc));

        k.match_order(order(4, -400, 198, TimeInForce::Gtc)).unwrap();

        // Two bucket-clear reports (200 then 199), possibly reordered
        let reports = drain(&rx);
        assert_eq!(reports.len(), 2);
        for r in &reports {
            assert!(r.is_zero_sum());
        }

        assert!(k.bid_side().is_empty());
        assert_eq!(k.bid1_price(), i64::MIN);
        assert_eq!(k.ask1_price(), 198);
        let resting = k.ask_side().get_bucket(198).unwrap().front().unwrap().clone();
        assert_eq!(resting.left, -40);
        assert_eq!(k.order_count(), 1);
    }

    #[test]
    fn test_fifo_within_bucket() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 100, 200, TimeInForce::Gtc));

        // Takes all of order 1 and half of order 2
        k.match_order(order(3, -150, 200, TimeInForce::Gtc)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.maker_orders[0].order_id, 1);
        assert_eq!(r.maker_orders[0].left, 0);
        assert_eq!(r.maker_orders[1].order_id, 2);
        assert_eq!(r.maker_orders[1].left, 50);
        assert!(r.is_zero_sum());

        let bucket = k.bid_side().get_bucket(200).unwrap();
        assert_eq!(bucket.total_left, 50);
        assert_eq!(bucket.front().unwrap().order_id, 2);
        assert_eq!(k.bid1_price(), 200);
    }

    #[test]
    fn test_price_priority_across_levels() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 190, TimeInForce::Gtc));
        k.insert_resting(order(2, 100, 200, TimeInForce::Gtc));

        // Only enough for one maker; the better-priced bid must fill
        k.match_order(order(3, -100, 185, TimeInForce::Gtc)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        let filled: Vec<u64> = reports[0].maker_orders.iter().map(|m| m.order_id).collect();
        assert_eq!(filled, vec![2]);
        assert_eq!(k.bid1_price(), 190);
    }

    #[test]
    fn test_walk_stops_at_price_boundary() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 100, 195, TimeInForce::Gtc));

        // Limit 198: may take the 200 bid but not the 195 bid
        k.match_order(order(3, -300, 198, TimeInForce::Gtc)).unwrap();

        drain(&rx);
        assert_eq!(k.bid1_price(), 195);
        assert_eq!(k.ask1_price(), 198);
        assert_eq!(k.ask_side().get_bucket(198).unwrap().front().unwrap().left, -200);
    }

    #[test]
    fn test_fok_insufficient_liquidity_cancels() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));

        k.match_order(order(2, -150, 200, TimeInForce::Fok)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.taker_order.status, OrderStatus::Cancelled);
        assert_eq!(r.taker_order.left, -150);
        assert!(r.maker_orders.is_empty());
        assert!(r.matched_size_by_order_id.is_empty());

        // Book untouched
        assert_eq!(k.bid_side().get_bucket(200).unwrap().total_left, 100);
    }

    #[test]
    fn test_fok_exact_liquidity_fills() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 60, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 40, 199, TimeInForce::Gtc));

        k.match_order(order(3, -100, 199, TimeInForce::Fok)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 2);
        for r in &reports {
            assert!(r.is_zero_sum());
        }
        assert!(k.bid_side().is_empty());
        assert_eq!(k.order_count(), 0);
    }

    #[test]
    fn test_ioc_consumes_then_cancels_remainder() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));

        k.match_order(order(2, -250, 200, TimeInForce::Ioc)).unwrap();

        let reports = drain(&rx);
        // One clear report plus the cancellation of the remainder
        assert_eq!(reports.len(), 2);
        let cancel = reports
            .iter()
            .find(|r| r.taker_order.status == OrderStatus::Cancelled)
            .unwrap();
        assert_eq!(cancel.taker_order.left, -150);
        assert_eq!(cancel.taker_order.filled_total, -20_000);

        // Nothing rested
        assert!(k.ask_side().is_empty());
        assert!(k.bid_side().is_empty());
    }

    #[test]
    fn test_poc_crossing_is_cancelled_not_matched() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));

        k.match_order(order(2, -100, 200, TimeInForce::Poc)).unwrap();

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].taker_order.status, OrderStatus::Cancelled);
        assert!(reports[0].maker_orders.is_empty());
        assert_eq!(k.bid_side().get_bucket(200).unwrap().total_left, 100);
    }

    #[test]
    fn test_market_with_wrong_tif_rejected() {
        let (mut k, _rx) = kernel();
        let mut o = Order::market(-100);
        o.order_id = 1;
        o.time_in_force = TimeInForce::Gtc;
        assert!(matches!(
            k.match_order(o),
            Err(KernelError::UnsupportedOrder { .. })
        ));
    }

    #[test]
    fn test_cancel_resting_order() {
        let (mut k, rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 50, 200, TimeInForce::Gtc));

        let removed = k.cancel_order(&Order::cancellation(1, 200)).unwrap();
        assert_eq!(removed.status, OrderStatus::Cancelled);
        assert_eq!(removed.left, 100);

        let reports = drain(&rx);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].taker_order.order_id, 1);

        let bucket = k.bid_side().get_bucket(200).unwrap();
        assert_eq!(bucket.total_left, 50);
        assert_eq!(k.bid1_price(), 200);
    }

    #[test]
    fn test_cancel_unknown_order() {
        let (mut k, rx) = kernel();
        assert!(k.cancel_order(&Order::cancellation(7, 100)).is_none());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_depth_view() {
        let (mut k, _rx) = kernel();
        k.insert_resting(order(1, 100, 200, TimeInForce::Gtc));
        k.insert_resting(order(2, 50, 195, TimeInForce::Gtc));
        k.insert_resting(order(3, -80, 210, TimeInForce::Gtc));

        let depth = k.take_depth();
        assert_eq!(depth.bids, vec![(200, 100), (195, 50)]);
        assert_eq!(depth.asks, vec![(210, -80)]);
    }
}
