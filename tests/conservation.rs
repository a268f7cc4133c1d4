//! Conservation properties over randomized order flow.
//!
//! Two invariants must hold no matter what the order stream looks
//! like:
//!
//! 1. Every execution report is zero-sum: the matched-size deltas of
//!    all participants cancel out exactly.
//! 2. Per order, the quantity it gave up (`amount - final left`)
//!    equals the sum of its matched-size contributions across every
//!    report it appears in.

use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver};
use exchange_kernel::{
    Acceptor, ExecutionReport, Order, OrderStatus, Settings, TimeInForce,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn acceptor() -> (Acceptor, Receiver<ExecutionReport>) {
    let (tx, rx) = unbounded();
    let settings = Settings {
        save_order_log: false,
        ..Settings::default()
    };
    (Acceptor::new(1, "conservation", settings, tx), rx)
}

fn run_random_flow(seed: u64, count: usize) {
    let (mut acc, rx) = acceptor();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // amount by order id, for every accepted non-cancel order
    let mut amounts: HashMap<u64, i64> = HashMap::new();
    let mut resting: Vec<Order> = Vec::new();

    for _ in 0..count {
        let roll: f64 = rng.gen();
        let order = if roll < 0.65 || resting.is_empty() {
            let qty = rng.gen_range(1..400) as i64;
            let amount = if rng.gen_bool(0.5) { qty } else { -qty };
            let price = rng.gen_range(9500..10500) * 100;
            let tif = match rng.gen_range(0..5) {
                0 => TimeInForce::Ioc,
                1 => TimeInForce::Fok,
                2 => TimeInForce::Poc,
                _ => TimeInForce::Gtc,
            };
            Order::limit(amount, price, tif)
        } else if roll < 0.85 {
            let target = resting.swap_remove(rng.gen_range(0..resting.len()));
            Order::cancellation(target.order_id, target.price)
        } else {
            let qty = rng.gen_range(1..150) as i64;
            Order::market(if rng.gen_bool(0.5) { qty } else { -qty })
        };

        let stamped = acc.accept(order).unwrap();
        if stamped.amount != 0 {
            amounts.insert(stamped.order_id, stamped.amount);
            if stamped.time_in_force == TimeInForce::Gtc {
                resting.push(stamped);
            }
        }
    }

    // Invariant 1: every report is zero-sum
    let reports: Vec<ExecutionReport> = rx.try_iter().collect();
    let mut matched: HashMap<u64, i64> = HashMap::new();
    for r in &reports {
        assert!(
            r.is_zero_sum(),
            "non-zero-sum report for taker {}",
            r.taker_order.order_id
        );
        for (&id, &delta) in &r.matched_size_by_order_id {
            *matched.entry(id).or_insert(0) += delta;
        }
    }

    // Invariant 2: per order, matched total equals amount minus the
    // quantity still resting in the book (zero when closed/cancelled).
    let mut still_resting: HashMap<u64, i64> = HashMap::new();
    for side in [acc.kernel().ask_side(), acc.kernel().bid_side()] {
        for bucket in side.buckets() {
            for order in bucket.iter() {
                still_resting.insert(order.order_id, order.left);
            }
        }
    }
    for (&id, &amount) in &amounts {
        let left = still_resting.get(&id).copied().unwrap_or_else(|| {
            // Not in the book: fully filled, cancelled remainder, or
            // cancelled outright. Reports may arrive out of order
            // (bucket clears run concurrently), but taker `left`
            // only moves toward zero, so the smallest magnitude seen
            // is the final state.
            reports
                .iter()
                .filter(|r| r.taker_order.order_id == id)
                .map(|r| r.taker_order.left)
                .min_by_key(|left| left.abs())
                .unwrap_or(0)
        });
        let contributed = matched.get(&id).copied().unwrap_or(0);
        assert_eq!(
            contributed,
            amount - left,
            "order {id} gave up {} but reports account for {contributed}",
            amount - left
        );
    }

    // Global sum across all reports is zero as well
    assert_eq!(matched.values().sum::<i64>(), 0);
}

#[test]
fn conservation_small_flow() {
    run_random_flow(1, 200);
}

#[test]
fn conservation_large_flow() {
    run_random_flow(0xFEED, 5_000);
}

#[test]
fn conservation_tight_spread_churn() {
    // Narrow price band forces constant crossing and bucket clears
    let (mut acc, rx) = acceptor();
    let mut rng = ChaCha8Rng::seed_from_u64(77);

    for _ in 0..2_000 {
        let qty = rng.gen_range(1..100) as i64;
        let amount = if rng.gen_bool(0.5) { qty } else { -qty };
        let price = rng.gen_range(1000..1003);
        acc.accept(Order::limit(amount, price, TimeInForce::Gtc))
            .unwrap();
    }

    for r in rx.try_iter() {
        assert!(r.is_zero_sum());
        // Participants in a trade report are terminal or progressed
        for maker in &r.maker_orders {
            assert!(maker.left.abs() < maker.amount.abs() || maker.left == 0);
        }
        if r.taker_order.status == OrderStatus::Closed {
            assert_eq!(r.taker_order.left, 0);
        }
    }
}
