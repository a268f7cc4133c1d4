//! Order types and the fixed-width binary record codec.
//!
//! All prices and amounts are integer-scaled fixed point: `PRICE_ONE`
//! (1_000_000_000) represents "1.0". No floating point touches the
//! matching path. Quantity sign encodes the side: positive amounts are
//! bids (buys), negative amounts are asks (sells).

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Fixed-point scale: this value represents "1.0".
pub const PRICE_ONE: i64 = 1_000_000_000;

/// Order side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Buy side (bids)
    Bid = 0,
    /// Sell side (asks)
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Best-price value an empty side reports: no bid can cross
    /// `i64::MAX` asks and no ask can cross `i64::MIN` bids.
    #[inline]
    pub const fn empty_best_price(self) -> i64 {
        match self {
            Side::Bid => i64::MIN,
            Side::Ask => i64::MAX,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    /// Resting or still being worked
    Open = 0,
    /// Fully filled
    Closed = 1,
    /// Cancelled before completion
    Cancelled = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderType {
    Limit = 0,
    Market = 1,
}

/// Time-in-force policy for the unfilled remainder of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeInForce {
    /// Good-till-cancelled: the remainder rests in the book
    Gtc = 0,
    /// Immediate-or-cancel: take available liquidity, cancel the rest
    Ioc = 1,
    /// Fill-or-kill: all-or-nothing
    Fok = 2,
    /// Post-only: never takes; cancelled outright if it would cross
    Poc = 3,
}

/// A single order, as accepted by the kernel.
///
/// Identity fields (`order_id`, `create_time`, `amount`, `price`) are
/// immutable after acceptance; fill progress (`left`, `filled_total`,
/// `status`, `update_time`) is mutated in place during matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Kernel-assigned ID: high bits identify the originating server
    /// instance, low bits are random.
    pub order_id: u64,
    /// Acceptance timestamp (nanoseconds)
    pub create_time: i64,
    /// Last mutation timestamp (nanoseconds)
    pub update_time: i64,
    /// Requested quantity; negative = sell/ask, positive = buy/bid
    pub amount: i64,
    /// Fixed-point limit price (`PRICE_ONE` = 1.0)
    pub price: i64,
    /// Unfilled quantity, same sign as `amount`, moves toward zero
    pub left: i64,
    /// Cumulative filled notional (`Σ matched_qty * matched_price`),
    /// negative accumulation on the sell side
    pub filled_total: i64,
    pub status: OrderStatus,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
}

impl Order {
    /// Build a fresh limit order request. ID and timestamps are left
    /// zero; the acceptor assigns them.
    pub fn limit(amount: i64, price: i64, time_in_force: TimeInForce) -> Self {
        Self {
            order_id: 0,
            create_time: 0,
            update_time: 0,
            amount,
            price,
            left: amount,
            filled_total: 0,
            status: OrderStatus::Open,
            order_type: OrderType::Limit,
            time_in_force,
        }
    }

    /// Build a market order request; the acceptor converts it into a
    /// fill-or-kill marketable limit order.
    pub fn market(amount: i64) -> Self {
        let mut order = Self::limit(amount, 0, TimeInForce::Fok);
        order.order_type = OrderType::Market;
        order
    }

    /// Build a cancellation request for a resting order. The zero
    /// amount is what marks it as a cancel on the intake path.
    pub fn cancellation(order_id: u64, price: i64) -> Self {
        let mut order = Self::limit(0, price, TimeInForce::Gtc);
        order.order_id = order_id;
        order
    }

    /// Which side of the book this order belongs to.
    #[inline]
    pub fn side(&self) -> Side {
        if self.amount < 0 {
            Side::Ask
        } else {
            Side::Bid
        }
    }

    #[inline]
    pub fn is_ask(&self) -> bool {
        self.amount < 0
    }

    /// Intake validation: `left` must carry the sign of `amount` (or
    /// be zero) and can never exceed it in magnitude.
    pub fn validate(&self) -> Result<()> {
        if self.left.abs() > self.amount.abs() {
            return Err(KernelError::MalformedOrder(
                "left exceeds amount in magnitude",
            ));
        }
        if self.left != 0 && self.left.signum() != self.amount.signum() {
            return Err(KernelError::MalformedOrder(
                "left and amount disagree on sign",
            ));
        }
        Ok(())
    }
}

/// Current wall clock in nanoseconds since the epoch.
#[inline]
pub fn now_nanos() -> i64 {
    // Saturates in 2262; good enough for an order timestamp.
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

// ============================================================================
// Fixed-width record codec (order log format, version 1)
// ============================================================================
//
// 72-byte little-endian records, no framing, no file header. Offset
// arithmetic is `record_index * RECORD_SIZE`.
//
// | Field         | Type | Offset |
// |---------------|------|--------|
// | order_id      | u64  | 0      |
// | create_time   | i64  | 8      |
// | update_time   | i64  | 16     |
// | amount        | i64  | 24     |
// | price         | i64  | 32     |
// | left          | i64  | 40     |
// | filled_total  | i64  | 48     |
// | reserved      | u64  | 56     |
// | status        | u8   | 64     |
// | order_type    | u8   | 65     |
// | time_in_force | u8   | 66     |
// | version       | u8   | 67     |
// | padding       | [u8] | 68..72 |

/// Size of one encoded order record on disk.
pub const RECORD_SIZE: usize = 72;

/// On-disk format version written into every record.
pub const RECORD_VERSION: u8 = 1;

impl Order {
    /// Encode into the fixed-width record layout.
    pub fn encode_record(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.order_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.create_time.to_le_bytes());
        buf[16..24].copy_from_slice(&self.update_time.to_le_bytes());
        buf[24..32].copy_from_slice(&self.amount.to_le_bytes());
        buf[32..40].copy_from_slice(&self.price.to_le_bytes());
        buf[40..48].copy_from_slice(&self.left.to_le_bytes());
        buf[48..56].copy_from_slice(&self.filled_total.to_le_bytes());
        // bytes 56..64 reserved
        buf[64] = self.status as u8;
        buf[65] = self.order_type as u8;
        buf[66] = self.time_in_force as u8;
        buf[67] = RECORD_VERSION;
        buf
    }

    /// Decode a record produced by [`Order::encode_record`].
    pub fn decode_record(buf: &[u8; RECORD_SIZE]) -> std::result::Result<Self, &'static str> {
        let i64_at = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[off..off + 8]);
            i64::from_le_bytes(b)
        };
        if buf[67] != RECORD_VERSION {
            return Err("unknown record version");
        }
        let status = match buf[64] {
            0 => OrderStatus::Open,
            1 => OrderStatus::Closed,
            2 => OrderStatus::Cancelled,
            _ => return Err("invalid order status"),
        };
        let order_type = match buf[65] {
            0 => OrderType::Limit,
            1 => OrderType::Market,
            _ => return Err("invalid order type"),
        };
        let time_in_force = match buf[66] {
            0 => TimeInForce::Gtc,
            1 => TimeInForce::Ioc,
            2 => TimeInForce::Fok,
            3 => TimeInForce::Poc,
            _ => return Err("invalid time-in-force"),
        };
        Ok(Self {
            order_id: u64::from_le_bytes(buf[0..8].try_into().map_err(|_| "short record")?),
            create_time: i64_at(8),
            update_time: i64_at(16),
            amount: i64_at(24),
            price: i64_at(32),
            left: i64_at(40),
            filled_total: i64_at(48),
            status,
            order_type,
            time_in_force,
        })
    }
}
