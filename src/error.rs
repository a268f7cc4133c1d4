//! Error taxonomy for the exchange kernel.
//!
//! Intake-level problems (malformed orders, unsupported order shapes)
//! are recoverable and scoped to a single request. I/O failures on the
//! order log are hard failures of the intake path: an order is never
//! considered accepted unless its durability write succeeded.

use crate::order::{OrderType, TimeInForce};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The order failed intake validation and never reached the book.
    #[error("malformed order: {0}")]
    MalformedOrder(&'static str),

    /// Order type / time-in-force combination the kernel does not match.
    #[error("unsupported order: type {order_type:?} with time-in-force {time_in_force:?}")]
    UnsupportedOrder {
        order_type: OrderType,
        time_in_force: TimeInForce,
    },

    /// I/O failure on the order log or snapshot store.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A log record at the given byte offset failed to decode.
    /// Offsets are always multiples of the fixed record size, so a
    /// decode failure desynchronizes every later record; callers must
    /// retry, never skip.
    #[error("undecodable log record at offset {offset}: {detail}")]
    Decode { offset: u64, detail: &'static str },

    /// No snapshot directory with a completion sentinel was found.
    #[error("no valid snapshot under {0}")]
    NoValidSnapshot(String),

    /// A channel peer hung up; the kernel cannot make progress.
    #[error("channel disconnected")]
    ChannelClosed,
}
