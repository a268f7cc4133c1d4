//! # Exchange Kernel
//!
//! A price-time-priority order matching kernel with durable intake.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One acceptor thread owns the order book exclusively (no locks)
//! - **Integer Fixed-Point**: No floating point in the matching path (`PRICE_ONE` = 1.0)
//! - **Durability First**: Every order is flushed to the append log before it can trade
//! - **Bounded Recovery**: A redo kernel tails the log and snapshots the book
//!
//! ## Architecture
//!
//! ```text
//! [Order Producers] --> [Channel] --> [Acceptor Thread (Pinned)]
//!                                       |         |
//!                                  [Order Log]  [Kernel] --> [Execution Reports]
//!                                       |
//!                                  [Replayer] --> [Redo Kernel] --> [Snapshots]
//! ```

pub mod acceptor;
pub mod book;
pub mod config;
pub mod error;
pub mod kernel;
pub mod order;
pub mod replay;
pub mod report;
pub mod snapshot;
pub mod wal;

// Re-exports for convenience
pub use acceptor::{Acceptor, Control};
pub use book::{BookSide, PriceBucket};
pub use config::Settings;
pub use error::{KernelError, Result};
pub use kernel::{BookDepth, Kernel};
pub use order::{Order, OrderStatus, OrderType, Side, TimeInForce, PRICE_ONE};
pub use replay::Replayer;
pub use report::ExecutionReport;
pub use wal::{LogReader, OrderLog};
