//! Acceptor: the single-threaded sequencer in front of a kernel.
//!
//! Exactly one acceptor drives a kernel. It receives candidate orders
//! over a channel, assigns kernel order IDs, stamps timestamps,
//! validates, appends to the order log (durability before matching),
//! and dispatches into the matching engine. Because every in-flight
//! bucket-clear task is joined inside `match_order`, the kernel is
//! quiesced whenever the acceptor sits between orders; that is what
//! makes the pause/snapshot control safe.
//!
//! Channel capacity is the caller's choice: a bounded intake channel
//! gives deliberate backpressure to order producers, an unbounded one
//! trades memory for never blocking them. The report sink must be
//! drained continuously either way.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{select, Receiver, Sender};
use log::{error, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::Settings;
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::order::{now_nanos, Order, OrderStatus, OrderType, Side, TimeInForce};
use crate::report::ExecutionReport;
use crate::snapshot;
use crate::wal::OrderLog;

/// Number of server-identifying high bits in a kernel order ID.
const SERVER_ID_BITS: u32 = 16;

/// Control requests for a running acceptor loop.
pub enum Control {
    /// Stop consuming orders; acknowledge once the kernel is quiesced.
    Pause(Sender<()>),
    /// Resume consuming orders after a pause.
    Resume,
    /// Snapshot the (quiesced) kernel and reply with the directory.
    Snapshot(Sender<Result<PathBuf>>),
    /// Exit the loop.
    Shutdown,
}

pub struct Acceptor {
    kernel: Kernel,
    wal: OrderLog,
    settings: Settings,
    description: String,
    server_mask: u64,
    rng: SmallRng,
    accepted_tx: Option<Sender<Order>>,
    last_order: Option<Order>,
}

impl Acceptor {
    /// Create an acceptor for a fresh kernel. `server_id` occupies the
    /// high bits of every assigned order ID so orders from different
    /// server instances can never collide.
    pub fn new(
        server_id: u64,
        description: &str,
        settings: Settings,
        report_tx: Sender<ExecutionReport>,
    ) -> Self {
        Self {
            kernel: Kernel::new(report_tx),
            wal: OrderLog::new(settings.order_log_dir.clone(), description),
            server_mask: server_id << (64 - SERVER_ID_BITS - 1),
            rng: SmallRng::from_entropy(),
            description: description.to_owned(),
            settings,
            accepted_tx: None,
            last_order: None,
        }
    }

    /// Wrap an already-populated kernel (a snapshot restore).
    pub fn with_kernel(
        kernel: Kernel,
        server_id: u64,
        description: &str,
        settings: Settings,
    ) -> Self {
        Self {
            kernel,
            wal: OrderLog::new(settings.order_log_dir.clone(), description),
            server_mask: server_id << (64 - SERVER_ID_BITS - 1),
            rng: SmallRng::from_entropy(),
            description: description.to_owned(),
            settings,
            accepted_tx: None,
            last_order: None,
        }
    }

    /// Publish a snapshot of every accepted order (cancels included)
    /// on `tx` before it is dispatched.
    pub fn set_accepted_channel(&mut self, tx: Sender<Order>) {
        self.accepted_tx = Some(tx);
    }

    #[inline]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Path of the order log file, once the first append created it.
    pub fn log_path(&self) -> Option<&Path> {
        self.wal.path()
    }

    fn next_order_id(&mut self) -> u64 {
        (self.rng.gen::<u64>() >> (SERVER_ID_BITS - 1)) | self.server_mask
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Accept one candidate order: validate, assign identity, persist,
    /// acknowledge, dispatch. Returns the accepted order (with its
    /// kernel-assigned ID) so callers can correlate reports.
    ///
    /// An error from the order log means the order was NOT accepted:
    /// it never reaches the book, because replay correctness requires
    /// every matched order to have been logged first.
    pub fn accept(&mut self, mut order: Order) -> Result<Order> {
        order.validate()?;
        let now = now_nanos();
        order.create_time = now;
        order.update_time = now;

        if order.amount == 0 {
            // Cancellation: keep the caller's target order ID
            order.status = OrderStatus::Cancelled;
        } else {
            if order.left == 0 {
                return Err(KernelError::MalformedOrder("new order with nothing to fill"));
            }
            order.order_id = self.next_order_id();
        }

        if self.settings.save_order_log {
            self.wal.append(&order)?;
        }
        let ack_lost = matches!(&self.accepted_tx, Some(tx) if tx.send(order).is_err());
        if ack_lost {
            warn!("accepted-order channel disconnected");
            self.accepted_tx = None;
        }

        self.dispatch(order)?;
        self.last_order = Some(order);
        Ok(order)
    }

    /// Classify and route an order that already carries its identity.
    /// This is the shared entry for live intake and log replay: replayed
    /// orders keep their logged IDs and must take exactly this path.
    pub fn dispatch(&mut self, mut order: Order) -> Result<()> {
        if order.amount == 0 {
            self.kernel.cancel_order(&order);
            return Ok(());
        }

        match order.order_type {
            OrderType::Limit => {
                let crossing = match order.side() {
                    Side::Bid => order.price >= self.kernel.ask1_price(),
                    Side::Ask => order.price <= self.kernel.bid1_price(),
                };
                match order.time_in_force {
                    // Non-crossing GTC/POC orders skip the matching
                    // walk entirely and rest directly.
                    TimeInForce::Gtc | TimeInForce::Poc if !crossing => {
                        self.kernel.insert_resting(order);
                        Ok(())
                    }
                    // IOC/FOK always take the matching path; with no
                    // eligible liquidity it cancels them.
                    _ => self.kernel.match_order(order),
                }
            }
            OrderType::Market => {
                // A market order becomes a marketable fill-or-kill
                // limit with a slippage allowance past the touch, so
                // the walk has a concrete stopping boundary.
                order.time_in_force = TimeInForce::Fok;
                let offset = self.settings.market_order_offset;
                match order.side() {
                    Side::Bid => {
                        let best = self.kernel.ask1_price();
                        if best == i64::MAX {
                            order.price = 0;
                            self.kernel.emit_cancelled(order);
                            return Ok(());
                        }
                        order.price = (best as f64 * offset) as i64;
                    }
                    Side::Ask => {
                        let best = self.kernel.bid1_price();
                        if best == i64::MIN {
                            order.price = 0;
                            self.kernel.emit_cancelled(order);
                            return Ok(());
                        }
                        // Sells slip downward: divide, don't multiply
                        order.price = (best as f64 / offset) as i64;
                    }
                }
                self.kernel.match_order(order)
            }
        }
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Run the sequencer loop until shutdown or both channels close.
    pub fn run(mut self, orders_rx: Receiver<Order>, control_rx: Receiver<Control>) {
        loop {
            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(control) => {
                        if !self.handle_control(control, &control_rx) {
                            return;
                        }
                    }
                    Err(_) => return,
                },
                recv(orders_rx) -> msg => match msg {
                    Ok(order) => {
                        if let Err(e) = self.accept(order) {
                            match e {
                                KernelError::Io(_) => {
                                    error!("order log append failed, order not accepted: {e}")
                                }
                                _ => warn!("order rejected at intake: {e}"),
                            }
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }

    /// Returns false when the loop should exit.
    fn handle_control(&mut self, control: Control, control_rx: &Receiver<Control>) -> bool {
        match control {
            Control::Pause(ack) => {
                // Between orders every clear task has joined, so the
                // kernel is quiesced the moment we acknowledge.
                let _ = ack.send(());
                loop {
                    match control_rx.recv() {
                        Ok(Control::Resume) => return true,
                        Ok(Control::Pause(ack)) => {
                            let _ = ack.send(());
                        }
                        Ok(Control::Snapshot(reply)) => {
                            let _ = reply.send(self.snapshot_now());
                        }
                        Ok(Control::Shutdown) | Err(_) => return false,
                    }
                }
            }
            Control::Resume => true,
            Control::Snapshot(reply) => {
                let _ = reply.send(self.snapshot_now());
                true
            }
            Control::Shutdown => false,
        }
    }

    fn snapshot_now(&self) -> Result<PathBuf> {
        let last = self
            .last_order
            .unwrap_or_else(|| Order::limit(0, 0, TimeInForce::Gtc));
        snapshot::snapshot(
            &self.kernel,
            &self.settings.snapshot_dir,
            &self.description,
            &last,
        )
    }

    /// Spawn the sequencer on its own named thread, pinned to the last
    /// available core (typically the one isolated from OS interrupts).
    pub fn spawn(
        self,
        orders_rx: Receiver<Order>,
        control_rx: Receiver<Control>,
    ) -> Result<JoinHandle<()>> {
        let name = format!("acceptor-{}", self.description);
        let handle = std::thread::Builder::new().name(name).spawn(move || {
            pin_to_last_core();
            self.run(orders_rx, control_rx);
        })?;
        Ok(handle)
    }
}

/// Pin the current thread to the last available CPU core.
fn pin_to_last_core() {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(last_core) = core_ids.last() {
            core_affinity::set_for_current(*last_core);
        }
    }
}
