//! Log replay: a shadow kernel rebuilt by tailing the order log.
//!
//! The replayer owns a second ("redo") kernel and feeds it the same
//! record stream the live acceptor persisted, through the same
//! dispatch path, so the redo book is always a deterministic function
//! of the log prefix it has consumed. Whenever it catches up with the
//! writer it snapshots the redo book, which bounds recovery time to
//! one snapshot restore plus the log tail written since.
//!
//! A record that fails to decode is retried at the same offset after a
//! backoff, never skipped: records are fixed-width, so skipping one
//! would desynchronize every later offset.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{error, info, warn};

use crate::acceptor::Acceptor;
use crate::config::Settings;
use crate::error::{KernelError, Result};
use crate::order::Order;
use crate::report::ExecutionReport;
use crate::snapshot;
use crate::wal::LogReader;

const DECODE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct Replayer {
    reader: LogReader,
    redo: Acceptor,
    settings: Settings,
    description: String,
    last_order: Option<Order>,
    records_at_last_snapshot: u64,
}

impl Replayer {
    /// Tail the order log at `log_path` into a fresh redo kernel.
    ///
    /// The redo acceptor never writes its own log; its input IS the
    /// log. Execution reports from replayed matching go to `report_tx`
    /// and are normally dropped by the caller.
    pub fn new(
        log_path: &Path,
        description: &str,
        settings: Settings,
        report_tx: Sender<ExecutionReport>,
    ) -> Result<Self> {
        let reader = LogReader::open(log_path)?;
        let redo_settings = Settings {
            save_order_log: false,
            ..settings.clone()
        };
        let redo = Acceptor::new(0, description, redo_settings, report_tx);
        Ok(Self {
            reader,
            redo,
            settings,
            description: description.to_owned(),
            last_order: None,
            records_at_last_snapshot: 0,
        })
    }

    #[inline]
    pub fn redo_acceptor(&self) -> &Acceptor {
        &self.redo
    }

    /// Records consumed so far.
    #[inline]
    pub fn record_index(&self) -> u64 {
        self.reader.record_index()
    }

    /// Drain every record currently in the log into the redo kernel.
    /// Returns the number of records applied. Dispatch rejections are
    /// logged and skipped (the live acceptor saw the same rejection);
    /// read and decode errors propagate.
    pub fn catch_up(&mut self) -> Result<usize> {
        let mut applied = 0;
        while let Some(order) = self.reader.read_next()? {
            if let Err(e) = self.redo.dispatch(order) {
                warn!("replayed order {} not dispatchable: {e}", order.order_id);
            }
            self.last_order = Some(order);
            applied += 1;
        }
        Ok(applied)
    }

    /// Snapshot the redo book if new records arrived since the last
    /// snapshot. The redo kernel is quiesced between `catch_up` calls,
    /// so this is always safe to call from the replay thread.
    fn maybe_snapshot(&mut self) -> Result<()> {
        let consumed = self.reader.record_index();
        if consumed == self.records_at_last_snapshot {
            return Ok(());
        }
        let Some(last) = self.last_order else {
            return Ok(());
        };
        let dir = snapshot::snapshot(
            self.redo.kernel(),
            &self.settings.snapshot_dir,
            &self.description,
            &last,
        )?;
        self.records_at_last_snapshot = consumed;
        info!(
            "redo snapshot at record {} written to {}",
            consumed,
            dir.display()
        );
        Ok(())
    }

    /// Tail the log until `stop` is raised: catch up, snapshot when
    /// caught up, sleep one snapshot interval, repeat.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Acquire) {
            match self.catch_up() {
                Ok(_) => {
                    self.maybe_snapshot()?;
                    std::thread::sleep(self.settings.redo_snapshot_interval());
                }
                Err(KernelError::Decode { offset, detail }) => {
                    // A torn or corrupt record. The offset does not
                    // advance, so the next pass re-reads it.
                    error!("undecodable log record at offset {offset}: {detail}");
                    std::thread::sleep(DECODE_RETRY_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run the replay loop on its own thread. Raise `stop` and join
    /// the handle to shut down.
    pub fn spawn(mut self, stop: Arc<AtomicBool>) -> Result<JoinHandle<Result<()>>> {
        let name = format!("replay-{}", self.description);
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&stop))?;
        Ok(handle)
    }
}
