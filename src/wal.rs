//! Append-only order log (write-ahead log) and its offset reader.
//!
//! Every accepted order is written as one fixed-size record (see
//! [`crate::order::RECORD_SIZE`]) and flushed to disk before the order
//! is exposed to the book. Because records are fixed-width with no
//! framing, any reader can address record `n` at byte offset
//! `n * RECORD_SIZE` and replay the stream independently.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{KernelError, Result};
use crate::order::{Order, RECORD_SIZE};

/// Single-writer append log for one acceptor instance.
///
/// The file is opened lazily on first append and named after the
/// acceptor description plus its creation timestamp.
pub struct OrderLog {
    dir: PathBuf,
    description: String,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl OrderLog {
    pub fn new(dir: PathBuf, description: &str) -> Self {
        Self {
            dir,
            description: description.to_owned(),
            file: None,
            path: None,
        }
    }

    /// Durably append one order record. Returns only once the record
    /// has been flushed; a failure here means the order was never
    /// accepted.
    pub fn append(&mut self, order: &Order) -> Result<()> {
        let file = self.ensure_open()?;
        file.write_all(&order.encode_record())?;
        file.sync_data()?;
        Ok(())
    }

    /// Path of the live log file, once the first append created it.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn ensure_open(&mut self) -> Result<&mut File> {
        if let Some(ref mut file) = self.file {
            return Ok(file);
        }
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "{}_{}.log",
            self.description,
            chrono::Utc::now().timestamp()
        ));
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        info!("order log opened at {}", path.display());
        self.path = Some(path);
        Ok(self.file.insert(file))
    }
}

/// Sequential reader over a fixed-record order log.
///
/// End-of-file is the expected "caught up" signal, not an error; a
/// record that fails to decode is reported with its byte offset and
/// must be retried, never skipped, since skipping would desynchronize
/// every later offset.
pub struct LogReader {
    file: File,
    index: u64,
}

impl LogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file, index: 0 })
    }

    /// Index of the next record to read.
    #[inline]
    pub fn record_index(&self) -> u64 {
        self.index
    }

    /// Read the next record, or `None` when caught up with the writer.
    ///
    /// A trailing partial record (a write in flight) also reads as
    /// `None`; the reader re-seeks from the record boundary on the
    /// next call.
    pub fn read_next(&mut self) -> Result<Option<Order>> {
        let offset = self.index * RECORD_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; RECORD_SIZE];
        match self.file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let order = Order::decode_record(&buf)
            .map_err(|detail| KernelError::Decode { offset, detail })?;
        self.index += 1;
        Ok(Some(order))
    }
}
