//! Append-only record log behind a shelf.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: framed LogRecord]
//! [FRAME 2: framed LogRecord]
//! ...
//! ```
//!
//! Opening replays every frame in order. A frame that is cut short or fails
//! its checksum ends the replay; the file is truncated back to the last good
//! frame so later appends start from a clean tail.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec;

/// One mutation recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Key now maps to `data`, encoded with `protocol`.
    Put {
        /// Encoded key.
        key: Vec<u8>,
        /// Value protocol number.
        protocol: u8,
        /// Encoded value.
        data: Vec<u8>,
    },
    /// Key removed.
    Delete {
        /// Encoded key.
        key: Vec<u8>,
    },
}

impl LogRecord {
    fn encode(&self) -> IoResult<Vec<u8>> {
        let payload = bincode::serialize(self).map_err(|e| {
            std::io::Error::new(ErrorKind::InvalidData, format!("record encoding failed: {e}"))
        })?;
        codec::encode_frame(&payload)
    }

    fn decode(payload: &[u8]) -> IoResult<Self> {
        bincode::deserialize(payload).map_err(|e| {
            std::io::Error::new(ErrorKind::InvalidData, format!("record decoding failed: {e}"))
        })
    }
}

/// Handle on an open shelf log.
#[derive(Debug)]
pub struct ShelfLog {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

impl ShelfLog {
    /// Opens or creates the log at `path`, feeding every intact record to
    /// `apply` in write order.
    ///
    /// # Errors
    /// - `InvalidData` if the file exists but is not a shelf
    /// - any I/O error from reading, truncating, or creating the file
    pub fn open(path: &Path, mut apply: impl FnMut(LogRecord)) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let file_size = file.metadata()?.len();

        let mut records = 0;
        if file_size == 0 {
            codec::write_header(&mut file)?;
            file.sync_all()?;
        } else {
            let mut reader = BufReader::new(&mut file);
            codec::read_header(&mut reader)?;

            let mut good_end = reader.stream_position()?;
            while good_end < file_size {
                let outcome = codec::decode_frame(&mut reader)
                    .and_then(|payload| LogRecord::decode(&payload));
                match outcome {
                    Ok(record) => {
                        apply(record);
                        records += 1;
                        good_end = reader.stream_position()?;
                    }
                    Err(e) => {
                        let kind = if e.kind() == ErrorKind::UnexpectedEof {
                            "torn"
                        } else {
                            "corrupt"
                        };
                        warn!(
                            path = %path.display(),
                            offset = good_end,
                            dropped_bytes = file_size - good_end,
                            error = %e,
                            "recovered shelf with {kind} tail"
                        );
                        break;
                    }
                }
            }
            drop(reader);

            if good_end < file_size {
                file.set_len(good_end)?;
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records,
        })
    }

    /// Appends a record to the write buffer.
    pub fn append(&mut self, record: &LogRecord) -> IoResult<()> {
        let framed = record.encode()?;
        self.writer.write_all(&framed)?;
        self.records += 1;
        Ok(())
    }

    /// Swaps the writer for a read-only handle so every append fails.
    #[cfg(test)]
    pub(super) fn fail_writes(&mut self) -> IoResult<()> {
        self.writer.flush()?;
        self.writer = BufWriter::with_capacity(0, File::open(&self.path)?);
        Ok(())
    }

    /// Pushes buffered records to the operating system.
    pub fn flush(&mut self) -> IoResult<()> {
        self.writer.flush()
    }

    /// Flushes and forces the log to stable storage.
    pub fn sync(&mut self) -> IoResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    /// Number of records in the file, live or superseded.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Rewrites the log so it holds only `live` records.
    ///
    /// Writes to a temporary file first, then atomically renames it over
    /// the log. On failure the original log is untouched.
    pub fn compact<'a>(&mut self, live: impl Iterator<Item = &'a LogRecord>) -> IoResult<()> {
        self.writer.flush()?;

        let temp_path = self.path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let written = Self::write_compacted(&temp_path, live);
        let count = match written {
            Ok(count) => count,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        fs::rename(&temp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);

        debug!(
            path = %self.path.display(),
            before = self.records,
            after = count,
            "compacted shelf log"
        );
        self.records = count;
        Ok(())
    }

    fn write_compacted<'a>(
        temp_path: &Path,
        live: impl Iterator<Item = &'a LogRecord>,
    ) -> IoResult<usize> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;

        let mut count = 0;
        for record in live {
            writer.write_all(&record.encode()?)?;
            count += 1;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(count)
    }
}
