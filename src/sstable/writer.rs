//! SSTable writer for building immutable sorted files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::types::{Cell, Generation, Record};
use crate::util::filename::{delete_file, sync_dir, table_file_path, temp_file_path};
use crate::{Error, Result};

use super::{encode_record, encoded_len};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Writer for building SSTable files.
///
/// Records go to `<prefix>_<generation>.tmp`; `finish` appends the offsets
/// and row count, syncs, and renames the file to its published name. A
/// writer dropped before `finish` removes its temporary file.
pub struct SSTableWriter {
    /// Buffered file writer; `None` once finished.
    writer: Option<BufWriter<File>>,
    /// Temporary path being written.
    temp_path: PathBuf,
    /// Published path.
    final_path: PathBuf,
    /// Directory holding both paths.
    dir: PathBuf,
    /// Generation of the table.
    generation: Generation,
    /// Current offset in the file.
    offset: u64,
    /// Start offset of every record written so far.
    offsets: Vec<u64>,
    /// Last key written, for order checking.
    last_key: Option<Bytes>,
    /// Encoding scratch buffer.
    scratch: BytesMut,
}

impl SSTableWriter {
    /// Create a writer for table `generation` in `dir`.
    pub fn new(dir: &Path, prefix: &str, generation: Generation) -> Result<Self> {
        let temp_path = temp_file_path(dir, prefix, generation);
        let final_path = table_file_path(dir, prefix, generation);
        let file = File::create(&temp_path)?;

        Ok(Self {
            writer: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            temp_path,
            final_path,
            dir: dir.to_path_buf(),
            generation,
            offset: 0,
            offsets: Vec::new(),
            last_key: None,
            scratch: BytesMut::with_capacity(256),
        })
    }

    /// Get the generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Get the number of records written.
    pub fn row_count(&self) -> usize {
        self.offsets.len()
    }

    /// Append one record.
    ///
    /// Keys must be strictly ascending; `Absent` cells are rejected.
    pub fn add(&mut self, key: &Bytes, cell: &Cell) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last {
                return Err(Error::Io(format!(
                    "key out of order while writing {}: {:?} after {:?}",
                    self.temp_path.display(),
                    key,
                    last
                )));
            }
        }

        self.scratch.clear();
        self.scratch.reserve(encoded_len(key, cell));
        encode_record(&mut self.scratch, key, cell)?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::internal("table writer already finished"))?;
        writer.write_all(&self.scratch)?;

        self.offsets.push(self.offset);
        self.offset += self.scratch.len() as u64;
        self.last_key = Some(key.clone());
        Ok(())
    }

    /// Finish writing and publish the table.
    pub fn finish(self) -> Result<SSTableInfo> {
        self.finish_with(sync_dir)
    }

    /// `finish` with the directory sync supplied by the caller.
    fn finish_with<F>(mut self, sync: F) -> Result<SSTableInfo>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let mut footer = BytesMut::with_capacity(self.offsets.len() * 8 + 8);
        for offset in &self.offsets {
            footer.put_i64(*offset as i64);
        }
        footer.put_i64(self.offsets.len() as i64);

        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::internal("table writer already finished"))?;
        let written = (|| -> Result<()> {
            writer.write_all(&footer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            drop(writer);
            std::fs::rename(&self.temp_path, &self.final_path)?;
            Ok(())
        })();
        if let Err(e) = written {
            if let Err(cleanup) = delete_file(&self.temp_path) {
                warn!(path = %self.temp_path.display(), error = %cleanup, "failed to remove temporary table");
            }
            return Err(e);
        }

        // The rename is only durable once the directory is synced; a table
        // that may vanish on a crash is not reported as published.
        if let Err(e) = sync(&self.dir) {
            if let Err(cleanup) = delete_file(&self.final_path) {
                warn!(path = %self.final_path.display(), error = %cleanup, "failed to remove unsynced table");
            }
            return Err(e.into());
        }

        Ok(SSTableInfo {
            generation: self.generation,
            path: self.final_path.clone(),
            row_count: self.offsets.len(),
            file_size: self.offset + footer.len() as u64,
        })
    }
}

impl Drop for SSTableWriter {
    fn drop(&mut self) {
        // Still holding the writer means `finish` never ran.
        if let Some(writer) = self.writer.take() {
            drop(writer);
            if let Err(e) = delete_file(&self.temp_path) {
                warn!(path = %self.temp_path.display(), error = %e, "failed to remove abandoned table");
            }
        }
    }
}

/// Information about a published SSTable.
#[derive(Debug, Clone)]
pub struct SSTableInfo {
    /// Generation of the table.
    pub generation: Generation,
    /// Published path.
    pub path: PathBuf,
    /// Number of records.
    pub row_count: usize,
    /// Total file size in bytes.
    pub file_size: u64,
}

/// Write an ascending record stream as table `generation` and publish it.
///
/// The first error from the stream aborts the write and leaves no file behind.
pub fn write_table<I>(dir: &Path, prefix: &str, generation: Generation, records: I) -> Result<SSTableInfo>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut writer = SSTableWriter::new(dir, prefix, generation)?;
    for record in records {
        let record = record?;
        writer.add(&record.key, &record.cell)?;
    }
    writer.finish()
}
