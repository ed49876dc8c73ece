//! Collaborators the backfill engine persists through.
//!
//! [`DiskStore`] owns column files, [`MetaStore`] owns the durable record of
//! which archive batch version is current. [`LocalDiskStore`] keeps column
//! files on the local filesystem.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Writer for one column file. Data is only durable once `close` returns.
pub trait ColumnFileWriter: Write + Send {
    fn close(self: Box<Self>) -> io::Result<()>;
}

pub trait DiskStore: Send + Sync {
    /// Open the file for `column` of `bucket` at `new_version`. `old_version`
    /// is the version being replaced.
    fn open_column_file_for_write(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        old_version: u32,
        new_version: u32,
    ) -> Result<Box<dyn ColumnFileWriter>>;

    fn open_column_file_for_read(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        version: u32,
    ) -> Result<Box<dyn Read + Send>>;

    /// Remove every file of `bucket` with a version in `from_version..=to_version`.
    fn delete_batch_versions(
        &self,
        table: &str,
        shard: u32,
        bucket: i32,
        from_version: u32,
        to_version: u32,
    ) -> Result<()>;
}

/// Registration of a newly persisted archive batch version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchVersionRecord {
    pub bucket: i32,
    pub old_version: u32,
    pub new_version: u32,
    pub num_rows: usize,
    pub num_columns: usize,
}

pub trait MetaStore: Send + Sync {
    fn add_archive_batch_version(
        &self,
        table: &str,
        shard: u32,
        record: &BatchVersionRecord,
    ) -> Result<()>;
}

/// Column files under `{root}/{table}_{shard}/archiving_batches/{bucket}_{version}/{column}.data`.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batch_dir(&self, table: &str, shard: u32, bucket: i32, version: u32) -> PathBuf {
        self.root
            .join(format!("{}_{}", table, shard))
            .join("archiving_batches")
            .join(format!("{}_{}", bucket, version))
    }

    pub fn column_file_path(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        version: u32,
    ) -> PathBuf {
        self.batch_dir(table, shard, bucket, version)
            .join(format!("{}.data", column))
    }
}

struct LocalColumnWriter {
    writer: BufWriter<File>,
}

impl Write for LocalColumnWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ColumnFileWriter for LocalColumnWriter {
    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

impl DiskStore for LocalDiskStore {
    fn open_column_file_for_write(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        _old_version: u32,
        new_version: u32,
    ) -> Result<Box<dyn ColumnFileWriter>> {
        let dir = self.batch_dir(table, shard, bucket, new_version);
        fs::create_dir_all(&dir).map_err(|e| Error::WriteError("archive batch directory", e))?;
        let file = File::create(dir.join(format!("{}.data", column)))
            .map_err(|e| Error::WriteError("column file", e))?;
        Ok(Box::new(LocalColumnWriter {
            writer: BufWriter::new(file),
        }))
    }

    fn open_column_file_for_read(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        version: u32,
    ) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.column_file_path(table, column, shard, bucket, version))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn delete_batch_versions(
        &self,
        table: &str,
        shard: u32,
        bucket: i32,
        from_version: u32,
        to_version: u32,
    ) -> Result<()> {
        for version in from_version..=to_version {
            let dir = self.batch_dir(table, shard, bucket, version);
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    tracing::debug!(table, shard, bucket, version, "Deleted archive batch version");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
