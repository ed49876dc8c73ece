//! Shared fixtures for unit tests.
//!
//! The table has six `Uint32` columns: `time` (bucket column), `city` and
//! `rider` (primary key), `fare` (deleted), `tips` (unsorted) and `rank`.
//! Rows are sorted by (`city`, `rank`).

use crate::batch::Batch;
use crate::collab::{BatchVersionRecord, ColumnFileWriter, DiskStore, MetaStore};
use crate::column::{ColumnVector, DataType, Value};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::memory::{HostMemoryManager, HostMemoryTracker};
use crate::schema::{ColumnDef, TableSchema};
use crate::upsert::{UpsertBatch, UpsertBatchBuilder};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

pub const TABLE: &str = "trips";

pub fn schema() -> TableSchema {
    schema_with_batch_size(20000)
}

pub fn schema_with_batch_size(batch_size: usize) -> TableSchema {
    TableSchema::new(
        TABLE,
        vec![
            ColumnDef::new("time", DataType::Uint32),
            ColumnDef::new("city", DataType::Uint32),
            ColumnDef::new("rider", DataType::Uint32),
            ColumnDef::new("fare", DataType::Uint32).deleted(true),
            ColumnDef::new("tips", DataType::Uint32),
            ColumnDef::new("rank", DataType::Uint32),
        ],
    )
    .primary_key(vec![1, 2])
    .sort_columns(vec![1, 5])
    .time_column(0)
    .config(TableConfig::default().backfill_store_batch_size(batch_size))
}

pub fn memory() -> Arc<dyn HostMemoryManager> {
    Arc::new(HostMemoryTracker::new(1 << 30))
}

fn u32s(values: &[Option<u32>]) -> Vec<Value> {
    values
        .iter()
        .map(|v| v.map_or(Value::Null, Value::Uint32))
        .collect()
}

/// Build a batch from rows of optional `Uint32` cells.
pub fn batch(rows: &[[Option<u32>; 6]]) -> Batch {
    let vectors = (0..6)
        .map(|col| {
            let values: Vec<Option<u32>> = rows.iter().map(|r| r[col]).collect();
            Some(ColumnVector::from_values(DataType::Uint32, &u32s(&values)))
        })
        .collect();
    Batch::from_vectors(vectors, None).unwrap()
}

/// Five rows of day 0, sorted by (city, rank).
pub fn base_batch() -> Batch {
    batch(&[
        [Some(0), Some(0), Some(0), None, Some(0), Some(10)],
        [Some(1), Some(0), Some(1), None, Some(1), Some(10)],
        [Some(2), Some(1), Some(0), None, Some(2), Some(10)],
        [Some(3), Some(1), Some(1), None, Some(3), Some(10)],
        [Some(4), Some(2), Some(0), None, Some(4), Some(10)],
    ])
}

/// `base_batch` after applying `upsert_batches`, compacted.
pub fn expected_batch() -> Batch {
    let full = batch(&[
        [Some(0), Some(0), Some(0), None, Some(0), Some(10)],
        [Some(1), Some(0), Some(1), None, Some(1), Some(11)],
        [Some(2), Some(1), Some(0), None, Some(12), Some(10)],
        [Some(3), Some(1), Some(1), None, Some(13), Some(10)],
        [Some(4), Some(2), Some(0), None, Some(4), Some(9)],
        [Some(5), Some(3), Some(0), None, None, Some(10)],
    ]);
    // The deleted column is not part of the compacted output.
    let columns = (0..6)
        .map(|col| if col == 3 { None } else { full.column(col).cloned() })
        .collect();
    Batch::new(columns).unwrap()
}

pub fn upsert_batch(column_ids: &[u16], rows: &[Vec<Option<u32>>]) -> UpsertBatch {
    let mut builder = UpsertBatchBuilder::new();
    for id in column_ids {
        builder.add_column(*id, DataType::Uint32).unwrap();
    }
    for cells in rows {
        let row = builder.add_row();
        for (col, value) in u32s(cells).into_iter().enumerate() {
            builder.set_value(row, col, value).unwrap();
        }
    }
    UpsertBatch::new(builder.to_bytes()).unwrap()
}

/// Three upsert batches against `base_batch`, seven rows, all in day 0:
/// - a no-op row (only the deleted column differs), a rank change on row 1
///   and an insert;
/// - a no-op row and two tips changes on rows 2 and 3;
/// - a rank change on row 4.
pub fn upsert_batches() -> Vec<UpsertBatch> {
    vec![
        upsert_batch(
            &[0, 1, 2, 3, 5],
            &[
                vec![Some(0), Some(0), Some(0), Some(99), Some(10)],
                vec![Some(1), Some(0), Some(1), None, Some(11)],
                vec![Some(5), Some(3), Some(0), None, Some(10)],
            ],
        ),
        upsert_batch(
            &[0, 1, 2, 4],
            &[
                vec![Some(0), Some(0), Some(0), Some(0)],
                vec![Some(2), Some(1), Some(0), Some(12)],
                vec![Some(3), Some(1), Some(1), Some(13)],
            ],
        ),
        upsert_batch(&[0, 1, 2, 5], &[vec![Some(4), Some(2), Some(0), Some(9)]]),
    ]
}

pub fn column_values(batch: &Batch, col: usize) -> Vec<Value> {
    (0..batch.num_rows()).map(|row| batch.value(row, col)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedFile {
    pub table: String,
    pub column: usize,
    pub shard: u32,
    pub bucket: i32,
    pub old_version: u32,
    pub new_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedVersions {
    pub table: String,
    pub shard: u32,
    pub bucket: i32,
    pub from_version: u32,
    pub to_version: u32,
}

type Files = Arc<Mutex<HashMap<(String, u32, i32, u32, usize), Vec<u8>>>>;

/// In-memory [`DiskStore`] recording every call.
#[derive(Debug, Default)]
pub struct RecordingDiskStore {
    pub opened: Mutex<Vec<OpenedFile>>,
    pub deleted: Mutex<Vec<DeletedVersions>>,
    files: Files,
    fail_writes_for_bucket: Mutex<Option<i32>>,
}

impl RecordingDiskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every open for write of `bucket`.
    pub fn fail_writes_for(&self, bucket: i32) {
        *self.fail_writes_for_bucket.lock().unwrap() = Some(bucket);
    }

    pub fn opened(&self) -> Vec<OpenedFile> {
        self.opened.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<DeletedVersions> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn file(&self, table: &str, shard: u32, bucket: i32, version: u32, column: usize) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(table.to_string(), shard, bucket, version, column))
            .cloned()
    }
}

struct RecordingWriter {
    key: (String, u32, i32, u32, usize),
    buf: Vec<u8>,
    files: Files,
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ColumnFileWriter for RecordingWriter {
    fn close(self: Box<Self>) -> io::Result<()> {
        let RecordingWriter { key, buf, files } = *self;
        files.lock().unwrap().insert(key, buf);
        Ok(())
    }
}

impl DiskStore for RecordingDiskStore {
    fn open_column_file_for_write(
        &self,
        table: &str,
        column: usize,
        shard: u32,
        bucket: i32,
        old_version: u32,
        new_version: u32,
    ) -> Result<Box<dyn ColumnFileWriter>> {
        self.opened.lock().unwrap().push(OpenedFile {
            table: table.to_string(),
            column,
            shard,
            bucket,
            old_version,
            new_version,
        });
        if *self.fail_writes_for_bucket.lock().unwrap() == Some(bucket) {
            return Err(Error::WriteError(
                "column file",
                io::Error::new(io::ErrorKind::Other, "injected failure"),
            ));
        }
        Ok(Box::new(RecordingWriter {
            key: (table.to_string(), shard, bucket, new_version, column),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
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
        let bytes = self.file(table, shard, bucket, version, column).ok_or_else(|| {
            Error::IoError(io::Error::new(io::ErrorKind::NotFound, "no such column file"))
        })?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn delete_batch_versions(
        &self,
        table: &str,
        shard: u32,
        bucket: i32,
        from_version: u32,
        to_version: u32,
    ) -> Result<()> {
        self.deleted.lock().unwrap().push(DeletedVersions {
            table: table.to_string(),
            shard,
            bucket,
            from_version,
            to_version,
        });
        Ok(())
    }
}

/// In-memory [`MetaStore`] recording every registration.
#[derive(Debug, Default)]
pub struct RecordingMetaStore {
    pub records: Mutex<Vec<(String, u32, BatchVersionRecord)>>,
    fail: Mutex<bool>,
}

impl RecordingMetaStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_registrations(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn records(&self) -> Vec<(String, u32, BatchVersionRecord)> {
        self.records.lock().unwrap().clone()
    }
}

impl MetaStore for RecordingMetaStore {
    fn add_archive_batch_version(
        &self,
        table: &str,
        shard: u32,
        record: &BatchVersionRecord,
    ) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(Error::MetaStore("injected failure".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .push((table.to_string(), shard, record.clone()));
        Ok(())
    }
}
