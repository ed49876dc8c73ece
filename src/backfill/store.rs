use super::row::Row;
use crate::batch::RecordId;
use crate::column::{ColumnVector, DataType, Value};
use crate::error::{Error, Result};
use crate::memory::{HostMemoryManager, Reservation};
use crate::primary_key::PrimaryKeyIndex;
use crate::schema::TableSchema;
use std::sync::Arc;

/// Append-only staging store for rows a merge could not patch in place.
///
/// Rows live in fixed-capacity batches allocated on demand. The primary-key
/// index always points at the latest record for a key; older records for the
/// same key stay in place and remember the record that replaced them, so a
/// snapshot can still see them while their replacement is past its barrier.
pub struct BackfillStore {
    batch_size: usize,
    value_types: Vec<DataType>,
    column_deletions: Vec<bool>,
    batches: Vec<Vec<Option<ColumnVector>>>,
    primary_key: PrimaryKeyIndex,
    /// Per written record, the later record of the same key, if any.
    superseded_by: Vec<Option<RecordId>>,
    next_write_record: RecordId,
    last_read_record: RecordId,
    reservation: Reservation,
}

impl BackfillStore {
    pub fn new(
        schema: &TableSchema,
        batch_size: usize,
        memory: &Arc<dyn HostMemoryManager>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidOperation(
                "backfill store batch size must be positive".to_string(),
            ));
        }
        Ok(Self {
            batch_size,
            value_types: schema.value_types(),
            column_deletions: schema.column_deletions(),
            batches: Vec::new(),
            primary_key: PrimaryKeyIndex::new(),
            superseded_by: Vec::new(),
            next_write_record: RecordId::new(0, 0),
            last_read_record: RecordId::new(0, 0),
            reservation: Reservation::new(memory, 0)?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Slot the next write lands in.
    pub fn next_write_record(&self) -> RecordId {
        self.next_write_record
    }

    /// Read barrier: records before it are visible to snapshots.
    pub fn last_read_record(&self) -> RecordId {
        self.last_read_record
    }

    /// Number of records written, including superseded ones.
    pub fn num_records(&self) -> usize {
        self.next_write_record.batch as usize * self.batch_size
            + self.next_write_record.row as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_records() == 0
    }

    pub fn primary_key(&self) -> &PrimaryKeyIndex {
        &self.primary_key
    }

    pub fn memory_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    /// Latest record for an encoded primary key.
    pub fn lookup(&self, key: &[u8]) -> Option<RecordId> {
        self.primary_key.get(key)
    }

    /// Append `row` and point `key` at it.
    pub fn write(&mut self, key: Vec<u8>, row: &[Option<Value>]) -> Result<RecordId> {
        let record = self.next_write_record;
        if record.batch as usize == self.batches.len() {
            self.allocate_batch()?;
        }

        let batch = &mut self.batches[record.batch as usize];
        for (col, column) in batch.iter_mut().enumerate() {
            if let Some(column) = column {
                column.push(row.get(col).copied().flatten().unwrap_or(Value::Null));
            }
        }

        self.next_write_record = if record.row as usize + 1 == self.batch_size {
            RecordId::new(record.batch + 1, 0)
        } else {
            RecordId::new(record.batch, record.row + 1)
        };
        if let Some(previous) = self.primary_key.get(&key) {
            let position = self.position(previous);
            self.superseded_by[position] = Some(record);
        }
        self.superseded_by.push(None);
        self.primary_key.upsert(key, record);
        Ok(record)
    }

    /// Values of `record`; deleted columns read as `None`.
    pub fn row(&self, record: RecordId) -> Result<Row> {
        if record >= self.next_write_record {
            return Err(Error::InvalidState(format!(
                "record {:?} has not been written",
                record
            )));
        }
        Ok(self.batches[record.batch as usize]
            .iter()
            .map(|column| column.as_ref().map(|c| c.get(record.row as usize)))
            .collect())
    }

    pub fn value(&self, record: RecordId, col: usize) -> Value {
        self.batches
            .get(record.batch as usize)
            .and_then(|batch| batch.get(col))
            .and_then(|column| column.as_ref())
            .filter(|column| (record.row as usize) < column.len())
            .map_or(Value::Null, |column| column.get(record.row as usize))
    }

    /// Publish everything written so far to future snapshots.
    pub fn advance_last_read_record(&mut self) {
        self.last_read_record = self.next_write_record;
    }

    /// Read-only view of the records before the read barrier.
    pub fn snapshot(&self) -> BackfillStoreSnapshot<'_> {
        BackfillStoreSnapshot {
            store: self,
            upto: self.last_read_record,
        }
    }

    /// Drop every batch and return their memory.
    pub fn release(&mut self) {
        self.batches.clear();
        self.primary_key.clear();
        self.superseded_by.clear();
        self.next_write_record = RecordId::new(0, 0);
        self.last_read_record = RecordId::new(0, 0);
        self.reservation = Reservation::untracked();
    }

    fn position(&self, record: RecordId) -> usize {
        record.batch as usize * self.batch_size + record.row as usize
    }

    fn allocate_batch(&mut self) -> Result<()> {
        let live = self.column_deletions.iter().filter(|d| !**d).count();
        let bytes = live * (self.batch_size * 8 + self.batch_size.div_ceil(64) * 8);
        self.reservation.grow(bytes)?;

        let batch = self
            .value_types
            .iter()
            .zip(&self.column_deletions)
            .map(|(data_type, deleted)| {
                (!deleted).then(|| ColumnVector::with_capacity(*data_type, self.batch_size))
            })
            .collect();
        self.batches.push(batch);
        tracing::trace!(batch = self.batches.len() - 1, bytes, "Allocated backfill store batch");
        Ok(())
    }
}

/// Consistent view of a [`BackfillStore`] up to its read barrier.
#[derive(Clone, Copy)]
pub struct BackfillStoreSnapshot<'a> {
    store: &'a BackfillStore,
    upto: RecordId,
}

impl<'a> BackfillStoreSnapshot<'a> {
    pub fn batch_size(&self) -> usize {
        self.store.batch_size
    }

    /// Latest record of every key as of the read barrier, in insertion order.
    pub fn live_records(&self) -> Vec<RecordId> {
        let batch_size = self.store.batch_size;
        let upto = self.store.position(self.upto);
        self.store.superseded_by[..upto]
            .iter()
            .enumerate()
            .filter(|(_, next)| next.map_or(true, |next| next >= self.upto))
            .map(|(position, _)| {
                RecordId::new((position / batch_size) as u32, (position % batch_size) as u32)
            })
            .collect()
    }

    pub fn value(&self, record: RecordId, col: usize) -> Value {
        if record >= self.upto {
            return Value::Null;
        }
        self.store.value(record, col)
    }

    pub fn row(&self, record: RecordId) -> Result<Row> {
        if record >= self.upto {
            return Err(Error::InvalidState(format!(
                "record {:?} is past the read barrier",
                record
            )));
        }
        self.store.row(record)
    }
}
