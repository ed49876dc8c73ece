use crate::column::{ColumnVector, DataType, Value};
use crate::error::{Error, Result};
use crate::memory::{HostMemoryManager, Reservation};
use crate::schema::TableSchema;
use std::sync::Arc;

/// Address of a row inside a set of upsert batches or a multi-batch store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub batch: u32,
    pub row: u32,
}

impl RecordId {
    pub const fn new(batch: u32, row: u32) -> Self {
        Self { batch, row }
    }
}

/// A column buffer plus the host memory it holds. The memory is returned
/// when the last batch referencing the buffer is dropped.
#[derive(Debug)]
pub struct Column {
    vector: ColumnVector,
    _reservation: Reservation,
}

impl Column {
    pub fn new(vector: ColumnVector, memory: &Arc<dyn HostMemoryManager>) -> Result<Self> {
        let reservation = Reservation::new(memory, vector.memory_bytes())?;
        Ok(Self {
            vector,
            _reservation: reservation,
        })
    }

    pub fn untracked(vector: ColumnVector) -> Self {
        Self {
            vector,
            _reservation: Reservation::untracked(),
        }
    }

    /// Private copy of this buffer, accounted as a new allocation.
    pub fn fork(&self, memory: &Arc<dyn HostMemoryManager>) -> Result<Self> {
        Self::new(self.vector.clone(), memory)
    }

    pub fn vector(&self) -> &ColumnVector {
        &self.vector
    }

    pub(crate) fn vector_mut(&mut self) -> &mut ColumnVector {
        &mut self.vector
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.vector == other.vector
    }
}

/// Column-oriented rows. A `None` column is logically deleted and reads as null.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<Option<Arc<Column>>>,
    size: usize,
}

impl Batch {
    pub fn new(columns: Vec<Option<Arc<Column>>>) -> Result<Self> {
        let mut lengths = columns.iter().flatten().map(|c| c.vector().len());
        let size = lengths.next().unwrap_or(0);
        if lengths.any(|len| len != size) {
            return Err(Error::InvalidState(
                "batch columns have different lengths".to_string(),
            ));
        }
        Ok(Self { columns, size })
    }

    /// Batch over the given vectors, accounted against `memory` when given.
    pub fn from_vectors(
        vectors: Vec<Option<ColumnVector>>,
        memory: Option<&Arc<dyn HostMemoryManager>>,
    ) -> Result<Self> {
        let columns = vectors
            .into_iter()
            .map(|vector| {
                vector
                    .map(|v| match memory {
                        Some(memory) => Column::new(v, memory).map(Arc::new),
                        None => Ok(Arc::new(Column::untracked(v))),
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    /// Zero-row batch with one column per live schema column.
    pub fn empty(schema: &TableSchema) -> Self {
        let columns = schema
            .columns
            .iter()
            .map(|c| (!c.deleted).then(|| Arc::new(Column::untracked(ColumnVector::new(c.data_type, 0)))))
            .collect();
        Self { columns, size: 0 }
    }

    pub fn num_rows(&self) -> usize {
        self.size
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col: usize) -> Option<&Arc<Column>> {
        self.columns.get(col).and_then(|c| c.as_ref())
    }

    pub fn column_type(&self, col: usize) -> Option<DataType> {
        self.column(col).map(|c| c.vector().data_type())
    }

    pub fn value(&self, row: usize, col: usize) -> Value {
        match self.column(col) {
            Some(column) if row < self.size => column.vector().get(row),
            _ => Value::Null,
        }
    }

    pub fn row(&self, row: usize) -> Vec<Value> {
        (0..self.columns.len()).map(|col| self.value(row, col)).collect()
    }

    /// Host memory held by this batch's columns.
    pub fn memory_bytes(&self) -> usize {
        self.columns
            .iter()
            .flatten()
            .map(|c| c.vector().memory_bytes())
            .sum()
    }

    /// Replace column `col`, growing the column list with deleted slots if needed.
    pub(crate) fn set_column(&mut self, col: usize, column: Arc<Column>) -> Result<()> {
        if column.vector().len() != self.size {
            return Err(Error::InvalidState(format!(
                "column of {} rows does not fit a batch of {} rows",
                column.vector().len(),
                self.size
            )));
        }
        if col >= self.columns.len() {
            self.columns.resize(col + 1, None);
        }
        self.columns[col] = Some(column);
        Ok(())
    }

    /// Mutable access to a column buffer no other batch shares.
    pub(crate) fn column_mut(&mut self, col: usize) -> Option<&mut Column> {
        self.columns
            .get_mut(col)
            .and_then(|c| c.as_mut())
            .and_then(Arc::get_mut)
    }
}

/// Immutable archive partition for one bucket at one version.
#[derive(Debug)]
pub struct ArchiveBatch {
    bucket: i32,
    version: u32,
    batch: Batch,
}

impl ArchiveBatch {
    pub fn new(bucket: i32, version: u32, batch: Batch) -> Self {
        Self {
            bucket,
            version,
            batch,
        }
    }

    pub fn bucket(&self) -> i32 {
        self.bucket
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HostMemoryTracker;

    fn vectors() -> Vec<Option<ColumnVector>> {
        vec![
            Some(ColumnVector::from_values(
                DataType::Uint32,
                &[Value::Uint32(1), Value::Uint32(2)],
            )),
            None,
            Some(ColumnVector::from_values(
                DataType::Int8,
                &[Value::Null, Value::Int8(-1)],
            )),
        ]
    }

    #[test]
    fn test_value_access() {
        let batch = Batch::from_vectors(vectors(), None).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);
        assert_eq!(batch.value(1, 0), Value::Uint32(2));
        assert_eq!(batch.value(1, 1), Value::Null);
        assert_eq!(batch.value(0, 2), Value::Null);
        assert_eq!(batch.value(5, 0), Value::Null);
        assert_eq!(batch.row(1), vec![Value::Uint32(2), Value::Null, Value::Int8(-1)]);
        assert!(batch.column(1).is_none());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let vectors = vec![
            Some(ColumnVector::new(DataType::Uint32, 2)),
            Some(ColumnVector::new(DataType::Uint32, 3)),
        ];
        assert!(Batch::from_vectors(vectors, None).is_err());
    }

    #[test]
    fn test_clone_shares_buffers() {
        let batch = Batch::from_vectors(vectors(), None).unwrap();
        let clone = batch.clone();
        assert!(Arc::ptr_eq(
            batch.column(0).unwrap(),
            clone.column(0).unwrap()
        ));
        assert_eq!(batch, clone);
    }

    #[test]
    fn test_memory_released_with_last_reference() {
        let memory: Arc<dyn HostMemoryManager> = Arc::new(HostMemoryTracker::new(1 << 20));
        let batch = Batch::from_vectors(vectors(), Some(&memory)).unwrap();
        let used = memory.used_bytes();
        assert_eq!(used, batch.memory_bytes());

        let clone = batch.clone();
        drop(batch);
        assert_eq!(memory.used_bytes(), used);
        drop(clone);
        assert_eq!(memory.used_bytes(), 0);
    }

    #[test]
    fn test_fork_is_accounted() {
        let memory: Arc<dyn HostMemoryManager> = Arc::new(HostMemoryTracker::new(1 << 20));
        let column = Column::untracked(ColumnVector::new(DataType::Int64, 10));
        let forked = column.fork(&memory).unwrap();
        assert_eq!(memory.used_bytes(), forked.vector().memory_bytes());
        assert_eq!(forked, column);
    }

    #[test]
    fn test_column_mut_requires_unique_buffer() {
        let mut batch = Batch::from_vectors(vectors(), None).unwrap();
        let shared = batch.clone();
        assert!(batch.column_mut(0).is_none());

        drop(shared);
        batch
            .column_mut(0)
            .unwrap()
            .vector_mut()
            .set(0, Value::Uint32(9));
        assert_eq!(batch.value(0, 0), Value::Uint32(9));
    }

    #[test]
    fn test_set_column() {
        let mut batch = Batch::from_vectors(vectors(), None).unwrap();
        let column = Arc::new(Column::untracked(ColumnVector::new(DataType::Int64, 2)));
        batch.set_column(4, Arc::clone(&column)).unwrap();
        assert_eq!(batch.num_columns(), 5);
        assert!(batch.column(3).is_none());
        assert!(Arc::ptr_eq(batch.column(4).unwrap(), &column));

        let short = Arc::new(Column::untracked(ColumnVector::new(DataType::Int64, 1)));
        assert!(batch.set_column(1, short).is_err());
    }

    #[test]
    fn test_empty_batch_skips_deleted_columns() {
        let schema = TableSchema::new(
            "t",
            vec![
                crate::schema::ColumnDef::new("a", DataType::Uint32),
                crate::schema::ColumnDef::new("b", DataType::Uint32).deleted(true),
            ],
        );
        let batch = Batch::empty(&schema);
        assert_eq!(batch.num_rows(), 0);
        assert!(batch.column(0).is_some());
        assert!(batch.column(1).is_none());
    }
}
