use super::archiving;
use super::patch::BackfillPatch;
use super::row::{Row, RowResolver};
use super::store::BackfillStore;
use crate::batch::{ArchiveBatch, Batch, Column, RecordId};
use crate::column::{ColumnVector, Value};
use crate::encoding::encode_key;
use crate::error::{Error, Result};
use crate::job::{BackfillProgress, BackfillStage, JobKey};
use crate::memory::HostMemoryManager;
use crate::primary_key::PrimaryKeyIndex;
use crate::schema::TableSchema;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Merging,
    Backfilled,
    Released,
}

/// Merge state for applying one patch to one archive batch.
///
/// `new` starts as a copy of `base` that shares every column buffer. A column
/// is forked before its first in-place write, so `base` is never modified.
/// Rows whose sort columns change, and rows with new primary keys, go through
/// the backfill store and are placed by [`BackfillContext::compact`].
///
/// Dropping the context releases whatever it still holds.
pub struct BackfillContext {
    base: Arc<ArchiveBatch>,
    patch: BackfillPatch,
    schema: Arc<TableSchema>,
    resolver: RowResolver,
    memory: Arc<dyn HostMemoryManager>,
    new: Batch,
    columns_forked: Vec<bool>,
    base_row_deleted: BTreeSet<usize>,
    base_index: PrimaryKeyIndex,
    backfill_store: BackfillStore,
    state: ContextState,
}

impl BackfillContext {
    pub fn new(
        base: Arc<ArchiveBatch>,
        patch: BackfillPatch,
        schema: Arc<TableSchema>,
        memory: Arc<dyn HostMemoryManager>,
    ) -> Result<Self> {
        let backfill_store =
            BackfillStore::new(&schema, schema.config.backfill_store_batch_size, &memory)?;

        let base_index = PrimaryKeyIndex::new();
        let batch = base.batch();
        for row in 0..batch.num_rows() {
            let key_values: Vec<_> = schema
                .primary_key_columns
                .iter()
                .map(|&col| batch.value(row, col))
                .collect();
            let key = encode_key(&key_values);
            if let Some(existing) = base_index.find_or_insert(key, RecordId::new(0, row as u32)) {
                return Err(Error::InvalidState(format!(
                    "bucket {} rows {} and {} share a primary key",
                    base.bucket(),
                    existing.row,
                    row
                )));
            }
        }

        Ok(Self {
            new: batch.clone(),
            columns_forked: vec![false; schema.num_columns()],
            base_row_deleted: BTreeSet::new(),
            resolver: RowResolver::new(&schema),
            base,
            patch,
            schema,
            memory,
            base_index,
            backfill_store,
            state: ContextState::Created,
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn base(&self) -> &Arc<ArchiveBatch> {
        &self.base
    }

    pub fn new_batch(&self) -> &Batch {
        &self.new
    }

    pub fn columns_forked(&self) -> &[bool] {
        &self.columns_forked
    }

    pub fn base_row_deleted(&self) -> &BTreeSet<usize> {
        &self.base_row_deleted
    }

    pub fn backfill_store(&self) -> &BackfillStore {
        &self.backfill_store
    }

    /// True when the merge left the bucket exactly as it was.
    pub fn is_unchanged(&self) -> bool {
        self.backfill_store.is_empty()
            && self.base_row_deleted.is_empty()
            && !self.columns_forked.iter().any(|forked| *forked)
    }

    /// Apply every row of the patch. On failure the context is released.
    pub fn backfill(&mut self, progress: &dyn BackfillProgress, key: &JobKey) -> Result<()> {
        if self.state != ContextState::Created {
            return Err(Error::InvalidOperation(format!(
                "backfill on a context in state {:?}",
                self.state
            )));
        }
        self.state = ContextState::Merging;
        progress.report(key, &|detail| detail.stage = BackfillStage::ApplyPatch);

        if let Err(e) = self.apply_patch() {
            tracing::warn!(
                job = %key,
                bucket = self.patch.bucket,
                error = %e,
                "Backfill merge failed"
            );
            self.release();
            return Err(e);
        }

        self.state = ContextState::Backfilled;
        tracing::debug!(
            job = %key,
            bucket = self.patch.bucket,
            records = self.patch.len(),
            store_records = self.backfill_store.num_records(),
            deleted_rows = self.base_row_deleted.len(),
            forked_columns = self.columns_forked.iter().filter(|f| **f).count(),
            "Merged backfill patch"
        );
        Ok(())
    }

    fn apply_patch(&mut self) -> Result<()> {
        for i in 0..self.patch.record_ids.len() {
            let record = self.patch.record_ids[i];
            let patch_row = self.get_changed_patch_row(record)?;
            let key = PrimaryKeyIndex::key_of(&patch_row, &self.schema.primary_key_columns)?;

            // Already moved to the store by an earlier row of this backfill.
            if let Some(existing) = self.backfill_store.lookup(&key) {
                let current = self.backfill_store.row(existing)?;
                if let Some(merged) = self.resolver.overlay(&current, &patch_row) {
                    self.backfill_store.write(key, &merged)?;
                }
                continue;
            }

            let Some(base_record) = self.base_index.get(&key) else {
                let row = self.resolver.materialize(&patch_row);
                self.backfill_store.write(key, &row)?;
                continue;
            };

            let base_row = base_record.row as usize;
            let Some(changed) = self.get_changed_base_row(base_row, &patch_row) else {
                continue;
            };
            if self.sort_columns_changed(base_row, &changed) {
                self.base_row_deleted.insert(base_row);
                self.backfill_store.write(key, &changed)?;
            } else {
                self.write_patch_value_for_unsorted_column(base_row, &patch_row)?;
            }
        }
        Ok(())
    }

    /// Resolve `record` of the patch into schema column order.
    pub fn get_changed_patch_row(&self, record: RecordId) -> Result<Row> {
        let (batch, row) = self.patch.locate(record)?;
        self.resolver.resolve(batch, row)
    }

    /// The base row overlaid with `patch_row`, or `None` when nothing changes.
    pub fn get_changed_base_row(&self, base_row: usize, patch_row: &[Option<Value>]) -> Option<Row> {
        let current: Row = (0..self.resolver.num_columns())
            .map(|col| (!self.resolver.is_deleted(col)).then(|| self.new.value(base_row, col)))
            .collect();
        self.resolver.overlay(&current, patch_row)
    }

    fn sort_columns_changed(&self, base_row: usize, changed: &[Option<Value>]) -> bool {
        self.schema
            .sort_columns
            .iter()
            .any(|&col| changed[col] != Some(self.new.value(base_row, col)))
    }

    /// Write the changed non-sort values of `patch_row` into `base_row` of
    /// `new`, forking each column on its first write.
    pub fn write_patch_value_for_unsorted_column(
        &mut self,
        base_row: usize,
        patch_row: &[Option<Value>],
    ) -> Result<()> {
        for (col, value) in patch_row.iter().enumerate() {
            let Some(value) = *value else { continue };
            if self.resolver.is_deleted(col) || self.schema.is_sort_column(col) {
                continue;
            }
            if self.new.value(base_row, col) == value {
                continue;
            }
            self.fork_column(col)?.set(base_row, value);
        }
        Ok(())
    }

    fn fork_column(&mut self, col: usize) -> Result<&mut ColumnVector> {
        if !self.columns_forked[col] {
            let forked = match self.new.column(col) {
                Some(column) => column.fork(&self.memory)?,
                None => {
                    let data_type = self
                        .resolver
                        .value_type(col)
                        .ok_or(Error::ColumnOutOfRange(col))?;
                    Column::new(ColumnVector::new(data_type, self.new.num_rows()), &self.memory)?
                }
            };
            self.new.set_column(col, Arc::new(forked))?;
            self.columns_forked[col] = true;
            tracing::trace!(bucket = self.patch.bucket, column = col, "Forked column");
        }

        self.new
            .column_mut(col)
            .map(Column::vector_mut)
            .ok_or_else(|| Error::InvalidState(format!("forked column {} is shared", col)))
    }

    /// Sort the store into the final batch for this bucket.
    pub fn compact(&mut self) -> Result<Batch> {
        if self.state != ContextState::Backfilled {
            return Err(Error::InvalidOperation(format!(
                "compact on a context in state {:?}",
                self.state
            )));
        }
        self.backfill_store.advance_last_read_record();
        let snapshot = self.backfill_store.snapshot();
        let patch = snapshot.create_archiving_patch(&self.schema.sort_columns);
        archiving::merge(
            &self.new,
            &self.base_row_deleted,
            &patch,
            &self.schema,
            &self.memory,
        )
    }

    /// Return the store and any unpublished forks. Forks already shared with a
    /// compacted batch live on in that batch. Safe to call more than once.
    pub fn release(&mut self) {
        if self.state == ContextState::Released {
            return;
        }
        self.state = ContextState::Released;
        self.new = self.base.batch().clone();
        self.backfill_store.release();
        self.base_index.clear();
        tracing::trace!(bucket = self.patch.bucket, "Released backfill context");
    }
}

impl Drop for BackfillContext {
    fn drop(&mut self) {
        self.release();
    }
}
