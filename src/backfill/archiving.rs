use super::store::BackfillStoreSnapshot;
use crate::batch::{Batch, RecordId};
use crate::column::{ColumnVector, Value};
use crate::encoding::encode_key;
use crate::error::Result;
use crate::memory::HostMemoryManager;
use crate::schema::TableSchema;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Store records in final sort order, ready to be merged with the base batch.
#[derive(Clone)]
pub struct ArchivingPatch<'a> {
    snapshot: BackfillStoreSnapshot<'a>,
    record_ids: Vec<RecordId>,
    sort_columns: Vec<usize>,
}

impl<'a> BackfillStoreSnapshot<'a> {
    /// Sort the live records by the composite sort key. Equal keys keep
    /// insertion order.
    pub fn create_archiving_patch(&self, sort_columns: &[usize]) -> ArchivingPatch<'a> {
        let mut record_ids = self.live_records();
        record_ids.sort_by_cached_key(|&record| {
            let values: Vec<Value> = sort_columns
                .iter()
                .map(|&col| self.value(record, col))
                .collect();
            encode_key(&values)
        });
        ArchivingPatch {
            snapshot: *self,
            record_ids,
            sort_columns: sort_columns.to_vec(),
        }
    }
}

impl<'a> ArchivingPatch<'a> {
    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }

    pub fn record_ids(&self) -> &[RecordId] {
        &self.record_ids
    }

    /// Records grouped by the store's batch size.
    pub fn chunks(&self) -> std::slice::Chunks<'_, RecordId> {
        self.record_ids.chunks(self.snapshot.batch_size())
    }

    pub fn snapshot(&self) -> &BackfillStoreSnapshot<'a> {
        &self.snapshot
    }

    fn sort_key(&self, record: RecordId) -> Vec<u8> {
        let values: Vec<Value> = self
            .sort_columns
            .iter()
            .map(|&col| self.snapshot.value(record, col))
            .collect();
        encode_key(&values)
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Base(usize),
    Store(RecordId),
}

/// Merge the surviving rows of `new` with the archiving patch into the final
/// batch. Base rows win ties, so rows already archived keep their position.
///
/// With nothing to merge the result shares every column buffer with `new`.
pub fn merge(
    new: &Batch,
    base_row_deleted: &BTreeSet<usize>,
    patch: &ArchivingPatch<'_>,
    schema: &TableSchema,
    memory: &Arc<dyn HostMemoryManager>,
) -> Result<Batch> {
    let complete = schema
        .columns
        .iter()
        .enumerate()
        .all(|(col, def)| def.deleted || new.column(col).is_some());
    if patch.is_empty() && base_row_deleted.is_empty() && complete {
        let columns = schema
            .columns
            .iter()
            .enumerate()
            .map(|(col, def)| if def.deleted { None } else { new.column(col).cloned() })
            .collect();
        return Batch::new(columns);
    }

    let base_rows = (0..new.num_rows())
        .filter(|row| !base_row_deleted.contains(row))
        .map(|row| {
            let values: Vec<Value> = schema
                .sort_columns
                .iter()
                .map(|&col| new.value(row, col))
                .collect();
            (encode_key(&values), Source::Base(row))
        });
    let store_rows = patch
        .chunks()
        .flatten()
        .map(|&record| (patch.sort_key(record), Source::Store(record)));
    let order: Vec<Source> = base_rows
        .merge_by(store_rows, |a, b| a.0 <= b.0)
        .map(|(_, source)| source)
        .collect();

    let vectors = schema
        .columns
        .iter()
        .enumerate()
        .map(|(col, def)| {
            if def.deleted {
                return None;
            }
            let mut vector = ColumnVector::with_capacity(def.data_type, order.len());
            for source in &order {
                vector.push(match *source {
                    Source::Base(row) => new.value(row, col),
                    Source::Store(record) => patch.snapshot().value(record, col),
                });
            }
            Some(vector)
        })
        .collect();

    let merged = Batch::from_vectors(vectors, Some(memory))?;
    tracing::debug!(
        base_rows = new.num_rows() - base_row_deleted.len(),
        store_rows = patch.len(),
        rows = merged.num_rows(),
        "Compacted archive batch"
    );
    Ok(merged)
}
