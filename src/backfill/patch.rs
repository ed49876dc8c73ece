use crate::batch::RecordId;
use crate::error::{Error, Result};
use crate::job::{BackfillProgress, BackfillStage, JobKey};
use crate::schema::TableSchema;
use crate::upsert::UpsertBatch;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rows of one bucket, in arrival order, drawn from a shared set of upsert
/// batches.
#[derive(Debug, Clone)]
pub struct BackfillPatch {
    pub bucket: i32,
    pub record_ids: Vec<RecordId>,
    pub batches: Arc<[UpsertBatch]>,
}

impl BackfillPatch {
    /// Empty patch for `bucket`.
    pub fn empty(bucket: i32, batches: Arc<[UpsertBatch]>) -> Self {
        Self {
            bucket,
            record_ids: Vec::new(),
            batches,
        }
    }

    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }

    /// Upsert batch and row addressed by `record`.
    pub fn locate(&self, record: RecordId) -> Result<(&UpsertBatch, usize)> {
        let batch = self.batches.get(record.batch as usize).ok_or_else(|| {
            Error::InvalidState(format!(
                "record {:?} points past {} upsert batches",
                record,
                self.batches.len()
            ))
        })?;
        Ok((batch, record.row as usize))
    }
}

/// Split `batches` into one patch per bucket of the time column, in
/// ascending bucket order. Any row without a usable time value fails the whole
/// call.
pub fn create_backfill_patches(
    batches: Arc<[UpsertBatch]>,
    schema: &TableSchema,
    progress: &dyn BackfillProgress,
    key: &JobKey,
) -> Result<Vec<BackfillPatch>> {
    let mut buckets: BTreeMap<i32, Vec<RecordId>> = BTreeMap::new();
    let mut num_records = 0;

    for (batch_idx, batch) in batches.iter().enumerate() {
        let time_col = batch.column_index(schema.time_column).ok_or_else(|| {
            Error::Decode(format!(
                "upsert batch {} has no time column {}",
                batch_idx, schema.time_column
            ))
        })?;

        for row in 0..batch.num_rows() {
            let time = batch.value(row, time_col)?.as_i64().ok_or_else(|| {
                Error::Decode(format!(
                    "row {} of upsert batch {} has no integer time value",
                    row, batch_idx
                ))
            })?;
            buckets
                .entry(schema.bucket_of(time)?)
                .or_default()
                .push(RecordId::new(batch_idx as u32, row as u32));
            num_records += 1;
        }
    }

    let patches: Vec<BackfillPatch> = buckets
        .into_iter()
        .map(|(bucket, record_ids)| BackfillPatch {
            bucket,
            record_ids,
            batches: Arc::clone(&batches),
        })
        .collect();

    let num_patches = patches.len();
    progress.report(key, &|detail| {
        detail.stage = BackfillStage::CreatePatch;
        detail.job.current = num_patches;
        detail.job.total = num_patches;
        detail.job.num_records = num_records;
    });
    tracing::debug!(
        job = %key,
        patches = num_patches,
        records = num_records,
        "Created backfill patches"
    );

    Ok(patches)
}
