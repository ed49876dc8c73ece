//! Per-shard archive state and the backfill entry point.

mod archive;
mod pin;

pub use archive::{ArchiveStore, ArchiveStoreVersion};
pub use pin::{PeerTransferPin, PurgeRange};

use crate::backfill::{create_backfill_patches, BackfillContext, BackfillPatch};
use crate::batch::{ArchiveBatch, Batch};
use crate::collab::{BatchVersionRecord, DiskStore, MetaStore};
use crate::column::ColumnVector;
use crate::error::{Error, Result};
use crate::job::{BackfillProgress, BackfillStage, JobKey};
use crate::memory::HostMemoryManager;
use crate::schema::TableSchema;
use crate::upsert::UpsertBatch;
use pin::PurgeQueue;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// One shard of a table: its archive batches, their versions and the
/// collaborators they are persisted through.
pub struct TableShard {
    table: String,
    shard_id: u32,
    schema: RwLock<Arc<TableSchema>>,
    archive_store: ArchiveStore,
    disk_store: Arc<dyn DiskStore>,
    meta_store: Arc<dyn MetaStore>,
    memory: Arc<dyn HostMemoryManager>,
    purge_queue: Arc<PurgeQueue>,
    // Serializes writers of new archive versions.
    writer: Mutex<()>,
}

impl TableShard {
    pub fn new(
        schema: TableSchema,
        shard_id: u32,
        disk_store: Arc<dyn DiskStore>,
        meta_store: Arc<dyn MetaStore>,
        memory: Arc<dyn HostMemoryManager>,
    ) -> Result<Self> {
        schema.validate()?;
        let table = schema.name.clone();
        Ok(Self {
            purge_queue: Arc::new(PurgeQueue::new(
                table.clone(),
                shard_id,
                Arc::clone(&disk_store),
            )),
            table,
            shard_id,
            schema: RwLock::new(Arc::new(schema)),
            archive_store: ArchiveStore::new(),
            disk_store,
            meta_store,
            memory,
            writer: Mutex::new(()),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn schema(&self) -> Arc<TableSchema> {
        Arc::clone(&self.schema.read().unwrap())
    }

    /// Swap in a new definition of the same table. Backfills already running
    /// keep the schema they started with.
    pub fn update_schema(&self, schema: TableSchema) -> Result<()> {
        if schema.name != self.table {
            return Err(Error::InvalidSchema(format!(
                "shard of table {} cannot take the schema of table {}",
                self.table, schema.name
            )));
        }
        schema.validate()?;
        *self.schema.write().unwrap() = Arc::new(schema);
        tracing::info!(table = %self.table, shard = self.shard_id, "Updated table schema");
        Ok(())
    }

    pub fn archive_store(&self) -> &ArchiveStore {
        &self.archive_store
    }

    /// The current archive version.
    pub fn archive_version(&self) -> Arc<ArchiveStoreVersion> {
        self.archive_store.current_version()
    }

    pub fn memory(&self) -> &Arc<dyn HostMemoryManager> {
        &self.memory
    }

    pub fn backfill_job_key(&self) -> JobKey {
        JobKey::backfill(&self.table, self.shard_id)
    }

    /// Hold off purging superseded versions until the returned pin is dropped.
    pub fn pin_for_peer_data_transfer(&self) -> PeerTransferPin {
        self.purge_queue.pin()
    }

    pub fn peer_transfer_pins(&self) -> usize {
        self.purge_queue.pins()
    }

    /// Purges waiting for peer transfers to finish.
    pub fn pending_purges(&self) -> Vec<PurgeRange> {
        self.purge_queue.pending()
    }

    /// Read `bucket` at `version` from the disk store and make it current.
    pub fn load_archive_batch(&self, bucket: i32, version: u32) -> Result<()> {
        let _writer = self.writer.lock().unwrap();
        let schema = self.schema();
        let vectors = schema
            .columns
            .iter()
            .enumerate()
            .map(|(col, def)| {
                if def.deleted {
                    return Ok(None);
                }
                let mut reader = self.disk_store.open_column_file_for_read(
                    &self.table,
                    col,
                    self.shard_id,
                    bucket,
                    version,
                )?;
                ColumnVector::read_from(&mut reader).map(Some)
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = Batch::from_vectors(vectors, Some(&self.memory))?;

        let rows = batch.num_rows();
        self.archive_store
            .publish([Arc::new(ArchiveBatch::new(bucket, version, batch))]);
        tracing::info!(
            table = %self.table,
            shard = self.shard_id,
            bucket,
            version,
            rows,
            "Loaded archive batch"
        );
        Ok(())
    }

    /// Split `batches` into patches and apply them.
    pub fn backfill(
        &self,
        batches: Vec<UpsertBatch>,
        progress: &dyn BackfillProgress,
        key: &JobKey,
    ) -> Result<()> {
        let patches = create_backfill_patches(batches.into(), &self.schema(), progress, key)?;
        self.create_new_archive_store_version_for_backfill(&patches, progress, key)
    }

    /// Merge every patch into its bucket, persist the changed buckets and
    /// publish them as one new version. Nothing is published unless every
    /// bucket was persisted.
    pub fn create_new_archive_store_version_for_backfill(
        &self,
        patches: &[BackfillPatch],
        progress: &dyn BackfillProgress,
        key: &JobKey,
    ) -> Result<()> {
        let result = self.apply_patches(patches, progress, key);
        if let Err(e) = &result {
            let message = e.to_string();
            progress.report(key, &|detail| detail.job.last_error = Some(message.clone()));
        }
        result
    }

    fn apply_patches(
        &self,
        patches: &[BackfillPatch],
        progress: &dyn BackfillProgress,
        key: &JobKey,
    ) -> Result<()> {
        // Every patch is merged against the version current at entry, so a
        // bucket may appear only once.
        if let Some(pair) = patches.windows(2).find(|pair| pair[0].bucket >= pair[1].bucket) {
            return Err(Error::InvalidOperation(format!(
                "patches must have ascending distinct buckets, got {} then {}",
                pair[0].bucket, pair[1].bucket
            )));
        }

        let _writer = self.writer.lock().unwrap();
        let lock_start = Instant::now();
        let schema = self.schema();
        let current = self.archive_store.current_version();
        let total = patches.len();

        let mut num_records = 0;
        let mut changed: Vec<(Arc<ArchiveBatch>, Option<u32>)> = Vec::new();
        for (i, patch) in patches.iter().enumerate() {
            num_records += patch.len();
            let prior = current.get(patch.bucket).cloned();
            let base = prior.clone().unwrap_or_else(|| {
                Arc::new(ArchiveBatch::new(patch.bucket, 0, Batch::empty(&schema)))
            });

            let mut context = BackfillContext::new(
                Arc::clone(&base),
                patch.clone(),
                Arc::clone(&schema),
                Arc::clone(&self.memory),
            )?;
            context.backfill(progress, key)?;

            if context.is_unchanged() {
                tracing::debug!(job = %key, bucket = patch.bucket, "Backfill left bucket unchanged");
            } else {
                let merged = context.compact()?;
                context.release();
                let version = base.version().checked_add(1).ok_or_else(|| {
                    Error::InvalidState(format!("bucket {} ran out of versions", patch.bucket))
                })?;
                let archive = ArchiveBatch::new(patch.bucket, version, merged);
                self.persist(&schema, &archive, base.version())?;
                changed.push((Arc::new(archive), prior.map(|batch| batch.version())));
            }

            progress.report(key, &|detail| {
                detail.job.current = i + 1;
                detail.job.total = total;
            });
        }

        let num_affected_days = changed.len();
        if !changed.is_empty() {
            let swap = self
                .archive_store
                .publish(changed.iter().map(|(batch, _)| Arc::clone(batch)));
            tracing::info!(
                job = %key,
                buckets = num_affected_days,
                swap_us = swap.as_micros() as u64,
                "Published archive version"
            );

            let purges = changed
                .iter()
                .filter_map(|(batch, prior)| {
                    prior.map(|version| PurgeRange {
                        bucket: batch.bucket(),
                        from_version: version,
                        to_version: version,
                    })
                })
                .collect();
            self.purge_queue.purge(purges);
        }

        let lock_duration = lock_start.elapsed();
        progress.report(key, &|detail| {
            detail.stage = BackfillStage::ApplyPatch;
            detail.job.current = total;
            detail.job.total = total;
            detail.job.num_records = num_records;
            detail.job.num_affected_days = num_affected_days;
            detail.job.lock_duration = lock_duration;
        });
        Ok(())
    }

    fn persist(&self, schema: &TableSchema, archive: &ArchiveBatch, old_version: u32) -> Result<()> {
        let mut num_columns = 0;
        for (col, def) in schema.columns.iter().enumerate() {
            if def.deleted {
                continue;
            }
            let column = archive.batch().column(col).ok_or_else(|| {
                Error::InvalidState(format!(
                    "bucket {} has no buffer for column {}",
                    archive.bucket(),
                    def.name
                ))
            })?;

            let mut writer = self.disk_store.open_column_file_for_write(
                &self.table,
                col,
                self.shard_id,
                archive.bucket(),
                old_version,
                archive.version(),
            )?;
            column.vector().write_to(&mut writer).map_err(|e| match e {
                Error::IoError(e) => Error::WriteError("column file", e),
                other => other,
            })?;
            writer
                .close()
                .map_err(|e| Error::WriteError("column file", e))?;
            num_columns += 1;
        }

        self.meta_store.add_archive_batch_version(
            &self.table,
            self.shard_id,
            &BatchVersionRecord {
                bucket: archive.bucket(),
                old_version,
                new_version: archive.version(),
                num_rows: archive.num_rows(),
                num_columns,
            },
        )?;
        tracing::debug!(
            table = %self.table,
            shard = self.shard_id,
            bucket = archive.bucket(),
            version = archive.version(),
            rows = archive.num_rows(),
            "Persisted archive batch"
        );
        Ok(())
    }
}
