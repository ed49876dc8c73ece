use crate::batch::RecordId;
use crate::column::Value;
use crate::encoding::encode_key;
use crate::error::{Error, Result};
use crossbeam_skiplist::SkipMap;

/// Encoded primary key → latest record holding that key.
///
/// Keys use the order-preserving key encoding, so iteration is in primary-key
/// order. Readers may iterate while the owning writer inserts.
#[derive(Debug, Default)]
pub struct PrimaryKeyIndex {
    entries: SkipMap<Vec<u8>, RecordId>,
}

impl PrimaryKeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the key of `row` from the primary-key columns. A row missing a
    /// primary-key column cannot be addressed.
    pub fn key_of(row: &[Option<Value>], primary_key_columns: &[usize]) -> Result<Vec<u8>> {
        let values = primary_key_columns
            .iter()
            .map(|&col| match row.get(col) {
                Some(Some(value)) => Ok(value),
                _ => Err(Error::Decode(format!(
                    "row has no value for primary key column {}",
                    col
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(encode_key(values))
    }

    pub fn get(&self, key: &[u8]) -> Option<RecordId> {
        self.entries.get(key).map(|entry| *entry.value())
    }

    /// Point `key` at `record`, replacing any earlier record.
    pub fn upsert(&self, key: Vec<u8>, record: RecordId) {
        self.entries.insert(key, record);
    }

    /// Return the existing record for `key`, or insert `record` and return `None`.
    pub fn find_or_insert(&self, key: Vec<u8>, record: RecordId) -> Option<RecordId> {
        let entry = self.entries.get_or_insert(key, record);
        let existing = *entry.value();
        (existing != record).then_some(existing)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every record currently referenced by the index.
    pub fn records(&self) -> Vec<RecordId> {
        self.entries.iter().map(|entry| *entry.value()).collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
