use crate::column::{DataType, Value};
use crate::config::TableConfig;
use crate::error::{Error, Result};

/// One column of a table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Logically deleted columns keep their slot but are never read or written.
    pub deleted: bool,
    /// Value used when an insert does not carry this column.
    pub default_value: Value,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            deleted: false,
            default_value: Value::Null,
        }
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }
}

/// Read-only table definition consumed by the backfill engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key_columns: Vec<usize>,
    /// Archive batches are ordered by these columns, in this order.
    pub sort_columns: Vec<usize>,
    /// Integer column whose value determines the bucket of a row.
    pub time_column: usize,
    pub config: TableConfig,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key_columns: Vec::new(),
            sort_columns: Vec::new(),
            time_column: 0,
            config: TableConfig::default(),
        }
    }

    pub fn primary_key(mut self, columns: Vec<usize>) -> Self {
        self.primary_key_columns = columns;
        self
    }

    pub fn sort_columns(mut self, columns: Vec<usize>) -> Self {
        self.sort_columns = columns;
        self
    }

    pub fn time_column(mut self, column: usize) -> Self {
        self.time_column = column;
        self
    }

    pub fn config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_deletions(&self) -> Vec<bool> {
        self.columns.iter().map(|c| c.deleted).collect()
    }

    pub fn value_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    pub fn default_values(&self) -> Vec<Value> {
        self.columns.iter().map(|c| c.default_value).collect()
    }

    pub fn is_sort_column(&self, column: usize) -> bool {
        self.sort_columns.contains(&column)
    }

    /// Bucket holding rows whose time column equals `time`. Times whose
    /// bucket does not fit an `i32` are a decode error.
    pub fn bucket_of(&self, time: i64) -> Result<i32> {
        let bucket = time.div_euclid(self.config.bucket_size_seconds as i64);
        i32::try_from(bucket).map_err(|_| {
            Error::Decode(format!(
                "time value {} is outside the bucket range of table {}",
                time, self.name
            ))
        })
    }

    /// Check the invariants the merge relies on.
    pub fn validate(&self) -> Result<()> {
        let num_columns = self.columns.len();
        if self.primary_key_columns.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "table {} has no primary key",
                self.name
            )));
        }
        if self.config.bucket_size_seconds == 0 || self.config.backfill_store_batch_size == 0 {
            return Err(Error::InvalidSchema(format!(
                "table {} has a zero bucket size or backfill batch size",
                self.name
            )));
        }

        let key_columns = self
            .primary_key_columns
            .iter()
            .chain(self.sort_columns.iter())
            .chain(std::iter::once(&self.time_column));
        for &column in key_columns {
            let def = self.columns.get(column).ok_or_else(|| {
                Error::InvalidSchema(format!(
                    "table {} references column {} but has {} columns",
                    self.name, column, num_columns
                ))
            })?;
            if def.deleted {
                return Err(Error::InvalidSchema(format!(
                    "key column {} of table {} is deleted",
                    def.name, self.name
                )));
            }
        }

        let time = &self.columns[self.time_column];
        if matches!(
            time.data_type,
            DataType::Bool | DataType::Float32 | DataType::Float64
        ) {
            return Err(Error::InvalidSchema(format!(
                "time column {} of table {} must be an integer",
                time.name, self.name
            )));
        }

        for def in &self.columns {
            if let Some(data_type) = def.default_value.data_type() {
                if data_type != def.data_type {
                    return Err(Error::InvalidSchema(format!(
                        "default value of column {} is {:?}, expected {:?}",
                        def.name, data_type, def.data_type
                    )));
                }
            }
        }

        Ok(())
    }
}
