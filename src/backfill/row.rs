use crate::column::{DataType, Value};
use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::upsert::UpsertBatch;

/// One value slot per schema column. `None` marks a column the row does not
/// carry: absent from the upsert batch, or logically deleted.
pub type Row = Vec<Option<Value>>;

/// Resolves upsert rows against the column rules of a table.
#[derive(Debug, Clone)]
pub struct RowResolver {
    column_deletions: Vec<bool>,
    value_types: Vec<DataType>,
    default_values: Vec<Value>,
}

impl RowResolver {
    pub fn new(schema: &TableSchema) -> Self {
        Self {
            column_deletions: schema.column_deletions(),
            value_types: schema.value_types(),
            default_values: schema.default_values(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.column_deletions.len()
    }

    pub fn is_deleted(&self, column: usize) -> bool {
        self.column_deletions.get(column).copied().unwrap_or(true)
    }

    pub fn value_type(&self, column: usize) -> Option<DataType> {
        self.value_types.get(column).copied()
    }

    /// Decode `row` of `batch` into schema column order. Null cells take the
    /// column default; deleted columns are dropped.
    pub fn resolve(&self, batch: &UpsertBatch, row: usize) -> Result<Row> {
        let mut resolved = vec![None; self.num_columns()];
        for col in 0..batch.num_columns() {
            let column_id = batch.column_id(col)?;
            if column_id >= self.num_columns() {
                return Err(Error::ColumnOutOfRange(column_id));
            }
            if self.column_deletions[column_id] {
                continue;
            }

            let data_type = batch.column_type(col)?;
            if data_type != self.value_types[column_id] {
                return Err(Error::Decode(format!(
                    "column {} is {:?} in the batch but {:?} in the table",
                    column_id, data_type, self.value_types[column_id]
                )));
            }

            let value = batch.value(row, col)?;
            resolved[column_id] = Some(if value.is_null() {
                self.default_values[column_id]
            } else {
                value
            });
        }
        Ok(resolved)
    }

    /// Complete `row` for insertion: absent live columns take their default.
    pub fn materialize(&self, row: &[Option<Value>]) -> Row {
        (0..self.num_columns())
            .map(|col| {
                if self.column_deletions[col] {
                    None
                } else {
                    Some(row.get(col).copied().flatten().unwrap_or(self.default_values[col]))
                }
            })
            .collect()
    }

    /// Overlay `patch` onto `current`. Returns `None` when every value the
    /// patch carries already matches.
    pub fn overlay(&self, current: &[Option<Value>], patch: &[Option<Value>]) -> Option<Row> {
        let mut changed = false;
        let merged = (0..self.num_columns())
            .map(|col| {
                if self.column_deletions[col] {
                    return None;
                }
                let existing = current.get(col).copied().flatten();
                match patch.get(col).copied().flatten() {
                    Some(value) if Some(value) != existing => {
                        changed = true;
                        Some(value)
                    }
                    _ => existing,
                }
            })
            .collect();
        changed.then_some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use crate::upsert::UpsertBatchBuilder;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("time", DataType::Uint32),
                ColumnDef::new("a", DataType::Uint32).default_value(Value::Uint32(7)),
                ColumnDef::new("gone", DataType::Uint32).deleted(true),
                ColumnDef::new("b", DataType::Int8),
            ],
        )
        .primary_key(vec![0])
    }

    fn batch(columns: &[(u16, DataType)], rows: &[Vec<Value>]) -> UpsertBatch {
        let mut builder = UpsertBatchBuilder::new();
        for (id, data_type) in columns {
            builder.add_column(*id, *data_type).unwrap();
        }
        for values in rows {
            let row = builder.add_row();
            for (col, value) in values.iter().enumerate() {
                builder.set_value(row, col, *value).unwrap();
            }
        }
        UpsertBatch::new(builder.to_bytes()).unwrap()
    }

    #[test]
    fn test_resolve_absent_deleted_and_null() {
        let resolver = RowResolver::new(&schema());
        let batch = batch(
            &[(0, DataType::Uint32), (1, DataType::Uint32), (2, DataType::Uint32)],
            &[vec![Value::Uint32(1), Value::Null, Value::Uint32(99)]],
        );

        let row = resolver.resolve(&batch, 0).unwrap();
        assert_eq!(
            row,
            vec![Some(Value::Uint32(1)), Some(Value::Uint32(7)), None, None]
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_column() {
        let resolver = RowResolver::new(&schema());
        let batch = batch(&[(9, DataType::Uint32)], &[vec![Value::Uint32(1)]]);
        assert!(matches!(
            resolver.resolve(&batch, 0),
            Err(Error::ColumnOutOfRange(9))
        ));
    }

    #[test]
    fn test_resolve_rejects_type_mismatch() {
        let resolver = RowResolver::new(&schema());
        let batch = batch(&[(3, DataType::Uint32)], &[vec![Value::Uint32(1)]]);
        let err = resolver.resolve(&batch, 0).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_resolve_row_out_of_range() {
        let resolver = RowResolver::new(&schema());
        let batch = batch(&[(0, DataType::Uint32)], &[vec![Value::Uint32(1)]]);
        assert!(resolver.resolve(&batch, 1).unwrap_err().is_decode());
    }

    #[test]
    fn test_materialize_fills_defaults() {
        let resolver = RowResolver::new(&schema());
        let row = resolver.materialize(&[Some(Value::Uint32(5)), None, Some(Value::Uint32(1)), None]);
        assert_eq!(
            row,
            vec![
                Some(Value::Uint32(5)),
                Some(Value::Uint32(7)),
                None,
                Some(Value::Null)
            ]
        );
    }

    #[test]
    fn test_overlay() {
        let resolver = RowResolver::new(&schema());
        let current = vec![
            Some(Value::Uint32(5)),
            Some(Value::Uint32(1)),
            Some(Value::Uint32(3)),
            Some(Value::Int8(-1)),
        ];

        let same = vec![Some(Value::Uint32(5)), Some(Value::Uint32(1)), None, None];
        assert_eq!(resolver.overlay(&current, &same), None);

        let changed = vec![Some(Value::Uint32(5)), None, None, Some(Value::Int8(4))];
        assert_eq!(
            resolver.overlay(&current, &changed),
            Some(vec![
                Some(Value::Uint32(5)),
                Some(Value::Uint32(1)),
                None,
                Some(Value::Int8(4))
            ])
        );
    }
}
