use super::{COLUMN_HEADER_SIZE, CRC32, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::column::{DataType, Value};
use crate::error::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};

/// Assembles the binary form of an upsert batch row by row.
#[derive(Debug, Default)]
pub struct UpsertBatchBuilder {
    columns: Vec<(u16, DataType)>,
    rows: Vec<Vec<Value>>,
}

impl UpsertBatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column carrying schema column `column_id`. Existing rows get a
    /// null cell for it.
    pub fn add_column(&mut self, column_id: u16, data_type: DataType) -> Result<usize> {
        if self.columns.iter().any(|(id, _)| *id == column_id) {
            return Err(Error::InvalidOperation(format!(
                "column {} already added",
                column_id
            )));
        }
        self.columns.push((column_id, data_type));
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        Ok(self.columns.len() - 1)
    }

    /// Append an all-null row and return its index.
    pub fn add_row(&mut self) -> usize {
        self.rows.push(vec![Value::Null; self.columns.len()]);
        self.rows.len() - 1
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: Value) -> Result<()> {
        let (_, data_type) = *self.columns.get(col).ok_or(Error::ColumnOutOfRange(col))?;
        if let Some(actual) = value.data_type() {
            if actual != data_type {
                return Err(Error::InvalidOperation(format!(
                    "column {} holds {:?}, got {:?}",
                    col, data_type, actual
                )));
            }
        }
        let cells = self.rows.get_mut(row).ok_or_else(|| {
            Error::InvalidOperation(format!("row {} has not been added", row))
        })?;
        cells[col] = value;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let num_rows = self.rows.len();
        let validity_len = num_rows.div_ceil(8);
        let data_len: usize = self
            .columns
            .iter()
            .map(|(_, t)| validity_len + num_rows * t.width())
            .sum();
        let mut buf = Vec::with_capacity(
            HEADER_SIZE + self.columns.len() * COLUMN_HEADER_SIZE + data_len + 4,
        );

        // Writes into a Vec cannot fail.
        let _ = buf.write_u32::<BigEndian>(MAGIC);
        let _ = buf.write_u16::<BigEndian>(FORMAT_VERSION);
        let _ = buf.write_u32::<BigEndian>(num_rows as u32);
        let _ = buf.write_u16::<BigEndian>(self.columns.len() as u16);
        for (column_id, data_type) in &self.columns {
            let _ = buf.write_u16::<BigEndian>(*column_id);
            let _ = buf.write_u8(data_type.code());
        }

        for (col, (_, data_type)) in self.columns.iter().enumerate() {
            let mut validity = vec![0u8; validity_len];
            for (row, cells) in self.rows.iter().enumerate() {
                if !cells[col].is_null() {
                    validity[row / 8] |= 1 << (row % 8);
                }
            }
            buf.extend_from_slice(&validity);

            let width = data_type.width();
            let mask = if width == 8 {
                u64::MAX
            } else {
                (1u64 << (width * 8)) - 1
            };
            for cells in &self.rows {
                let _ = buf.write_uint::<BigEndian>(cells[col].to_bits() & mask, width);
            }
        }

        let checksum = CRC32.checksum(&buf);
        let _ = buf.write_u32::<BigEndian>(checksum);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upsert::UpsertBatch;

    #[test]
    fn test_duplicate_column_rejected() {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(1, DataType::Uint32).unwrap();
        assert!(builder.add_column(1, DataType::Int8).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(1, DataType::Uint32).unwrap();
        let row = builder.add_row();
        assert!(builder.set_value(row, 0, Value::Int64(1)).is_err());
        assert!(builder.set_value(row, 0, Value::Null).is_ok());
        assert!(builder.set_value(row + 1, 0, Value::Uint32(1)).is_err());
        assert!(matches!(
            builder.set_value(row, 4, Value::Uint32(1)),
            Err(Error::ColumnOutOfRange(4))
        ));
    }

    #[test]
    fn test_late_column_backfills_nulls() {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(0, DataType::Uint32).unwrap();
        let row = builder.add_row();
        builder.set_value(row, 0, Value::Uint32(86400)).unwrap();
        let col = builder.add_column(7, DataType::Int8).unwrap();

        let batch = UpsertBatch::new(builder.to_bytes()).unwrap();
        assert_eq!(batch.value(0, 0).unwrap(), Value::Uint32(86400));
        assert_eq!(batch.value(0, col).unwrap(), Value::Null);
    }

    #[test]
    fn test_negative_narrow_values() {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(0, DataType::Int8).unwrap();
        builder.add_column(1, DataType::Int32).unwrap();
        let row = builder.add_row();
        builder.set_value(row, 0, Value::Int8(-128)).unwrap();
        builder.set_value(row, 1, Value::Int32(-1)).unwrap();

        let batch = UpsertBatch::new(builder.to_bytes()).unwrap();
        assert_eq!(batch.value(0, 0).unwrap(), Value::Int8(-128));
        assert_eq!(batch.value(0, 1).unwrap(), Value::Int32(-1));
    }
}
