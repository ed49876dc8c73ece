//! Upsert batches: the immutable, columnar unit of client writes.
//!
//! # Format
//!
//! All integers are big-endian.
//!
//! ```text
//! +------------+-------------+--------------+-----------------+
//! | magic:u32  | version:u16 | num_rows:u32 | num_columns:u16 |
//! +------------+-------------+--------------+-----------------+
//! | column_id:u16 | type:u8 |   (repeated num_columns times)
//! +---------------------------------------------------------+
//! | validity bits (ceil(num_rows / 8) bytes) | values        |   (per column)
//! +---------------------------------------------------------+
//! | crc32:u32                                                |
//! +---------------------------------------------------------+
//! ```
//!
//! Values are fixed width per type (see [`DataType::width`]). The checksum
//! covers every byte before it.

pub mod builder;

pub use builder::UpsertBatchBuilder;

use crate::column::{DataType, Value};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use std::io::Cursor;

pub(crate) const MAGIC: u32 = 0x5550_5342;
pub(crate) const FORMAT_VERSION: u16 = 1;
pub(crate) const HEADER_SIZE: usize = 12;
pub(crate) const COLUMN_HEADER_SIZE: usize = 3;
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    column_id: usize,
    data_type: DataType,
    validity_offset: usize,
    values_offset: usize,
}

/// A decoded, validated upsert batch. Cells are read from the encoded buffer
/// on demand.
#[derive(Debug, PartialEq, Eq)]
pub struct UpsertBatch {
    buffer: Vec<u8>,
    num_rows: usize,
    columns: Vec<ColumnLayout>,
}

impl UpsertBatch {
    /// Validate `buffer` and index its columns.
    pub fn new(buffer: Vec<u8>) -> Result<Self> {
        if buffer.len() < HEADER_SIZE + 4 {
            return Err(Error::Decode(format!(
                "upsert batch of {} bytes is shorter than its header",
                buffer.len()
            )));
        }

        let body_len = buffer.len() - 4;
        let checksum = BigEndian::read_u32(&buffer[body_len..]);
        if CRC32.checksum(&buffer[..body_len]) != checksum {
            return Err(Error::InvalidChecksum);
        }

        let mut cursor = Cursor::new(&buffer[..body_len]);
        let magic = cursor.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(Error::Decode(format!("bad magic {:#x}", magic)));
        }
        let version = cursor.read_u16::<BigEndian>()?;
        if version != FORMAT_VERSION {
            return Err(Error::Decode(format!("unsupported version {}", version)));
        }
        let num_rows = cursor.read_u32::<BigEndian>()? as usize;
        let num_columns = cursor.read_u16::<BigEndian>()? as usize;

        let mut headers = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            let column_id = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| Error::Decode("truncated column header".to_string()))?
                as usize;
            let code = cursor
                .read_u8()
                .map_err(|_| Error::Decode("truncated column header".to_string()))?;
            let data_type = DataType::from_code(code)
                .ok_or_else(|| Error::Decode(format!("unknown data type {:#x}", code)))?;
            headers.push((column_id, data_type));
        }

        let validity_len = num_rows.div_ceil(8);
        let mut offset = HEADER_SIZE + num_columns * COLUMN_HEADER_SIZE;
        let mut columns = Vec::with_capacity(num_columns);
        for (column_id, data_type) in headers {
            if columns
                .iter()
                .any(|c: &ColumnLayout| c.column_id == column_id)
            {
                return Err(Error::Decode(format!("duplicate column id {}", column_id)));
            }
            let validity_offset = offset;
            let values_offset = validity_offset + validity_len;
            offset = values_offset + num_rows * data_type.width();
            columns.push(ColumnLayout {
                column_id,
                data_type,
                validity_offset,
                values_offset,
            });
        }

        if offset != body_len {
            return Err(Error::Decode(format!(
                "upsert batch body is {} bytes, layout needs {}",
                body_len, offset
            )));
        }

        Ok(Self {
            buffer,
            num_rows,
            columns,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Schema column id stored at position `col` of this batch.
    pub fn column_id(&self, col: usize) -> Result<usize> {
        self.layout(col).map(|l| l.column_id)
    }

    pub fn column_type(&self, col: usize) -> Result<DataType> {
        self.layout(col).map(|l| l.data_type)
    }

    /// Position of schema column `column_id` inside this batch, if present.
    pub fn column_index(&self, column_id: usize) -> Option<usize> {
        self.columns.iter().position(|c| c.column_id == column_id)
    }

    /// Cell at (`row`, `col`); an invalid cell reads as `Value::Null`.
    pub fn value(&self, row: usize, col: usize) -> Result<Value> {
        let layout = self.layout(col)?;
        if row >= self.num_rows {
            return Err(Error::Decode(format!(
                "row {} out of range, batch has {} rows",
                row, self.num_rows
            )));
        }

        let validity = self.buffer[layout.validity_offset + row / 8];
        if validity & (1 << (row % 8)) == 0 {
            return Ok(Value::Null);
        }

        let width = layout.data_type.width();
        let start = layout.values_offset + row * width;
        let bits = BigEndian::read_uint(&self.buffer[start..start + width], width);
        Ok(Value::from_bits(layout.data_type, bits))
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn layout(&self, col: usize) -> Result<&ColumnLayout> {
        self.columns.get(col).ok_or(Error::ColumnOutOfRange(col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(0, DataType::Uint32).unwrap();
        builder.add_column(3, DataType::Int16).unwrap();
        builder.add_column(5, DataType::Float64).unwrap();
        for i in 0..10u32 {
            let row = builder.add_row();
            builder.set_value(row, 0, Value::Uint32(i * 1000)).unwrap();
            if i % 3 != 0 {
                builder.set_value(row, 1, Value::Int16(-(i as i16))).unwrap();
            }
            builder.set_value(row, 2, Value::Float64(i as f64 / 2.0)).unwrap();
        }
        builder.to_bytes()
    }

    #[test]
    fn test_row_access() {
        let batch = UpsertBatch::new(sample()).unwrap();
        assert_eq!(batch.num_rows(), 10);
        assert_eq!(batch.num_columns(), 3);
        assert_eq!(batch.column_id(1).unwrap(), 3);
        assert_eq!(batch.column_type(2).unwrap(), DataType::Float64);
        assert_eq!(batch.column_index(5), Some(2));
        assert_eq!(batch.column_index(4), None);

        assert_eq!(batch.value(9, 0).unwrap(), Value::Uint32(9000));
        assert_eq!(batch.value(4, 1).unwrap(), Value::Int16(-4));
        assert_eq!(batch.value(3, 1).unwrap(), Value::Null);
        assert_eq!(batch.value(5, 2).unwrap(), Value::Float64(2.5));
    }

    #[test]
    fn test_out_of_range_access() {
        let batch = UpsertBatch::new(sample()).unwrap();
        assert!(matches!(
            batch.value(0, 3),
            Err(Error::ColumnOutOfRange(3))
        ));
        assert!(matches!(batch.column_id(7), Err(Error::ColumnOutOfRange(7))));
        assert!(matches!(batch.value(10, 0), Err(Error::Decode(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = sample();
        bytes[HEADER_SIZE + 1] ^= 0x10;
        assert!(matches!(
            UpsertBatch::new(bytes),
            Err(Error::InvalidChecksum)
        ));
    }

    #[test]
    fn test_truncated_batch() {
        let bytes = sample();
        assert!(UpsertBatch::new(bytes[..8].to_vec()).is_err());

        // Drop a value byte and re-seal the checksum: the layout no longer fits.
        let mut body = bytes[..bytes.len() - 5].to_vec();
        let checksum = CRC32.checksum(&body);
        body.extend_from_slice(&checksum.to_be_bytes());
        let err = UpsertBatch::new(body).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_unknown_type_code() {
        let mut bytes = sample();
        let body_len = bytes.len() - 4;
        bytes[HEADER_SIZE + 2] = 0x7f;
        let checksum = CRC32.checksum(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_be_bytes());
        assert!(matches!(UpsertBatch::new(bytes), Err(Error::Decode(_))));
    }

    #[test]
    fn test_empty_batch() {
        let mut builder = UpsertBatchBuilder::new();
        builder.add_column(0, DataType::Uint32).unwrap();
        let batch = UpsertBatch::new(builder.to_bytes()).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
    }
}
