use super::{Bitmap, DataType, Value};
use crate::encoding::bincode;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A vector-backed column: one raw 64-bit slot per row plus validity bits.
///
/// Columns are shared between archive versions behind an `Arc` and are never
/// mutated once published; a merge that needs to change one clones it first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnVector {
    data_type: DataType,
    values: Vec<u64>,
    validity: Bitmap,
}

impl ColumnVector {
    /// Column of `len` null cells.
    pub fn new(data_type: DataType, len: usize) -> Self {
        Self {
            data_type,
            values: vec![0; len],
            validity: Bitmap::new(len),
        }
    }

    pub fn from_values(data_type: DataType, values: &[Value]) -> Self {
        let mut column = Self::with_capacity(data_type, values.len());
        for value in values {
            column.push(*value);
        }
        column
    }

    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        Self {
            data_type,
            values: Vec::with_capacity(capacity),
            validity: Bitmap::default(),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, row: usize) -> Value {
        if !self.validity.get(row) {
            return Value::Null;
        }
        Value::from_bits(self.data_type, self.values[row])
    }

    pub fn set(&mut self, row: usize, value: Value) {
        debug_assert!(value.is_null() || value.data_type() == Some(self.data_type));
        self.values[row] = value.to_bits();
        self.validity.set(row, !value.is_null());
    }

    pub fn push(&mut self, value: Value) {
        debug_assert!(value.is_null() || value.data_type() == Some(self.data_type));
        self.values.push(value.to_bits());
        self.validity.push(!value.is_null());
    }

    pub fn null_count(&self) -> usize {
        self.len() - self.validity.count_ones()
    }

    /// Bytes accounted against host memory for this column.
    pub fn memory_bytes(&self) -> usize {
        self.values.len() * 8 + self.validity.memory_bytes()
    }

    /// Column file layout: `len:u32 | bincode(column) | crc32:u32`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        writer.write_u32::<BigEndian>(bytes.len() as u32)?;
        writer.write_all(&bytes)?;
        writer.write_u32::<BigEndian>(CRC32.checksum(&bytes))?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let len = reader.read_u32::<BigEndian>()? as usize;
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        let checksum = reader.read_u32::<BigEndian>()?;
        if CRC32.checksum(&bytes) != checksum {
            return Err(Error::InvalidChecksum);
        }
        let column: ColumnVector = bincode::deserialize(&bytes)?;
        if column.validity.len() != column.values.len() {
            return Err(Error::InvalidState(format!(
                "column file has {} values but {} validity bits",
                column.values.len(),
                column.validity.len()
            )));
        }
        Ok(column)
    }
}
