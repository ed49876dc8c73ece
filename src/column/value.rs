use serde::{Deserialize, Serialize};

const BOOL: u8 = 0x01;
const INT8: u8 = 0x02;
const UINT8: u8 = 0x03;
const INT16: u8 = 0x04;
const UINT16: u8 = 0x05;
const INT32: u8 = 0x06;
const UINT32: u8 = 0x07;
const INT64: u8 = 0x08;
const FLOAT32: u8 = 0x09;
const FLOAT64: u8 = 0x0a;

/// Value kinds a column can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    /// Wire tag used by the upsert batch format.
    pub fn code(self) -> u8 {
        match self {
            DataType::Bool => BOOL,
            DataType::Int8 => INT8,
            DataType::Uint8 => UINT8,
            DataType::Int16 => INT16,
            DataType::Uint16 => UINT16,
            DataType::Int32 => INT32,
            DataType::Uint32 => UINT32,
            DataType::Int64 => INT64,
            DataType::Float32 => FLOAT32,
            DataType::Float64 => FLOAT64,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            BOOL => Some(DataType::Bool),
            INT8 => Some(DataType::Int8),
            UINT8 => Some(DataType::Uint8),
            INT16 => Some(DataType::Int16),
            UINT16 => Some(DataType::Uint16),
            INT32 => Some(DataType::Int32),
            UINT32 => Some(DataType::Uint32),
            INT64 => Some(DataType::Int64),
            FLOAT32 => Some(DataType::Float32),
            FLOAT64 => Some(DataType::Float64),
            _ => None,
        }
    }

    /// Encoded width of one value in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }
}

/// A single cell value. `Null` is an invalid cell of any type.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Uint8(u8),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int8(_) => Some(DataType::Int8),
            Value::Uint8(_) => Some(DataType::Uint8),
            Value::Int16(_) => Some(DataType::Int16),
            Value::Uint16(_) => Some(DataType::Uint16),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Uint32(_) => Some(DataType::Uint32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float32(_) => Some(DataType::Float32),
            Value::Float64(_) => Some(DataType::Float64),
        }
    }

    /// Raw 64-bit slot representation; integers are sign-extended.
    pub fn to_bits(&self) -> u64 {
        match *self {
            Value::Null => 0,
            Value::Bool(b) => b as u64,
            Value::Int8(v) => v as i64 as u64,
            Value::Uint8(v) => v as u64,
            Value::Int16(v) => v as i64 as u64,
            Value::Uint16(v) => v as u64,
            Value::Int32(v) => v as i64 as u64,
            Value::Uint32(v) => v as u64,
            Value::Int64(v) => v as u64,
            Value::Float32(v) => v.to_bits() as u64,
            Value::Float64(v) => v.to_bits(),
        }
    }

    pub fn from_bits(data_type: DataType, bits: u64) -> Self {
        match data_type {
            DataType::Bool => Value::Bool(bits != 0),
            DataType::Int8 => Value::Int8(bits as i8),
            DataType::Uint8 => Value::Uint8(bits as u8),
            DataType::Int16 => Value::Int16(bits as i16),
            DataType::Uint16 => Value::Uint16(bits as u16),
            DataType::Int32 => Value::Int32(bits as i32),
            DataType::Uint32 => Value::Uint32(bits as u32),
            DataType::Int64 => Value::Int64(bits as i64),
            DataType::Float32 => Value::Float32(f32::from_bits(bits as u32)),
            DataType::Float64 => Value::Float64(f64::from_bits(bits)),
        }
    }

    /// Integer view used to derive bucket keys from the time column.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int8(v) => Some(v as i64),
            Value::Uint8(v) => Some(v as i64),
            Value::Int16(v) => Some(v as i64),
            Value::Uint16(v) => Some(v as i64),
            Value::Int32(v) => Some(v as i64),
            Value::Uint32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::Null | Value::Bool(_) | Value::Float32(_) | Value::Float64(_) => None,
        }
    }
}

// Bitwise equality: two cells are the same write when type and bits match.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.data_type() == other.data_type() && self.to_bits() == other.to_bits()
    }
}

impl Eq for Value {}
