use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Serialize a value using bincode
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::InvalidOperation(format!("Serialization failed: {}", e)))
}

/// Deserialize a value from a byte slice using bincode
pub fn deserialize<T: for<'a> Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::InvalidState(format!("Deserialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnVector, DataType, Value};

    #[test]
    fn test_column_vector_round_trip() {
        let mut column = ColumnVector::new(DataType::Uint32, 3);
        column.set(0, Value::Uint32(7));
        column.set(2, Value::Uint32(9));

        let decoded: ColumnVector = deserialize(&serialize(&column).unwrap()).unwrap();
        assert_eq!(decoded, column);
        assert_eq!(decoded.get(1), Value::Null);
    }

    #[test]
    fn test_invalid_data() {
        let result: Result<ColumnVector> = deserialize(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}
