//! Column type codes and their Arrow format strings.
//!
//! The schema of every batch on the wire is described twice: as an
//! `arrow_schema::DataType` for the Rust side, and as a C-data-interface
//! format string for clients that consume the ABI directly. The two tables
//! below must stay in lockstep.
//!
//! Buffer counts per layout follow the columnar convention: scalar columns
//! carry a validity bitmap and a contents buffer; variable-length columns add
//! a 32-bit offsets buffer between the two; lists carry validity and offsets
//! plus a single child array.

use std::sync::Arc;

use arrow_schema::{DataType, Field};

/// Format string of the struct node at the root of every batch.
pub const STRUCT_FORMAT: &str = "+s";

/// Format string of a list-of-T wrapper column.
pub const LIST_FORMAT: &str = "+l";

/// Name given to the child array of a list column.
pub const LIST_CHILD_NAME: &str = "chunks";

/// The exhaustive set of leaf column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Null,
    Bool,
    Uuid,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
    Binary,
    Utf8,
}

impl ColumnType {
    /// The C-data-interface format string for this type. Bit-exact with the
    /// table clients rely on.
    pub fn format(self) -> &'static str {
        match self {
            ColumnType::Null => "n",
            ColumnType::Bool => "b",
            ColumnType::Uuid => "w:16",
            ColumnType::I8 => "c",
            ColumnType::I16 => "s",
            ColumnType::I32 => "i",
            ColumnType::I64 => "l",
            ColumnType::U8 => "C",
            ColumnType::U16 => "S",
            ColumnType::U32 => "I",
            ColumnType::U64 => "L",
            ColumnType::F16 => "e",
            ColumnType::F32 => "f",
            ColumnType::F64 => "g",
            ColumnType::Binary => "z",
            ColumnType::Utf8 => "u",
        }
    }

    /// Number of buffers in this type's array layout.
    pub fn buffer_count(self) -> usize {
        match self {
            ColumnType::Null => 0,
            ColumnType::Binary | ColumnType::Utf8 => 3,
            _ => 2,
        }
    }

    pub fn data_type(self) -> DataType {
        match self {
            ColumnType::Null => DataType::Null,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Uuid => DataType::FixedSizeBinary(16),
            ColumnType::I8 => DataType::Int8,
            ColumnType::I16 => DataType::Int16,
            ColumnType::I32 => DataType::Int32,
            ColumnType::I64 => DataType::Int64,
            ColumnType::U8 => DataType::UInt8,
            ColumnType::U16 => DataType::UInt16,
            ColumnType::U32 => DataType::UInt32,
            ColumnType::U64 => DataType::UInt64,
            ColumnType::F16 => DataType::Float16,
            ColumnType::F32 => DataType::Float32,
            ColumnType::F64 => DataType::Float64,
            ColumnType::Binary => DataType::Binary,
            ColumnType::Utf8 => DataType::Utf8,
        }
    }

    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        Some(match data_type {
            DataType::Null => ColumnType::Null,
            DataType::Boolean => ColumnType::Bool,
            DataType::FixedSizeBinary(16) => ColumnType::Uuid,
            DataType::Int8 => ColumnType::I8,
            DataType::Int16 => ColumnType::I16,
            DataType::Int32 => ColumnType::I32,
            DataType::Int64 => ColumnType::I64,
            DataType::UInt8 => ColumnType::U8,
            DataType::UInt16 => ColumnType::U16,
            DataType::UInt32 => ColumnType::U32,
            DataType::UInt64 => ColumnType::U64,
            DataType::Float16 => ColumnType::F16,
            DataType::Float32 => ColumnType::F32,
            DataType::Float64 => ColumnType::F64,
            DataType::Binary => ColumnType::Binary,
            DataType::Utf8 => ColumnType::Utf8,
            _ => return None,
        })
    }
}

/// The data type of a list-of-T column. Lists carry validity and offsets at
/// the list level plus one child array holding the concatenated items.
pub fn list_of(inner: ColumnType, nullable_items: bool) -> DataType {
    DataType::List(Arc::new(Field::new(
        LIST_CHILD_NAME,
        inner.data_type(),
        nullable_items,
    )))
}

/// Number of buffers at the list level, excluding the child array.
pub const LIST_BUFFER_COUNT: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_strings_are_bit_exact() {
        let expected = [
            (ColumnType::Null, "n"),
            (ColumnType::Bool, "b"),
            (ColumnType::Uuid, "w:16"),
            (ColumnType::I8, "c"),
            (ColumnType::I16, "s"),
            (ColumnType::I32, "i"),
            (ColumnType::I64, "l"),
            (ColumnType::U8, "C"),
            (ColumnType::U16, "S"),
            (ColumnType::U32, "I"),
            (ColumnType::U64, "L"),
            (ColumnType::F16, "e"),
            (ColumnType::F32, "f"),
            (ColumnType::F64, "g"),
            (ColumnType::Binary, "z"),
            (ColumnType::Utf8, "u"),
        ];
        for (column_type, format) in expected {
            assert_eq!(column_type.format(), format);
        }
        assert_eq!(STRUCT_FORMAT, "+s");
        assert_eq!(LIST_FORMAT, "+l");
    }

    #[test]
    fn buffer_counts_per_layout() {
        assert_eq!(ColumnType::Null.buffer_count(), 0);
        assert_eq!(ColumnType::I64.buffer_count(), 2);
        assert_eq!(ColumnType::Uuid.buffer_count(), 2);
        assert_eq!(ColumnType::Binary.buffer_count(), 3);
        assert_eq!(ColumnType::Utf8.buffer_count(), 3);
        assert_eq!(LIST_BUFFER_COUNT, 2);
    }

    #[test]
    fn data_type_mapping_round_trips() {
        let all = [
            ColumnType::Null,
            ColumnType::Bool,
            ColumnType::Uuid,
            ColumnType::I8,
            ColumnType::I16,
            ColumnType::I32,
            ColumnType::I64,
            ColumnType::U8,
            ColumnType::U16,
            ColumnType::U32,
            ColumnType::U64,
            ColumnType::F16,
            ColumnType::F32,
            ColumnType::F64,
            ColumnType::Binary,
            ColumnType::Utf8,
        ];
        for column_type in all {
            assert_eq!(
                ColumnType::from_data_type(&column_type.data_type()),
                Some(column_type)
            );
        }
        assert_eq!(ColumnType::from_data_type(&DataType::LargeBinary), None);
    }

    #[test]
    fn list_wrapper_names_its_child() {
        match list_of(ColumnType::I64, false) {
            DataType::List(field) => {
                assert_eq!(field.name(), LIST_CHILD_NAME);
                assert_eq!(field.data_type(), &DataType::Int64);
            }
            other => panic!("expected a list type, got {other:?}"),
        }
    }
}
