//! Output batch assembly.
//!
//! Engine outputs live in the session's arena as plain buffers: packed
//! presence bitmaps, 32-bit offsets and concatenated contents. The builders
//! here wrap them into Arrow arrays under a struct root, one child per
//! logical column. A column is nullable exactly when a validity bitmap is
//! supplied; without one the null count is zero by construction, which is
//! the layout contract clients decode against.

use std::sync::Arc;

use arrow_array::{
    ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow_buffer::{BooleanBuffer, Buffer, NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_schema::{Field, Schema};

use crate::columnar::format::ColumnType;
use crate::error::ServerError;

/// One named output column, carrying its schema node and array.
pub struct OutputColumn {
    field: Field,
    array: ArrayRef,
}

fn null_buffer(validity: Option<&[u8]>, rows: usize) -> Option<NullBuffer> {
    validity.map(|bits| NullBuffer::new(BooleanBuffer::new(Buffer::from(bits.to_vec()), 0, rows)))
}

pub fn u8_column(name: &str, values: &[u8]) -> OutputColumn {
    OutputColumn {
        field: Field::new(name, ColumnType::U8.data_type(), false),
        array: Arc::new(UInt8Array::new(ScalarBuffer::from(values.to_vec()), None)),
    }
}

pub fn u32_column(name: &str, validity: Option<&[u8]>, values: &[u32]) -> OutputColumn {
    let nulls = null_buffer(validity, values.len());
    OutputColumn {
        field: Field::new(name, ColumnType::U32.data_type(), nulls.is_some()),
        array: Arc::new(UInt32Array::new(ScalarBuffer::from(values.to_vec()), nulls)),
    }
}

pub fn u64_column(name: &str, values: &[u64]) -> OutputColumn {
    OutputColumn {
        field: Field::new(name, ColumnType::U64.data_type(), false),
        array: Arc::new(UInt64Array::new(ScalarBuffer::from(values.to_vec()), None)),
    }
}

pub fn i64_column(name: &str, values: &[i64]) -> OutputColumn {
    OutputColumn {
        field: Field::new(name, ColumnType::I64.data_type(), false),
        array: Arc::new(Int64Array::new(ScalarBuffer::from(values.to_vec()), None)),
    }
}

/// A binary column over engine buffers: optional validity bitmap, 32-bit
/// offsets (one more entry than rows) and concatenated contents.
pub fn binary_column(
    name: &str,
    validity: Option<&[u8]>,
    offsets: &[u32],
    contents: &[u8],
) -> Result<OutputColumn, ServerError> {
    let rows = offsets.len().saturating_sub(1);
    let nulls = null_buffer(validity, rows);
    let field = Field::new(name, ColumnType::Binary.data_type(), nulls.is_some());
    let offsets = OffsetBuffer::new(ScalarBuffer::from(
        offsets.iter().map(|&offset| offset as i32).collect::<Vec<_>>(),
    ));
    let array = BinaryArray::try_new(offsets, Buffer::from(contents.to_vec()), nulls)
        .map_err(|err| ServerError::internal(err.to_string()))?;
    Ok(OutputColumn {
        field,
        array: Arc::new(array),
    })
}

/// A utf8 column over engine buffers; contents must be valid UTF-8.
pub fn utf8_column(
    name: &str,
    offsets: &[u32],
    contents: &[u8],
) -> Result<OutputColumn, ServerError> {
    let field = Field::new(name, ColumnType::Utf8.data_type(), false);
    let offsets = OffsetBuffer::new(ScalarBuffer::from(
        offsets.iter().map(|&offset| offset as i32).collect::<Vec<_>>(),
    ));
    let array = StringArray::try_new(offsets, Buffer::from(contents.to_vec()), None)
        .map_err(|err| ServerError::internal(err.to_string()))?;
    Ok(OutputColumn {
        field,
        array: Arc::new(array),
    })
}

/// Assemble columns into a record batch under a struct root.
pub fn batch(columns: Vec<OutputColumn>) -> Result<RecordBatch, ServerError> {
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for column in columns {
        fields.push(column.field);
        arrays.push(column.array);
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|err| ServerError::internal(err.to_string()))
}
