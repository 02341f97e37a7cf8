//! Input column extraction.
//!
//! Handlers read their arguments out of the request batch as strided views:
//! fixed-width columns become `Strided` slices over the array values, and
//! variable-length columns become `BytesSpan`s over validity, offsets and
//! contents. A missing column is reported as `None` so the caller can decide
//! whether it was required; a column of the wrong type is an error naming
//! the expected format string.

use arrow_array::{Array, ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field};

use crate::columnar::format::ColumnType;
use crate::columnar::{names, SEPARATOR_METADATA_KEY};
use crate::engine::{BytesSpan, CollectionId, Strided, MAIN_COLLECTION};
use crate::error::ServerError;

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Option<(&'a Field, &'a ArrayRef)> {
    let (index, field) = batch.schema_ref().column_with_name(name)?;
    Some((field, batch.column(index)))
}

fn wrong_format(name: &str, expected: ColumnType) -> ServerError {
    ServerError::invalid_argument(format!(
        "column {name} must have format '{}'",
        expected.format()
    ))
}

fn reject_nulls(name: &str, array: &dyn Array) -> Result<(), ServerError> {
    if array.null_count() != 0 {
        return Err(ServerError::invalid_argument(format!(
            "column {name} must not contain nulls"
        )));
    }
    Ok(())
}

/// An `i64` key column as a strided view.
pub fn keys_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<Strided<'a, i64>>, ServerError> {
    let Some((_, array)) = column(batch, name) else {
        return Ok(None);
    };
    let keys = array
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| wrong_format(name, ColumnType::I64))?;
    reject_nulls(name, keys)?;
    Ok(Some(Strided::Slice(keys.values())))
}

/// A `u32` limits column as a strided view.
pub fn limits_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<Strided<'a, u32>>, ServerError> {
    let Some((_, array)) = column(batch, name) else {
        return Ok(None);
    };
    let limits = array
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| wrong_format(name, ColumnType::U32))?;
    reject_nulls(name, limits)?;
    Ok(Some(Strided::Slice(limits.values())))
}

/// The collections argument: a `col` URI parameter broadcasts one id across
/// the batch with a zero stride; otherwise the `cols` column is used, and
/// with neither present everything targets the main collection.
pub fn collections_input<'a>(
    batch: &'a RecordBatch,
    param: Option<CollectionId>,
) -> Result<Strided<'a, CollectionId>, ServerError> {
    if let Some(id) = param {
        return Ok(Strided::Broadcast(id));
    }
    let Some((_, array)) = column(batch, names::COLS) else {
        return Ok(Strided::Broadcast(MAIN_COLLECTION));
    };
    let collections = array
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| wrong_format(names::COLS, ColumnType::U64))?;
    reject_nulls(names::COLS, collections)?;
    Ok(Strided::Slice(collections.values()))
}

/// A variable-length column with the path separator carried in its field
/// metadata.
pub struct BytesColumn<'a> {
    pub span: BytesSpan<'a>,
    pub separator: u8,
}

/// A binary or utf8 column as a `BytesSpan`.
pub fn bytes_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<BytesColumn<'a>>, ServerError> {
    let Some((field, array)) = column(batch, name) else {
        return Ok(None);
    };
    let separator = field
        .metadata()
        .get(SEPARATOR_METADATA_KEY)
        .and_then(|value| value.bytes().next())
        .unwrap_or(0);

    let (nulls, offsets, contents) = match array.data_type() {
        DataType::Binary => {
            let bytes = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| wrong_format(name, ColumnType::Binary))?;
            (bytes.nulls(), bytes.value_offsets(), bytes.value_data())
        }
        DataType::Utf8 => {
            let text = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| wrong_format(name, ColumnType::Utf8))?;
            (text.nulls(), text.value_offsets(), text.value_data())
        }
        _ => {
            return Err(ServerError::invalid_argument(format!(
                "column {name} must have format '{}' or '{}'",
                ColumnType::Binary.format(),
                ColumnType::Utf8.format()
            )))
        }
    };

    let validity = match nulls {
        None => None,
        Some(nulls) => {
            let inner = nulls.inner();
            if inner.offset() != 0 {
                return Err(ServerError::invalid_argument(format!(
                    "column {name}: sliced validity buffers are not supported"
                )));
            }
            Some(inner.values())
        }
    };

    Ok(Some(BytesColumn {
        span: BytesSpan::Packed {
            validity,
            offsets,
            contents,
        },
        separator,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use arrow_array::{BinaryArray, Int64Array, UInt64Array};
    use arrow_schema::Schema;

    use super::*;

    fn keys_batch() -> RecordBatch {
        let schema = Schema::new(vec![Field::new(names::KEYS, DataType::Int64, false)]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int64Array::from(vec![34, 35, 36]))],
        )
        .expect("batch")
    }

    #[test]
    fn keys_are_extracted_as_a_slice() {
        let batch = keys_batch();
        let keys = keys_column(&batch, names::KEYS)
            .expect("extract")
            .expect("present");
        assert_eq!(keys.get(0), 34);
        assert_eq!(keys.get(2), 36);
    }

    #[test]
    fn missing_columns_are_reported_as_absent() {
        let batch = keys_batch();
        assert!(keys_column(&batch, names::SCAN_STARTS)
            .expect("extract")
            .is_none());
        assert!(bytes_column(&batch, names::VALS).expect("extract").is_none());
    }

    #[test]
    fn wrong_column_types_name_the_expected_format() {
        let batch = keys_batch();
        let err = limits_column(&batch, names::KEYS).expect_err("type mismatch");
        assert!(err.to_string().contains("'I'"), "{err}");
    }

    #[test]
    fn collections_prefer_the_uri_parameter() {
        let schema = Schema::new(vec![Field::new(names::COLS, DataType::UInt64, false)]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(UInt64Array::from(vec![5, 6]))],
        )
        .expect("batch");

        let broadcast = collections_input(&batch, Some(9)).expect("broadcast");
        assert!(broadcast.is_broadcast());
        assert_eq!(broadcast.get(1), 9);

        let from_column = collections_input(&batch, None).expect("column");
        assert_eq!(from_column.get(1), 6);

        let keys = keys_batch();
        let fallback = collections_input(&keys, None).expect("fallback");
        assert_eq!(fallback.get(0), MAIN_COLLECTION);
    }

    #[test]
    fn bytes_columns_carry_nulls_and_the_separator() {
        let values: Vec<Option<&[u8]>> = vec![Some(b"aa"), None, Some(b"c")];
        let field = Field::new(names::VALS, DataType::Binary, true).with_metadata(
            HashMap::from([(SEPARATOR_METADATA_KEY.to_string(), "/".to_string())]),
        );
        let schema = Schema::new(vec![field]);
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(BinaryArray::from_opt_vec(values))],
        )
        .expect("batch");

        let bytes = bytes_column(&batch, names::VALS)
            .expect("extract")
            .expect("present");
        assert_eq!(bytes.separator, b'/');
        assert_eq!(bytes.span.get(0), Some(&b"aa"[..]));
        assert_eq!(bytes.span.get(1), None);
        assert_eq!(bytes.span.get(2), Some(&b"c"[..]));
    }
}
