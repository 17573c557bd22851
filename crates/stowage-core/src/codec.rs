//! Format codecs: payload ↔ bytes.
//!
//! The codec is pure: it never touches storage. Backends call [`encode`]
//! before any I/O, so a payload that does not fit its format is rejected
//! before a staging file is written or a request is sent.
//!
//! - `pickle`: bincode (objects) or Arrow IPC (tables), gzip-compressed
//! - `joblib`: the same encoding without compression
//! - `parquet`: Arrow → Parquet with LZ4 and the Arrow schema embedded
//! - `json`: line-delimited JSON records, nulls written out so every record
//!   lists every column in order; a table without rows is a single JSON
//!   array of its column names
//! - `file`: pass-through, the backend moves the file itself

use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::json::writer::LineDelimited;
use arrow::json::WriterBuilder;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use bincode::Options;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression as ParquetCompression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::error::StowError;
use crate::format::Format;
use crate::value::{Metadata, Payload, Value};
use crate::Result;

/// Result of encoding a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    /// Serialized bytes ready for upload.
    Buffer(Bytes),
    /// A local file to upload as-is.
    File(PathBuf),
}

/// Binary frame shared by `pickle` and `joblib`.
#[derive(Deserialize)]
enum Frame {
    Object(Value),
    Table(Vec<u8>),
}

/// Borrowing twin of [`Frame`]; variant order must match.
#[derive(Serialize)]
enum FrameRef<'a> {
    Object(&'a Value),
    Table(Vec<u8>),
}

/// Serialize `payload` for `format`.
///
/// Fails with [`StowError::TypeMismatch`] when the payload kind does not
/// fit the format.
pub fn encode(payload: &Payload, format: Format) -> Result<Encoded> {
    match (format, payload) {
        (Format::File, Payload::File(path)) => Ok(Encoded::File(path.clone())),
        (Format::Pickle, Payload::Object(_) | Payload::Table(_)) => {
            let raw = encode_frame(payload)?;
            Ok(Encoded::Buffer(gzip(&raw)?.into()))
        }
        (Format::Joblib, Payload::Object(_) | Payload::Table(_)) => {
            Ok(Encoded::Buffer(encode_frame(payload)?.into()))
        }
        (Format::Parquet, Payload::Table(batch)) => Ok(Encoded::Buffer(write_parquet(batch)?)),
        (Format::Json, Payload::Table(batch)) => Ok(Encoded::Buffer(write_json(batch)?)),
        (format, payload) => Err(type_mismatch(format, payload)),
    }
}

/// Deserialize bytes that were produced by [`encode`] with the same format.
///
/// `columns` projects tabular results and is ignored for object payloads.
/// `file` payloads are materialised by the backend and never pass through
/// here.
pub fn decode(data: Bytes, format: Format, columns: Option<&[String]>) -> Result<Payload> {
    match format {
        Format::Pickle => {
            let raw = gunzip(&data)?;
            decode_frame(&raw, columns)
        }
        Format::Joblib => decode_frame(&data, columns),
        Format::Parquet => read_parquet(data, columns).map(Payload::Table),
        Format::Json => read_json(&data, columns).map(Payload::Table),
        Format::File => Err(StowError::Internal {
            message: "file payloads are not decoded from memory".to_string(),
        }),
    }
}

/// Encode a metadata record with the `joblib` codec.
pub fn encode_metadata(metadata: &Metadata) -> Result<Bytes> {
    let value = Value::Map(metadata.clone());
    match encode(&Payload::Object(value), Format::Joblib)? {
        Encoded::Buffer(bytes) => Ok(bytes),
        Encoded::File(_) => Err(StowError::Internal {
            message: "joblib encoding produced a file".to_string(),
        }),
    }
}

/// Decode a metadata record written by [`encode_metadata`].
pub fn decode_metadata(data: Bytes) -> Result<Metadata> {
    match decode(data, Format::Joblib, None)? {
        Payload::Object(Value::Map(map)) => Ok(map),
        other => Err(StowError::codec_msg(format!(
            "metadata record must be a map, found {other}"
        ))),
    }
}

fn type_mismatch(format: Format, payload: &Payload) -> StowError {
    let expected = match format {
        Format::File => "a local file path",
        Format::Pickle | Format::Joblib => "an object or a table",
        Format::Parquet | Format::Json => "a table",
    };
    StowError::TypeMismatch {
        format: format.to_string(),
        expected: expected.to_string(),
        found: payload.kind().to_string(),
    }
}

fn encode_frame(payload: &Payload) -> Result<Vec<u8>> {
    let frame = match payload {
        Payload::Object(value) => FrameRef::Object(value),
        Payload::Table(batch) => FrameRef::Table(write_ipc(batch)?),
        Payload::File(_) => {
            return Err(StowError::Internal {
                message: "file payload reached the object encoder".to_string(),
            })
        }
    };
    bincode::options()
        .serialize(&frame)
        .map_err(|e| StowError::codec("Failed to serialize object", e))
}

fn decode_frame(raw: &[u8], columns: Option<&[String]>) -> Result<Payload> {
    let frame: Frame = bincode::options()
        .deserialize(raw)
        .map_err(|e| StowError::codec("Failed to deserialize object", e))?;
    match frame {
        Frame::Object(value) => Ok(Payload::Object(value)),
        Frame::Table(ipc) => {
            let batch = read_ipc(&ipc)?;
            match columns {
                Some(cols) => project_columns(&batch, cols).map(Payload::Table),
                None => Ok(Payload::Table(batch)),
            }
        }
    }
}

fn gzip(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| StowError::codec("Failed to compress object", e))?;
    encoder
        .finish()
        .map_err(|e| StowError::codec("Failed to compress object", e))
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| StowError::codec("Failed to decompress object", e))?;
    Ok(raw)
}

fn write_ipc(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), &batch.schema())
        .map_err(|e| StowError::codec("Failed to open Arrow IPC writer", e))?;
    writer
        .write(batch)
        .map_err(|e| StowError::codec("Failed to write Arrow IPC batch", e))?;
    writer
        .finish()
        .map_err(|e| StowError::codec("Failed to finish Arrow IPC stream", e))?;
    writer
        .into_inner()
        .map_err(|e| StowError::codec("Failed to finish Arrow IPC stream", e))
}

fn read_ipc(data: &[u8]) -> Result<RecordBatch> {
    let reader = StreamReader::try_new(Cursor::new(data), None)
        .map_err(|e| StowError::codec("Failed to open Arrow IPC reader", e))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StowError::codec("Failed to read Arrow IPC batch", e))?;
    concat(&schema, &batches)
}

fn write_parquet(batch: &RecordBatch) -> Result<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(ParquetCompression::LZ4)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .map_err(|e| StowError::codec("Failed to create Parquet writer", e))?;
    writer
        .write(batch)
        .map_err(|e| StowError::codec("Failed to write Parquet data", e))?;
    writer
        .close()
        .map_err(|e| StowError::codec("Failed to close Parquet writer", e))?;

    Ok(Bytes::from(buffer))
}

/// Read a Parquet buffer, pushing the projection down into the reader.
///
/// The reader yields projected columns in file order; the result is then
/// reordered to match `columns`.
fn read_parquet(data: Bytes, columns: Option<&[String]>) -> Result<RecordBatch> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| StowError::codec("Failed to open Parquet reader", e))?;

    let (builder, order) = match columns {
        Some(cols) => {
            let file_schema = builder.schema().clone();
            let requested = cols
                .iter()
                .map(|name| column_index(&file_schema, name))
                .collect::<Result<Vec<_>>>()?;

            let mut roots = requested.clone();
            roots.sort_unstable();
            roots.dedup();

            let order = requested
                .iter()
                .map(|idx| roots.iter().position(|root| root == idx).unwrap_or_default())
                .collect::<Vec<_>>();

            let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
            (builder.with_projection(mask), Some(order))
        }
        None => (builder, None),
    };

    let reader = builder
        .build()
        .map_err(|e| StowError::codec("Failed to build Parquet reader", e))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StowError::codec("Failed to read Parquet batch", e))?;
    let merged = concat(&schema, &batches)?;

    match order {
        Some(order) => merged
            .project(&order)
            .map_err(|e| StowError::codec("Failed to reorder projected columns", e)),
        None => Ok(merged),
    }
}

fn write_json(batch: &RecordBatch) -> Result<Bytes> {
    if batch.num_rows() == 0 {
        let names: Vec<&String> = batch.schema_ref().fields().iter().map(|f| f.name()).collect();
        let mut buffer = serde_json::to_vec(&names)
            .map_err(|e| StowError::codec("Failed to write JSON column names", e))?;
        buffer.push(b'\n');
        return Ok(Bytes::from(buffer));
    }

    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(true)
            .build::<_, LineDelimited>(&mut buffer);
        writer
            .write(batch)
            .map_err(|e| StowError::codec("Failed to write JSON records", e))?;
        writer
            .finish()
            .map_err(|e| StowError::codec("Failed to finish JSON records", e))?;
    }
    Ok(Bytes::from(buffer))
}

fn read_json(data: &[u8], columns: Option<&[String]>) -> Result<RecordBatch> {
    let merged = match data.trim_ascii_start().first() {
        Some(b'[') => empty_json_table(data)?,
        _ => read_json_records(data)?,
    };

    match columns {
        Some(cols) => project_columns(&merged, cols),
        None => Ok(merged),
    }
}

/// Columns of a table written without rows. Their types are unknown.
fn empty_json_table(data: &[u8]) -> Result<RecordBatch> {
    let names: Vec<String> = serde_json::from_slice(data.trim_ascii())
        .map_err(|e| StowError::codec("Failed to read JSON column names", e))?;
    let fields: Vec<Field> = names
        .into_iter()
        .map(|name| Field::new(name, DataType::Null, true))
        .collect();
    Ok(RecordBatch::new_empty(Arc::new(Schema::new(fields))))
}

fn read_json_records(data: &[u8]) -> Result<RecordBatch> {
    let (schema, _) = arrow::json::reader::infer_json_schema(Cursor::new(data), None)
        .map_err(|e| StowError::codec("Failed to infer JSON schema", e))?;
    let schema = Arc::new(schema);

    let reader = arrow::json::ReaderBuilder::new(schema.clone())
        .build(Cursor::new(data))
        .map_err(|e| StowError::codec("Failed to open JSON reader", e))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StowError::codec("Failed to read JSON records", e))?;
    concat(&schema, &batches)
}

/// Select `columns` from a batch by name, in the requested order.
pub fn project_columns(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|name| column_index(&schema, name))
        .collect::<Result<Vec<_>>>()?;
    batch
        .project(&indices)
        .map_err(|e| StowError::codec("Failed to project columns", e))
}

fn column_index(schema: &SchemaRef, name: &str) -> Result<usize> {
    schema.index_of(name).map_err(|_| StowError::Schema {
        message: format!("column '{name}' not found"),
    })
}

fn concat(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    arrow::compute::concat_batches(schema, batches)
        .map_err(|e| StowError::codec("Failed to concatenate record batches", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Float64Array, Int64Array, StringArray};
    use std::collections::BTreeMap;

    fn test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("score", DataType::Float64, true),
            Field::new("ok", DataType::Boolean, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["alpha", "beta", "gamma"])),
                Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5])),
                Arc::new(BooleanArray::from(vec![true, false, true])),
            ],
        )
        .unwrap()
    }

    fn test_object() -> Value {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Value::from(vec![1i64, 2, 3]));
        map.insert("label".to_string(), Value::from("run"));
        map.insert("blob".to_string(), Value::Bytes(vec![0, 255, 7]));
        Value::Map(map)
    }

    fn buffer(encoded: Encoded) -> Bytes {
        match encoded {
            Encoded::Buffer(bytes) => bytes,
            Encoded::File(path) => panic!("unexpected file {}", path.display()),
        }
    }

    #[test]
    fn test_pickle_object_roundtrip() {
        let payload = Payload::Object(test_object());
        let data = buffer(encode(&payload, Format::Pickle).unwrap());
        assert_eq!(&data[..2], &[0x1f, 0x8b], "pickle output is gzip");
        assert_eq!(decode(data, Format::Pickle, None).unwrap(), payload);
    }

    #[test]
    fn test_joblib_table_roundtrip() {
        let payload = Payload::Table(test_batch());
        let data = buffer(encode(&payload, Format::Joblib).unwrap());
        assert_eq!(decode(data, Format::Joblib, None).unwrap(), payload);
    }

    #[test]
    fn test_parquet_roundtrip_keeps_schema() {
        let batch = test_batch();
        let data = buffer(encode(&Payload::Table(batch.clone()), Format::Parquet).unwrap());
        let loaded = decode(data, Format::Parquet, None).unwrap().into_table().unwrap();
        assert_eq!(loaded, batch);
    }

    #[test]
    fn test_parquet_projection_uses_requested_order() {
        let data = buffer(encode(&Payload::Table(test_batch()), Format::Parquet).unwrap());
        let columns = vec!["score".to_string(), "id".to_string()];
        let loaded = decode(data, Format::Parquet, Some(&columns))
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(loaded.num_columns(), 2);
        assert_eq!(loaded.schema().field(0).name(), "score");
        assert_eq!(loaded.schema().field(1).name(), "id");
        assert_eq!(loaded.num_rows(), 3);
    }

    #[test]
    fn test_parquet_unknown_column() {
        let data = buffer(encode(&Payload::Table(test_batch()), Format::Parquet).unwrap());
        let columns = vec!["missing".to_string()];
        let err = decode(data, Format::Parquet, Some(&columns)).unwrap_err();
        assert!(matches!(err, StowError::Schema { .. }));
    }

    fn field_names(batch: &RecordBatch) -> Vec<String> {
        batch.schema().fields().iter().map(|f| f.name().clone()).collect()
    }

    #[test]
    fn test_json_roundtrip() {
        let batch = test_batch();
        let data = buffer(encode(&Payload::Table(batch.clone()), Format::Json).unwrap());
        let text = std::str::from_utf8(&data).unwrap();
        assert_eq!(text.lines().count(), 3);

        let loaded = decode(data, Format::Json, None).unwrap().into_table().unwrap();
        assert_eq!(loaded.num_rows(), 3);
        assert_eq!(field_names(&loaded), field_names(&batch));
        for (idx, field) in batch.schema().fields().iter().enumerate() {
            assert_eq!(loaded.schema().field(idx).data_type(), field.data_type());
            assert_eq!(loaded.column(idx).as_ref(), batch.column(idx).as_ref());
        }
    }

    #[test]
    fn test_json_keeps_null_columns_in_place() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Int64, true),
            Field::new("c", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![None, Some(2)])),
                Arc::new(Int64Array::from(vec![10, 20])),
                Arc::new(StringArray::from(vec![None::<&str>, None])),
            ],
        )
        .unwrap();

        let data = buffer(encode(&Payload::Table(batch.clone()), Format::Json).unwrap());
        let first = std::str::from_utf8(&data).unwrap().lines().next().unwrap();
        assert_eq!(first, r#"{"a":null,"b":10,"c":null}"#);

        let loaded = decode(data, Format::Json, None).unwrap().into_table().unwrap();
        assert_eq!(field_names(&loaded), vec!["a", "b", "c"]);
        assert_eq!(loaded.column(0).as_ref(), batch.column(0).as_ref());
        assert_eq!(loaded.column(1).as_ref(), batch.column(1).as_ref());
        let nulls = loaded.column(2).logical_nulls().map(|n| n.null_count());
        assert_eq!(nulls, Some(2));
    }

    #[test]
    fn test_json_empty_table_keeps_columns() {
        let batch = RecordBatch::new_empty(test_batch().schema());
        let data = buffer(encode(&Payload::Table(batch.clone()), Format::Json).unwrap());

        let loaded = decode(data.clone(), Format::Json, None)
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(loaded.num_rows(), 0);
        assert_eq!(field_names(&loaded), field_names(&batch));

        let columns = vec!["score".to_string()];
        let projected = decode(data, Format::Json, Some(&columns))
            .unwrap()
            .into_table()
            .unwrap();
        assert_eq!(field_names(&projected), columns);
    }

    #[test]
    fn test_tabular_formats_reject_objects() {
        let payload = Payload::Object(test_object());
        for format in [Format::Parquet, Format::Json] {
            let err = encode(&payload, format).unwrap_err();
            assert!(matches!(err, StowError::TypeMismatch { .. }), "{format}");
        }
    }

    #[test]
    fn test_file_format_requires_path() {
        let err = encode(&Payload::Object(Value::Null), Format::File).unwrap_err();
        assert!(matches!(err, StowError::TypeMismatch { .. }));

        let path = PathBuf::from("/tmp/model.bin");
        assert_eq!(
            encode(&Payload::File(path.clone()), Format::File).unwrap(),
            Encoded::File(path)
        );
    }

    #[test]
    fn test_corrupt_pickle_rejected() {
        let data = buffer(encode(&Payload::Object(test_object()), Format::Pickle).unwrap());
        let truncated = data.slice(..data.len() / 2);
        assert!(matches!(
            decode(truncated, Format::Pickle, None),
            Err(StowError::Codec { .. })
        ));
        assert!(matches!(
            decode(Bytes::from_static(b"not gzip"), Format::Pickle, None),
            Err(StowError::Codec { .. })
        ));
    }

    #[test]
    fn test_mismatched_format_rejected() {
        let data = buffer(encode(&Payload::Object(test_object()), Format::Joblib).unwrap());
        assert!(decode(data, Format::Pickle, None).is_err());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut metadata = Metadata::new();
        metadata.insert("a".to_string(), Value::Int(1));
        let data = encode_metadata(&metadata).unwrap();
        assert_eq!(decode_metadata(data).unwrap(), metadata);
    }

    #[test]
    fn test_metadata_must_be_map() {
        let data = buffer(encode(&Payload::Object(Value::Int(3)), Format::Joblib).unwrap());
        assert!(matches!(decode_metadata(data), Err(StowError::Codec { .. })));
    }
}
