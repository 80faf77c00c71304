//! Wire and artifact encodings.
//!
//! Messages travel as JSON. Map artifacts are Parquet files with a `key`
//! (Utf8) and a `value` (UInt64) column; reduce artifacts and the final
//! result are `key,value` text lines.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use csv::{ReaderBuilder, WriterBuilder};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::{IntermediateRecord, ReduceResult};

pub fn to_json<T: Serialize + ?Sized>(msg: &T) -> Result<Bytes> {
    serde_json::to_vec(msg)
        .map(Bytes::from)
        .map_err(|e| Error::codec("encode message", e))
}

/// Decode a JSON payload. A payload of the wrong shape is a validation
/// failure, not a transport failure.
pub fn from_json<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
    serde_json::from_slice(buf).map_err(|e| Error::Validation(format!("malformed payload: {e}")))
}

/////////////////////////////////////////////////////////////////////////////
// Parquet map artifacts
/////////////////////////////////////////////////////////////////////////////

fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::UInt64, false),
    ]))
}

/// Encode intermediate records as a Snappy-compressed Parquet file.
pub fn encode_records(records: &[IntermediateRecord]) -> Result<Bytes> {
    let schema = record_schema();
    let keys = StringArray::from_iter_values(records.iter().map(|r| r.key.as_str()));
    let values = UInt64Array::from_iter_values(records.iter().map(|r| r.value));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(keys) as ArrayRef, Arc::new(values) as ArrayRef],
    )
    .map_err(|e| Error::codec("build record batch", e))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| Error::codec("open parquet writer", e))?;
    writer
        .write(&batch)
        .map_err(|e| Error::codec("write parquet batch", e))?;
    // The footer is only written on close.
    writer
        .close()
        .map_err(|e| Error::codec("finish parquet file", e))?;
    Ok(Bytes::from(buf))
}

/// Decode every row group of a Parquet map artifact.
pub fn decode_records(buf: Bytes) -> Result<Vec<IntermediateRecord>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(buf)
        .map_err(|e| Error::codec("open parquet file", e))?
        .build()
        .map_err(|e| Error::codec("read parquet file", e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::codec("read parquet batch", e))?;
        let keys = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::Validation("map artifact key column is not Utf8".into()))?;
        let values = batch
            .column(1)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| Error::Validation("map artifact value column is not UInt64".into()))?;
        records.reserve(keys.len());
        for i in 0..keys.len() {
            records.push(IntermediateRecord::new(keys.value(i), values.value(i)));
        }
    }
    Ok(records)
}

/////////////////////////////////////////////////////////////////////////////
// CSV results
/////////////////////////////////////////////////////////////////////////////

/// Finish an in-memory CSV writer.
pub(crate) fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Bytes> {
    writer
        .into_inner()
        .map(Bytes::from)
        .map_err(|e| Error::codec("finish csv", e.into_error()))
}

/// Encode results as headerless `key,value` CSV rows. Keys are quoted
/// whenever they contain a delimiter, a quote or a line break.
pub fn encode_results(results: &[ReduceResult]) -> Result<Bytes> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for r in results {
        writer
            .serialize(r)
            .map_err(|e| Error::codec("write result row", e))?;
    }
    finish_csv(writer)
}

pub fn decode_results(buf: Bytes) -> Result<Vec<ReduceResult>> {
    ReaderBuilder::new()
        .has_headers(false)
        .from_reader(&buf[..])
        .deserialize()
        .map(|row| row.map_err(|e| Error::Validation(format!("malformed result row: {e}"))))
        .collect()
}
