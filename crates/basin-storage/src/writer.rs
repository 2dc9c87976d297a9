//! Record Writers
//!
//! A [`RecordWriter`] serializes records into one temp artifact; the pipeline
//! opens a fresh writer per rotation and never looks inside it. Writers
//! buffer serialized bytes in memory and materialize the artifact with a
//! single `Storage::put` on [`RecordWriter::close`], so a writer abandoned
//! mid-rotation leaves nothing at the temp path for recovery to clean up.
//!
//! Two formats ship with the sink:
//!
//! - **NDJSON** - one JSON document per record with the record's metadata and
//!   payload.
//! - **Avro** - an Avro object container file with a fixed record schema.
//!
//! The format is selected once at startup via [`create_writer_provider`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use basin_core::SinkRecord;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Serializes records to an open temp artifact.
#[async_trait]
pub trait RecordWriter: Send {
    /// Append a single record. `timestamp` is the wall-clock write time.
    async fn write(&mut self, timestamp: u64, record: &SinkRecord) -> Result<()>;

    /// Flush and materialize the artifact at its temp path.
    async fn close(&mut self) -> Result<()>;
}

/// Chooses the on-disk format and produces writers for temp artifacts.
#[async_trait]
pub trait RecordWriterProvider: Send + Sync {
    /// File extension of committed artifacts in this format.
    fn extension(&self) -> &str;

    /// Open a writer for a new temp artifact at `path`.
    async fn new_writer(
        &self,
        storage: Arc<dyn Storage>,
        path: &str,
        first_record: &SinkRecord,
    ) -> Result<Box<dyn RecordWriter>>;
}

/// Build a [`RecordWriterProvider`] from a configured format name.
pub fn create_writer_provider(format: &str) -> Result<Arc<dyn RecordWriterProvider>> {
    match format.to_lowercase().as_str() {
        "json" | "ndjson" => Ok(Arc::new(NdjsonWriterProvider)),
        "avro" => Ok(Arc::new(AvroWriterProvider::new()?)),
        other => Err(Error::Unsupported(format!(
            "unknown record writer format '{}'",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// NDJSON
// ---------------------------------------------------------------------------

/// Newline-delimited JSON, one document per record.
pub struct NdjsonWriterProvider;

#[async_trait]
impl RecordWriterProvider for NdjsonWriterProvider {
    fn extension(&self) -> &str {
        "json"
    }

    async fn new_writer(
        &self,
        storage: Arc<dyn Storage>,
        path: &str,
        _first_record: &SinkRecord,
    ) -> Result<Box<dyn RecordWriter>> {
        Ok(Box::new(NdjsonRecordWriter {
            storage,
            path: path.to_string(),
            buf: Vec::new(),
        }))
    }
}

struct NdjsonRecordWriter {
    storage: Arc<dyn Storage>,
    path: String,
    buf: Vec<u8>,
}

#[async_trait]
impl RecordWriter for NdjsonRecordWriter {
    async fn write(&mut self, _timestamp: u64, record: &SinkRecord) -> Result<()> {
        let doc = serde_json::json!({
            "topic": record.topic,
            "partition": record.partition,
            "offset": record.offset,
            "timestamp": record.timestamp,
            "key": record.key.as_ref().map(|k| String::from_utf8_lossy(k).to_string()),
            "value": String::from_utf8_lossy(&record.value).to_string(),
        });
        serde_json::to_writer(&mut self.buf, &doc)
            .map_err(|e| Error::Serialization(format!("JSON write error: {}", e)))?;
        self.buf.push(b'\n');
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.storage
            .put(&self.path, Bytes::from(self.buf.clone()))
            .await
    }
}

// ---------------------------------------------------------------------------
// Avro
// ---------------------------------------------------------------------------

const AVRO_SCHEMA: &str = r#"{
    "type": "record",
    "name": "SinkRecord",
    "fields": [
        {"name": "topic", "type": "string"},
        {"name": "partition", "type": "int"},
        {"name": "offset", "type": "long"},
        {"name": "timestamp", "type": "long"},
        {"name": "key", "type": ["null", "bytes"], "default": null},
        {"name": "value", "type": "bytes"}
    ]
}"#;

/// Avro object container files with a fixed `SinkRecord` schema.
pub struct AvroWriterProvider {
    schema: apache_avro::Schema,
}

impl AvroWriterProvider {
    pub fn new() -> Result<Self> {
        let schema = apache_avro::Schema::parse_str(AVRO_SCHEMA)
            .map_err(|e| Error::Serialization(format!("Avro schema error: {}", e)))?;
        Ok(Self { schema })
    }
}

#[async_trait]
impl RecordWriterProvider for AvroWriterProvider {
    fn extension(&self) -> &str {
        "avro"
    }

    async fn new_writer(
        &self,
        storage: Arc<dyn Storage>,
        path: &str,
        _first_record: &SinkRecord,
    ) -> Result<Box<dyn RecordWriter>> {
        Ok(Box::new(AvroRecordWriter {
            storage,
            path: path.to_string(),
            schema: self.schema.clone(),
            rows: Vec::new(),
        }))
    }
}

struct AvroRecordWriter {
    storage: Arc<dyn Storage>,
    path: String,
    schema: apache_avro::Schema,
    rows: Vec<apache_avro::types::Value>,
}

#[async_trait]
impl RecordWriter for AvroRecordWriter {
    async fn write(&mut self, _timestamp: u64, record: &SinkRecord) -> Result<()> {
        use apache_avro::types::{Record as AvroRecord, Value};

        let mut row = AvroRecord::new(&self.schema)
            .ok_or_else(|| Error::Serialization("failed to create Avro record".to_string()))?;

        row.put("topic", record.topic.as_str());
        row.put("partition", record.partition as i32);
        row.put("offset", record.offset as i64);
        row.put("timestamp", record.timestamp as i64);

        match &record.key {
            Some(k) => row.put(
                "key",
                Value::Union(1, Box::new(Value::Bytes(k.to_vec()))),
            ),
            None => row.put("key", Value::Union(0, Box::new(Value::Null))),
        }
        row.put("value", Value::Bytes(record.value.to_vec()));

        self.rows.push(row.into());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut writer = apache_avro::Writer::new(&self.schema, Vec::new());
        for row in &self.rows {
            writer
                .append_value_ref(row)
                .map_err(|e| Error::Serialization(format!("Avro write error: {}", e)))?;
        }
        let encoded = writer
            .into_inner()
            .map_err(|e| Error::Serialization(format!("Avro flush error: {}", e)))?;

        self.storage.put(&self.path, Bytes::from(encoded)).await
    }
}
