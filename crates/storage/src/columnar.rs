//! The on-disk columnar file format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! Header (32 B): magic | u32 version | u64 record_count | u32 num_columns | "TSDB" | pad
//! Columns, in order:
//!   each column = u32 encoding_tag | u32 payload_len | payload
//!     tag 1 -> codec-compressed (timestamp, value)
//!     tag 2 -> length-prefixed UTF-8 (device_id, metric)
//! Footer: u32 meta_version | u32 num_columns | per column:
//!   u32 name_len | name | u32 type | u64 offset | u64 size | u64 record_count
//! Trailer: u32 footer_size (the last 4 bytes of the file)
//! ```
//!
//! Version 1 files carry only the timestamp and value columns; readers
//! fill the string fields with empty strings and keep the records.

use pulse_common::Record;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const MAGIC: u32 = 0x5041_5251;
pub const FORMAT_VERSION: u32 = 2;
pub const HEADER_SIZE: usize = 32;
pub const METADATA_VERSION: u32 = 1;

const FILE_TAG: &[u8; 4] = b"TSDB";
const ENCODING_COMPRESSED: u32 = 1;
const ENCODING_STRINGS: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    #[error("columnar I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no records to write")]
    Empty,
    #[error("invalid magic number {0:#010x}")]
    BadMagic(u32),
    #[error("file corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone)]
struct ColumnMeta {
    name: String,
    encoding: u32,
    offset: u64,
    size: u64,
    record_count: u64,
}

/// Reader/writer for one node's columnar data file.
#[derive(Debug, Clone)]
pub struct ColumnarFile {
    path: PathBuf,
}

impl ColumnarFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the file. Missing file is not an error.
    pub fn remove(&self) -> Result<(), ColumnarError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Write
    // -----------------------------------------------------------------------

    /// Serialize `records` and replace the file contents.
    ///
    /// The input must be non-empty; deleting everything removes the file
    /// instead of writing an empty one.
    pub fn write(&self, records: &[Record]) -> Result<(), ColumnarError> {
        if records.is_empty() {
            return Err(ColumnarError::Empty);
        }

        let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        let devices: Vec<&str> = records.iter().map(|r| r.device_id.as_str()).collect();
        let metrics: Vec<&str> = records.iter().map(|r| r.metric_name.as_str()).collect();

        let columns = [
            ("timestamp", encode_column(ENCODING_COMPRESSED, pulse_codec::encode_timestamps(&timestamps))),
            ("value", encode_column(ENCODING_COMPRESSED, pulse_codec::encode_values(&values))),
            ("device_id", encode_column(ENCODING_STRINGS, encode_strings(&devices))),
            ("metric", encode_column(ENCODING_STRINGS, encode_strings(&metrics))),
        ];

        let mut buf = Vec::with_capacity(HEADER_SIZE + columns.iter().map(|(_, c)| c.len()).sum::<usize>() + 256);
        buf.extend_from_slice(&build_header(records.len(), columns.len() as u32));

        let mut metas = Vec::with_capacity(columns.len());
        for (name, column) in &columns {
            let encoding = u32::from_le_bytes(column[0..4].try_into().expect("column header"));
            metas.push(ColumnMeta {
                name: (*name).to_string(),
                encoding,
                offset: buf.len() as u64,
                size: column.len() as u64,
                record_count: records.len() as u64,
            });
            buf.extend_from_slice(column);
        }

        let footer = build_footer(&metas);
        buf.extend_from_slice(&footer);
        buf.extend_from_slice(&(footer.len() as u32).to_le_bytes());

        fs::write(&self.path, &buf)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Read and decode every record in the file.
    pub fn read(&self) -> Result<Vec<Record>, ColumnarError> {
        let data = fs::read(&self.path)?;

        if data.len() < HEADER_SIZE + 4 {
            return Err(ColumnarError::Corrupt("file too small".into()));
        }

        let magic = read_u32(&data, 0)?;
        if magic != MAGIC {
            return Err(ColumnarError::BadMagic(magic));
        }
        let version = read_u32(&data, 4)?;
        let record_count = read_u64(&data, 8)? as usize;

        let trailer_offset = data.len() - 4;
        let footer_size = read_u32(&data, trailer_offset)? as usize;
        let footer_start = trailer_offset
            .checked_sub(footer_size)
            .ok_or_else(|| ColumnarError::Corrupt("footer size exceeds file".into()))?;
        if footer_start < HEADER_SIZE {
            return Err(ColumnarError::Corrupt("footer overlaps header".into()));
        }

        let footer = &data[footer_start..trailer_offset];
        let metas = parse_footer(footer)?;
        if metas.len() < 2 {
            return Err(ColumnarError::Corrupt(format!(
                "expected at least 2 columns, found {}",
                metas.len()
            )));
        }

        let timestamps = {
            let payload = column_payload(&data, &metas[0])?;
            pulse_codec::decode_timestamps(payload, record_count)
        };
        let values = {
            let payload = column_payload(&data, &metas[1])?;
            pulse_codec::decode_values(payload, record_count)
        };

        if timestamps.len() != record_count || values.len() != record_count {
            return Err(ColumnarError::Corrupt(format!(
                "decoded {} timestamps / {} values for {} declared records",
                timestamps.len(),
                values.len(),
                record_count
            )));
        }

        // v1 / 2-column files have no string columns; keep the records
        // with empty device and metric.
        let (devices, metrics) = if version >= 2 && metas.len() >= 4 {
            let devices = decode_strings(column_payload(&data, &metas[2])?, record_count)?;
            let metrics = decode_strings(column_payload(&data, &metas[3])?, record_count)?;
            (devices, metrics)
        } else {
            (vec![String::new(); record_count], vec![String::new(); record_count])
        };

        let records = timestamps
            .into_iter()
            .zip(values)
            .zip(devices.into_iter().zip(metrics))
            .map(|((timestamp, value), (device_id, metric_name))| Record {
                timestamp,
                value,
                device_id,
                metric_name,
            })
            .collect();

        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn build_header(record_count: usize, num_columns: u32) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&(record_count as u64).to_le_bytes());
    header[16..20].copy_from_slice(&num_columns.to_le_bytes());
    header[20..24].copy_from_slice(FILE_TAG);
    header
}

fn encode_column(encoding: u32, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&encoding.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

fn encode_strings(strings: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + strings.iter().map(|s| 4 + s.len()).sum::<usize>());
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for s in strings {
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    }
    out
}

fn build_footer(metas: &[ColumnMeta]) -> Vec<u8> {
    let mut footer = Vec::with_capacity(256);
    footer.extend_from_slice(&METADATA_VERSION.to_le_bytes());
    footer.extend_from_slice(&(metas.len() as u32).to_le_bytes());
    for meta in metas {
        footer.extend_from_slice(&(meta.name.len() as u32).to_le_bytes());
        footer.extend_from_slice(meta.name.as_bytes());
        footer.extend_from_slice(&meta.encoding.to_le_bytes());
        footer.extend_from_slice(&meta.offset.to_le_bytes());
        footer.extend_from_slice(&meta.size.to_le_bytes());
        footer.extend_from_slice(&meta.record_count.to_le_bytes());
    }
    footer
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

fn read_u32(data: &[u8], offset: usize) -> Result<u32, ColumnarError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes(b.try_into().expect("4-byte slice")))
        .ok_or_else(|| ColumnarError::Corrupt(format!("u32 read out of bounds at {offset}")))
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64, ColumnarError> {
    data.get(offset..offset + 8)
        .map(|b| u64::from_le_bytes(b.try_into().expect("8-byte slice")))
        .ok_or_else(|| ColumnarError::Corrupt(format!("u64 read out of bounds at {offset}")))
}

fn parse_footer(footer: &[u8]) -> Result<Vec<ColumnMeta>, ColumnarError> {
    let num_columns = read_u32(footer, 4)? as usize;
    let mut metas = Vec::with_capacity(num_columns);
    let mut pos = 8;

    for _ in 0..num_columns {
        let name_len = read_u32(footer, pos)? as usize;
        pos += 4;
        let name_bytes = footer
            .get(pos..pos + name_len)
            .ok_or_else(|| ColumnarError::Corrupt("column name out of bounds".into()))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| ColumnarError::Corrupt("column name is not UTF-8".into()))?
            .to_string();
        pos += name_len;

        let encoding = read_u32(footer, pos)?;
        pos += 4;
        let offset = read_u64(footer, pos)?;
        pos += 8;
        let size = read_u64(footer, pos)?;
        pos += 8;
        let record_count = read_u64(footer, pos)?;
        pos += 8;

        metas.push(ColumnMeta {
            name,
            encoding,
            offset,
            size,
            record_count,
        });
    }

    Ok(metas)
}

/// Slice out a column's payload, past its 8-byte tag/length header.
fn column_payload<'a>(data: &'a [u8], meta: &ColumnMeta) -> Result<&'a [u8], ColumnarError> {
    let start = meta.offset as usize;
    let end = start
        .checked_add(meta.size as usize)
        .ok_or_else(|| ColumnarError::Corrupt("column extent overflows".into()))?;
    let column = data.get(start..end).ok_or_else(|| {
        ColumnarError::Corrupt(format!("column '{}' out of bounds", meta.name))
    })?;
    if column.len() < 8 {
        return Err(ColumnarError::Corrupt(format!(
            "column '{}' shorter than its header",
            meta.name
        )));
    }
    Ok(&column[8..])
}

fn decode_strings(payload: &[u8], expected: usize) -> Result<Vec<String>, ColumnarError> {
    let declared = read_u32(payload, 0)? as usize;
    if declared != expected {
        return Err(ColumnarError::Corrupt(format!(
            "string column declares {declared} entries, header says {expected}"
        )));
    }

    let mut out = Vec::with_capacity(declared);
    let mut pos = 4;
    for _ in 0..declared {
        let len = read_u32(payload, pos)? as usize;
        pos += 4;
        let bytes = payload
            .get(pos..pos + len)
            .ok_or_else(|| ColumnarError::Corrupt("string entry out of bounds".into()))?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| ColumnarError::Corrupt("string entry is not UTF-8".into()))?;
        out.push(s.to_string());
        pos += len;
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
