//! Snapshot codec for [`PassageIndex`](crate::index::PassageIndex).
//!
//! A snapshot is three artifacts, written by the app crate as three files
//! in one directory:
//!
//! | File | Content |
//! |------|---------|
//! | [`MATRIX_FILE`] | dense matrix: header + little-endian f32 payload |
//! | [`RECORDS_FILE`] | ordered passage records as a JSON array |
//! | [`MODEL_FILE`] | embedding model name, UTF-8 text |
//!
//! The sparse index is not part of the snapshot; it is rebuilt from the
//! record contents on load.
//!
//! # Matrix Layout
//!
//! ```text
//! offset  size  field
//! 0       4     magic "DFMX"
//! 4       4     format version (u32 LE)
//! 8       4     rows (u32 LE)
//! 12      4     dims (u32 LE)
//! 16      4·r·d f32 values, row-major, little-endian
//! ```

use crate::dense::DenseMatrix;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::IndexError;
use crate::models::PassageRecord;

pub const MATRIX_FILE: &str = "embeddings.bin";
pub const RECORDS_FILE: &str = "passages.json";
pub const MODEL_FILE: &str = "model.txt";

const MAGIC: &[u8; 4] = b"DFMX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// In-memory form of a persisted index.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub model_name: String,
    pub matrix: DenseMatrix,
    pub records: Vec<PassageRecord>,
}

impl Snapshot {
    /// Check the lock-step invariant between records and matrix rows.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.records.len() != self.matrix.rows() {
            return Err(IndexError::corrupt(format!(
                "{} passage records but {} matrix rows",
                self.records.len(),
                self.matrix.rows()
            )));
        }
        Ok(())
    }
}

pub fn encode_matrix(matrix: &DenseMatrix) -> Vec<u8> {
    let payload = vec_to_blob(matrix.as_flat());
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(matrix.rows() as u32).to_le_bytes());
    bytes.extend_from_slice(&(matrix.dims() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes
}

pub fn decode_matrix(bytes: &[u8]) -> Result<DenseMatrix, IndexError> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::corrupt("matrix file shorter than header"));
    }
    if &bytes[0..4] != MAGIC {
        return Err(IndexError::corrupt("bad matrix magic"));
    }
    let version = read_u32(&bytes[4..8]);
    if version != FORMAT_VERSION {
        return Err(IndexError::corrupt(format!(
            "unsupported matrix format version {}",
            version
        )));
    }
    let rows = read_u32(&bytes[8..12]) as usize;
    let dims = read_u32(&bytes[12..16]) as usize;

    let payload = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| IndexError::corrupt("matrix header overflows"))?;
    if payload.len() != expected {
        return Err(IndexError::corrupt(format!(
            "matrix payload is {} bytes, header declares {}",
            payload.len(),
            expected
        )));
    }

    DenseMatrix::from_flat(dims, blob_to_vec(payload))
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

pub fn encode_records(records: &[PassageRecord]) -> Result<Vec<u8>, IndexError> {
    serde_json::to_vec(records).map_err(|e| IndexError::corrupt(format!("encode records: {}", e)))
}

pub fn decode_records(bytes: &[u8]) -> Result<Vec<PassageRecord>, IndexError> {
    serde_json::from_slice(bytes).map_err(|e| IndexError::corrupt(format!("decode records: {}", e)))
}

pub fn encode_model(model_name: &str) -> Vec<u8> {
    format!("{}\n", model_name).into_bytes()
}

pub fn decode_model(bytes: &[u8]) -> Result<String, IndexError> {
    let s = std::str::from_utf8(bytes)
        .map_err(|e| IndexError::corrupt(format!("model name is not UTF-8: {}", e)))?
        .trim();
    if s.is_empty() {
        return Err(IndexError::corrupt("empty model name"));
    }
    Ok(s.to_string())
}
