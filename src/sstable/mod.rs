//! SSTable - Sorted String Table for on-disk storage.
//!
//! SSTables are immutable, sorted files. Once published under their final
//! name they are never modified, only deleted after a compaction replaced
//! their content.
//!
//! # File Format
//!
//! All integers are big-endian.
//!
//! ```text
//! +------------------------------+
//! | Record 0                     |
//! +------------------------------+
//! | ...                          |
//! +------------------------------+
//! | Record N-1                   |
//! +------------------------------+
//! | Offsets   (i64 x N)          |  start of each record within the file
//! +------------------------------+
//! | Row count (i64)              |  last 8 bytes of the file
//! +------------------------------+
//! ```
//!
//! # Record Format
//!
//! ```text
//! key_len: i32 | key | timestamp: i64 | value_len: i32 | value
//! ```
//!
//! A tombstone stores its timestamp negated and has no value block.

mod reader;
mod writer;

pub use reader::{SSTable, SSTableIterator};
pub use writer::{write_table, SSTableInfo, SSTableWriter};

use bytes::BufMut;

use crate::types::{Cell, Timestamp};
use crate::{Error, Result};

/// Size of the trailing row count.
pub const ROW_COUNT_SIZE: usize = 8;

/// Size of one offsets entry.
pub const OFFSET_SIZE: usize = 8;

/// A record decoded in place; slices borrow the table's mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub key: &'a [u8],
    /// `None` for a tombstone.
    pub value: Option<&'a [u8]>,
    pub timestamp: Timestamp,
}

impl RecordRef<'_> {
    /// Copy the versioned value out of the mapping.
    pub fn to_cell(&self) -> Cell {
        match self.value {
            Some(value) => Cell::present(bytes::Bytes::copy_from_slice(value), self.timestamp),
            None => Cell::tombstone(self.timestamp),
        }
    }
}

/// Number of bytes `encode_record` appends.
pub fn encoded_len(key: &[u8], cell: &Cell) -> usize {
    4 + key.len() + 8 + cell.data().map_or(0, |d| 4 + d.len())
}

/// Append one record to `buf`.
pub fn encode_record(buf: &mut impl BufMut, key: &[u8], cell: &Cell) -> Result<()> {
    let key_len = i32::try_from(key.len())
        .map_err(|_| Error::invalid_argument(format!("key of {} bytes is too large", key.len())))?;

    let (timestamp, data) = match cell {
        Cell::Present { data, timestamp } => (*timestamp, Some(data)),
        Cell::Tombstone { timestamp } => (*timestamp, None),
        Cell::Absent => return Err(Error::invalid_argument("absent cells cannot be stored")),
    };
    let timestamp = i64::try_from(timestamp)
        .ok()
        .filter(|ts| *ts > 0)
        .ok_or_else(|| Error::invalid_argument(format!("timestamp {} out of range", timestamp)))?;
    let value_len = match data {
        Some(data) => Some(i32::try_from(data.len()).map_err(|_| {
            Error::invalid_argument(format!("value of {} bytes is too large", data.len()))
        })?),
        None => None,
    };

    buf.put_i32(key_len);
    buf.put_slice(key);
    match (data, value_len) {
        (Some(data), Some(value_len)) => {
            buf.put_i64(timestamp);
            buf.put_i32(value_len);
            buf.put_slice(data);
        }
        _ => buf.put_i64(-timestamp),
    }
    Ok(())
}

/// Decode the record starting at `offset` within `body`.
pub fn decode_record(body: &[u8], offset: usize) -> Result<RecordRef<'_>> {
    let mut pos = offset;

    let key_len = read_i32(body, &mut pos)?;
    let key_len = usize::try_from(key_len)
        .map_err(|_| Error::corruption(format!("negative key length at offset {}", offset)))?;
    let key = read_slice(body, &mut pos, key_len)?;

    let raw_timestamp = read_i64(body, &mut pos)?;
    if raw_timestamp < 0 {
        return Ok(RecordRef {
            key,
            value: None,
            timestamp: raw_timestamp.unsigned_abs(),
        });
    }

    let value_len = read_i32(body, &mut pos)?;
    let value_len = usize::try_from(value_len)
        .map_err(|_| Error::corruption(format!("negative value length at offset {}", offset)))?;
    let value = read_slice(body, &mut pos, value_len)?;

    Ok(RecordRef {
        key,
        value: Some(value),
        timestamp: raw_timestamp as u64,
    })
}

fn read_slice<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            Error::corruption(format!(
                "record field of {} bytes at {} overruns {} byte body",
                len,
                pos,
                buf.len()
            ))
        })?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_i32(buf: &[u8], pos: &mut usize) -> Result<i32> {
    let bytes = read_slice(buf, pos, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(i32::from_be_bytes(raw))
}

pub(crate) fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let bytes = read_slice(buf, pos, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_record_layout() {
        let mut buf = Vec::new();
        encode_record(&mut buf, b"key", &Cell::present(Bytes::from("value"), 42)).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&3i32.to_be_bytes());
        expected.extend_from_slice(b"key");
        expected.extend_from_slice(&42i64.to_be_bytes());
        expected.extend_from_slice(&5i32.to_be_bytes());
        expected.extend_from_slice(b"value");
        assert_eq!(buf, expected);
        assert_eq!(buf.len(), encoded_len(b"key", &Cell::present(Bytes::from("value"), 42)));
    }

    #[test]
    fn test_tombstone_layout() {
        let mut buf = Vec::new();
        encode_record(&mut buf, b"k", &Cell::tombstone(9)).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&1i32.to_be_bytes());
        expected.extend_from_slice(b"k");
        expected.extend_from_slice(&(-9i64).to_be_bytes());
        assert_eq!(buf, expected);

        let record = decode_record(&buf, 0).unwrap();
        assert_eq!(record.key, b"k");
        assert_eq!(record.value, None);
        assert_eq!(record.to_cell(), Cell::tombstone(9));
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = Vec::new();
        encode_record(&mut buf, b"a", &Cell::present(Bytes::from("1"), 1)).unwrap();
        let second = buf.len();
        encode_record(&mut buf, b"bb", &Cell::present(Bytes::new(), 2)).unwrap();

        let record = decode_record(&buf, second).unwrap();
        assert_eq!(record.key, b"bb");
        assert_eq!(record.value, Some(&b""[..]));
        assert_eq!(record.timestamp, 2);
    }

    #[test]
    fn test_decode_truncated_is_corruption() {
        let mut buf = Vec::new();
        encode_record(&mut buf, b"key", &Cell::present(Bytes::from("value"), 1)).unwrap();
        buf.truncate(buf.len() - 1);

        assert!(decode_record(&buf, 0).unwrap_err().is_corruption());
        assert!(decode_record(&buf, buf.len() + 10).unwrap_err().is_corruption());
    }

    #[test]
    fn test_encode_rejects_unstorable_cells() {
        let mut buf = Vec::new();
        assert!(encode_record(&mut buf, b"k", &Cell::Absent).is_err());
        assert!(encode_record(&mut buf, b"k", &Cell::tombstone(0)).is_err());
        assert!(encode_record(&mut buf, b"k", &Cell::tombstone(u64::MAX)).is_err());
        assert!(buf.is_empty());
    }
}
