// src/core/protocol/payload.rs

//! Payload layouts carried inside a transaction.
//!
//! All integers are big-endian. A batch request lists the records being
//! submitted; the reply lists per-record outcomes for the records the daemon
//! has something to say about. Records absent from the reply succeeded.
//!
//! ```text
//! batch request   u32 count, { u32 slot, u32 path_len, path, u32 payload_len, payload }*
//! batch reply     u32 count, { u32 slot, i32 code, u32 payload_len, payload }*
//! pg query        u64 pg_id
//! activity reply  u32 live_process_count
//! files reply     u32 count, { u64 device, u64 inode, u32 path_len, path }*
//! ```

use crate::core::FileSealError;
use crate::core::batch::BatchRecord;
use crate::core::fs::FileId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

// Limits applied when decoding, so a corrupt length cannot trigger a huge allocation.
const MAX_ENTRIES: usize = 1_024 * 1_024;

/// The longest path a record may carry, in bytes.
pub const MAX_PATH_LEN: usize = libc::PATH_MAX as usize;
/// The largest digest or signature a record may carry, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

// Smallest possible encoding of one entry, used to reject counts the body cannot hold.
const MIN_REQUEST_ENTRY_LEN: usize = 4 + 4 + 1 + 4;
const MIN_REPLY_ENTRY_LEN: usize = 4 + 4 + 4;
const MIN_INVENTORY_ENTRY_LEN: usize = 8 + 8 + 4 + 1;

/// One per-record outcome in a batch reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReplyEntry {
    pub slot: u32,
    pub code: i32,
    pub payload: Option<Bytes>,
}

/// One file owned by a playground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub id: FileId,
    pub path: PathBuf,
}

/// A record as decoded from a batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRecord {
    pub slot: u32,
    pub path: PathBuf,
    pub payload: Option<Bytes>,
}

/// Encodes the given records as a batch request body.
pub fn encode_batch_request<'a>(
    records: impl ExactSizeIterator<Item = &'a BatchRecord>,
) -> Result<Bytes, FileSealError> {
    let count = u32::try_from(records.len())
        .map_err(|_| FileSealError::InvalidRequest("too many records".to_string()))?;
    let mut buf = BytesMut::new();
    buf.put_u32(count);
    for record in records {
        buf.put_u32(record.slot());
        put_path(&mut buf, record.path())?;
        put_optional_bytes(&mut buf, record.payload())?;
    }
    Ok(buf.freeze())
}

/// Decodes a batch request body.
pub fn decode_batch_request(mut buf: Bytes) -> Result<Vec<SubmittedRecord>, FileSealError> {
    let count = take_count(&mut buf, MIN_REQUEST_ENTRY_LEN)?;
    let mut records = Vec::new();
    records.try_reserve(count)?;
    for _ in 0..count {
        let slot = take_u32(&mut buf, "slot")?;
        let path = take_path(&mut buf)?;
        let payload = take_optional_bytes(&mut buf)?;
        records.push(SubmittedRecord {
            slot,
            path,
            payload,
        });
    }
    ensure_consumed(&buf)?;
    Ok(records)
}

/// Encodes a batch reply body.
pub fn encode_batch_reply(entries: &[BatchReplyEntry]) -> Result<Bytes, FileSealError> {
    let count = u32::try_from(entries.len())
        .map_err(|_| FileSealError::InvalidRequest("too many reply entries".to_string()))?;
    let mut buf = BytesMut::new();
    buf.put_u32(count);
    for entry in entries {
        buf.put_u32(entry.slot);
        buf.put_i32(entry.code);
        put_optional_bytes(&mut buf, entry.payload.as_ref())?;
    }
    Ok(buf.freeze())
}

/// Decodes a batch reply body. An empty body is an empty reply.
pub fn decode_batch_reply(mut buf: Bytes) -> Result<Vec<BatchReplyEntry>, FileSealError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let count = take_count(&mut buf, MIN_REPLY_ENTRY_LEN)?;
    let mut entries = Vec::new();
    entries.try_reserve(count)?;
    for _ in 0..count {
        let slot = take_u32(&mut buf, "slot")?;
        let code = take_u32(&mut buf, "code")? as i32;
        let payload = take_optional_bytes(&mut buf)?;
        entries.push(BatchReplyEntry {
            slot,
            code,
            payload,
        });
    }
    ensure_consumed(&buf)?;
    Ok(entries)
}

/// Encodes the request body shared by both playground queries.
pub fn encode_playground_query(pg_id: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(pg_id);
    buf.freeze()
}

pub fn encode_activity_reply(live_processes: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(live_processes);
    buf.freeze()
}

pub fn decode_activity_reply(mut buf: Bytes) -> Result<u32, FileSealError> {
    let count = take_u32(&mut buf, "live process count")?;
    ensure_consumed(&buf)?;
    Ok(count)
}

pub fn encode_inventory_reply(entries: &[InventoryEntry]) -> Result<Bytes, FileSealError> {
    let count = u32::try_from(entries.len())
        .map_err(|_| FileSealError::InvalidRequest("too many inventory entries".to_string()))?;
    let mut buf = BytesMut::new();
    buf.put_u32(count);
    for entry in entries {
        buf.put_u64(entry.id.device);
        buf.put_u64(entry.id.inode);
        put_path(&mut buf, &entry.path)?;
    }
    Ok(buf.freeze())
}

pub fn decode_inventory_reply(mut buf: Bytes) -> Result<Vec<InventoryEntry>, FileSealError> {
    let count = take_count(&mut buf, MIN_INVENTORY_ENTRY_LEN)?;
    let mut entries = Vec::new();
    entries.try_reserve(count)?;
    for _ in 0..count {
        let device = take_u64(&mut buf, "device")?;
        let inode = take_u64(&mut buf, "inode")?;
        let path = take_path(&mut buf)?;
        entries.push(InventoryEntry {
            id: FileId::new(device, inode),
            path,
        });
    }
    ensure_consumed(&buf)?;
    Ok(entries)
}

// --- Helpers ---

fn put_path(buf: &mut BytesMut, path: &Path) -> Result<(), FileSealError> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_PATH_LEN {
        return Err(FileSealError::InvalidRequest(format!(
            "path length {} out of range",
            bytes.len()
        )));
    }
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    Ok(())
}

fn put_optional_bytes(buf: &mut BytesMut, data: Option<&Bytes>) -> Result<(), FileSealError> {
    match data {
        Some(data) if data.len() > MAX_PAYLOAD_LEN => Err(FileSealError::InvalidRequest(format!(
            "payload length {} exceeds {MAX_PAYLOAD_LEN}",
            data.len()
        ))),
        Some(data) => {
            buf.put_u32(data.len() as u32);
            buf.put_slice(data);
            Ok(())
        }
        None => {
            buf.put_u32(0);
            Ok(())
        }
    }
}

fn take_u32(buf: &mut Bytes, what: &str) -> Result<u32, FileSealError> {
    if buf.remaining() < 4 {
        return Err(FileSealError::MalformedReply(format!("truncated {what}")));
    }
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut Bytes, what: &str) -> Result<u64, FileSealError> {
    if buf.remaining() < 8 {
        return Err(FileSealError::MalformedReply(format!("truncated {what}")));
    }
    Ok(buf.get_u64())
}

fn take_count(buf: &mut Bytes, min_entry_len: usize) -> Result<usize, FileSealError> {
    let count = take_u32(buf, "entry count")? as usize;
    if count > MAX_ENTRIES {
        return Err(FileSealError::MalformedReply(format!(
            "entry count {count} exceeds {MAX_ENTRIES}"
        )));
    }
    if count.saturating_mul(min_entry_len) > buf.remaining() {
        return Err(FileSealError::MalformedReply(format!(
            "{count} entries cannot fit in {} bytes",
            buf.remaining()
        )));
    }
    Ok(count)
}

fn take_len(buf: &mut Bytes, what: &str, max: usize) -> Result<usize, FileSealError> {
    let len = take_u32(buf, what)? as usize;
    if len > max {
        return Err(FileSealError::MalformedReply(format!(
            "{what} {len} exceeds {max}"
        )));
    }
    if buf.remaining() < len {
        return Err(FileSealError::MalformedReply(format!(
            "{what} {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    Ok(len)
}

fn take_path(buf: &mut Bytes) -> Result<PathBuf, FileSealError> {
    let len = take_len(buf, "path length", MAX_PATH_LEN)?;
    if len == 0 {
        return Err(FileSealError::MalformedReply("empty path".to_string()));
    }
    let raw = buf.split_to(len);
    Ok(PathBuf::from(OsStr::from_bytes(&raw)))
}

fn take_optional_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, FileSealError> {
    let len = take_len(buf, "payload length", MAX_PAYLOAD_LEN)?;
    if len == 0 {
        return Ok(None);
    }
    Ok(Some(buf.split_to(len)))
}

fn ensure_consumed(buf: &Bytes) -> Result<(), FileSealError> {
    if buf.has_remaining() {
        return Err(FileSealError::MalformedReply(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}
