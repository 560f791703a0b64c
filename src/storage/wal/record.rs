//! WAL record types and their binary format.
//!
//! Every record starts with a type byte and a transaction ID and ends with a
//! five-byte footer holding the record's own start offset and type byte
//! again, so the log can be walked backward as well as forward.
//!
//! ```text
//! START:       | type | txn (4) |                                      footer
//! COMMIT:      | type | txn (4) | prev file (2) | prev offset (4) |    footer
//! ABORT:       same as COMMIT
//! UPDATE_PAGE: | type | txn | prev | name len (1) | name | page (4) | nsegs (2) |
//!              nsegs x (| offset (2) | len (2) | before | after |)     footer
//! UPDATE_PAGE_REDO_ONLY: as UPDATE_PAGE without before images
//! footer:      | start offset (4) | type |
//! ```

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use super::diff::{RedoSegment, UpdateSegment};
use super::lsn::LSN;
use crate::storage::error::{StorageError, StorageResult};
use crate::transaction::TransactionId;

/// Size of the trailing start-offset and type bytes.
pub const FOOTER_SIZE: usize = 5;

/// WAL record types.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    /// Transaction start record.
    Start = 1,
    /// Transaction commit record.
    Commit = 2,
    /// Transaction abort record.
    Abort = 3,
    /// Page update with before and after images.
    UpdatePage = 4,
    /// Page update with after images only, written while undoing.
    UpdatePageRedoOnly = 5,
}

impl WalRecordType {
    pub fn from_u8(tag: u8) -> StorageResult<Self> {
        match tag {
            1 => Ok(WalRecordType::Start),
            2 => Ok(WalRecordType::Commit),
            3 => Ok(WalRecordType::Abort),
            4 => Ok(WalRecordType::UpdatePage),
            5 => Ok(WalRecordType::UpdatePageRedoOnly),
            other => Err(StorageError::Recovery(format!(
                "unknown WAL record type {}",
                other
            ))),
        }
    }
}

/// A page update with undo information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUpdate {
    pub file_name: String,
    pub page_no: u32,
    pub segments: Vec<UpdateSegment>,
}

/// A page update that can only be redone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRedo {
    pub file_name: String,
    pub page_no: u32,
    pub segments: Vec<RedoSegment>,
}

/// Type-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecordPayload {
    Start,
    Commit,
    Abort,
    UpdatePage(PageUpdate),
    UpdatePageRedoOnly(PageRedo),
}

/// A complete WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub txn_id: TransactionId,
    /// Previous record of the same transaction; absent for START.
    pub prev_lsn: Option<LSN>,
    pub payload: WalRecordPayload,
}

impl WalRecord {
    pub fn start(txn_id: TransactionId) -> Self {
        WalRecord {
            txn_id,
            prev_lsn: None,
            payload: WalRecordPayload::Start,
        }
    }

    pub fn commit(txn_id: TransactionId, prev_lsn: Option<LSN>) -> Self {
        WalRecord {
            txn_id,
            prev_lsn,
            payload: WalRecordPayload::Commit,
        }
    }

    pub fn abort(txn_id: TransactionId, prev_lsn: Option<LSN>) -> Self {
        WalRecord {
            txn_id,
            prev_lsn,
            payload: WalRecordPayload::Abort,
        }
    }

    pub fn update_page(txn_id: TransactionId, prev_lsn: Option<LSN>, update: PageUpdate) -> Self {
        WalRecord {
            txn_id,
            prev_lsn,
            payload: WalRecordPayload::UpdatePage(update),
        }
    }

    pub fn update_page_redo_only(txn_id: TransactionId, prev_lsn: Option<LSN>, redo: PageRedo) -> Self {
        WalRecord {
            txn_id,
            prev_lsn,
            payload: WalRecordPayload::UpdatePageRedoOnly(redo),
        }
    }

    pub fn record_type(&self) -> WalRecordType {
        match self.payload {
            WalRecordPayload::Start => WalRecordType::Start,
            WalRecordPayload::Commit => WalRecordType::Commit,
            WalRecordPayload::Abort => WalRecordType::Abort,
            WalRecordPayload::UpdatePage(_) => WalRecordType::UpdatePage,
            WalRecordPayload::UpdatePageRedoOnly(_) => WalRecordType::UpdatePageRedoOnly,
        }
    }

    /// Serialize the record as it will appear at `start_offset` in a WAL file.
    pub fn encode(&self, start_offset: u32) -> StorageResult<BytesMut> {
        let record_type = self.record_type();
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(record_type as u8);
        buf.put_u32_le(self.txn_id.0);

        match &self.payload {
            WalRecordPayload::Start => {}
            WalRecordPayload::Commit | WalRecordPayload::Abort => {
                put_prev_lsn(&mut buf, self.prev_lsn);
            }
            WalRecordPayload::UpdatePage(update) => {
                put_prev_lsn(&mut buf, self.prev_lsn);
                put_page_id(&mut buf, &update.file_name, update.page_no)?;
                buf.put_u16_le(segment_count(update.segments.len())?);
                for segment in &update.segments {
                    if segment.before.len() != segment.after.len() {
                        return Err(StorageError::invariant(
                            "update segment with mismatched before and after images",
                        ));
                    }
                    buf.put_u16_le(segment.offset);
                    buf.put_u16_le(segment.after.len() as u16);
                    buf.put_slice(&segment.before);
                    buf.put_slice(&segment.after);
                }
            }
            WalRecordPayload::UpdatePageRedoOnly(redo) => {
                put_prev_lsn(&mut buf, self.prev_lsn);
                put_page_id(&mut buf, &redo.file_name, redo.page_no)?;
                buf.put_u16_le(segment_count(redo.segments.len())?);
                for segment in &redo.segments {
                    buf.put_u16_le(segment.offset);
                    buf.put_u16_le(segment.after.len() as u16);
                    buf.put_slice(&segment.after);
                }
            }
        }

        buf.put_u32_le(start_offset);
        buf.put_u8(record_type as u8);
        Ok(buf)
    }

    /// Parse one record from the front of `data`, which was read from
    /// `start_offset`. Returns the record and its encoded length.
    pub fn decode(data: &[u8], start_offset: u32) -> StorageResult<(WalRecord, usize)> {
        let mut buf = data;
        need(&buf, 5)?;
        let record_type = WalRecordType::from_u8(buf.get_u8())?;
        let txn_id = TransactionId(buf.get_u32_le());

        let (prev_lsn, payload) = match record_type {
            WalRecordType::Start => (None, WalRecordPayload::Start),
            WalRecordType::Commit => (get_prev_lsn(&mut buf)?, WalRecordPayload::Commit),
            WalRecordType::Abort => (get_prev_lsn(&mut buf)?, WalRecordPayload::Abort),
            WalRecordType::UpdatePage => {
                let prev_lsn = get_prev_lsn(&mut buf)?;
                let (file_name, page_no) = get_page_id(&mut buf)?;
                need(&buf, 2)?;
                let count = buf.get_u16_le() as usize;
                let mut segments = Vec::with_capacity(count);
                for _ in 0..count {
                    need(&buf, 4)?;
                    let offset = buf.get_u16_le();
                    let len = buf.get_u16_le() as usize;
                    need(&buf, 2 * len)?;
                    let before = buf[..len].to_vec();
                    buf.advance(len);
                    let after = buf[..len].to_vec();
                    buf.advance(len);
                    segments.push(UpdateSegment { offset, before, after });
                }
                (
                    prev_lsn,
                    WalRecordPayload::UpdatePage(PageUpdate {
                        file_name,
                        page_no,
                        segments,
                    }),
                )
            }
            WalRecordType::UpdatePageRedoOnly => {
                let prev_lsn = get_prev_lsn(&mut buf)?;
                let (file_name, page_no) = get_page_id(&mut buf)?;
                need(&buf, 2)?;
                let count = buf.get_u16_le() as usize;
                let mut segments = Vec::with_capacity(count);
                for _ in 0..count {
                    need(&buf, 4)?;
                    let offset = buf.get_u16_le();
                    let len = buf.get_u16_le() as usize;
                    need(&buf, len)?;
                    let after = buf[..len].to_vec();
                    buf.advance(len);
                    segments.push(RedoSegment { offset, after });
                }
                (
                    prev_lsn,
                    WalRecordPayload::UpdatePageRedoOnly(PageRedo {
                        file_name,
                        page_no,
                        segments,
                    }),
                )
            }
        };

        need(&buf, FOOTER_SIZE)?;
        let footer_offset = buf.get_u32_le();
        let footer_type = buf.get_u8();
        if footer_offset != start_offset || footer_type != record_type as u8 {
            return Err(StorageError::Recovery(format!(
                "WAL record at offset {} has footer ({}, {}) that does not match",
                start_offset, footer_offset, footer_type
            )));
        }

        let len = data.len() - buf.remaining();
        Ok((
            WalRecord {
                txn_id,
                prev_lsn,
                payload,
            },
            len,
        ))
    }
}

impl fmt::Display for WalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.record_type(), self.txn_id)?;
        if let Some(prev) = self.prev_lsn {
            write!(f, " prev={}", prev)?;
        }
        match &self.payload {
            WalRecordPayload::UpdatePage(u) => write!(
                f,
                " {}#{} segments={}",
                u.file_name,
                u.page_no,
                u.segments.len()
            ),
            WalRecordPayload::UpdatePageRedoOnly(r) => write!(
                f,
                " {}#{} segments={}",
                r.file_name,
                r.page_no,
                r.segments.len()
            ),
            _ => Ok(()),
        }
    }
}

fn need(buf: &&[u8], len: usize) -> StorageResult<()> {
    if buf.remaining() < len {
        return Err(StorageError::Recovery(format!(
            "truncated WAL record: needed {} more bytes, {} left",
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_prev_lsn(buf: &mut BytesMut, prev_lsn: Option<LSN>) {
    let lsn = prev_lsn.unwrap_or(LSN::new(0, 0));
    buf.put_u16_le(lsn.file_no);
    buf.put_u32_le(lsn.offset);
}

fn get_prev_lsn(buf: &mut &[u8]) -> StorageResult<Option<LSN>> {
    need(buf, 6)?;
    let file_no = buf.get_u16_le();
    let offset = buf.get_u32_le();
    Ok((offset != 0).then_some(LSN::new(file_no, offset)))
}

fn put_page_id(buf: &mut BytesMut, file_name: &str, page_no: u32) -> StorageResult<()> {
    let name = file_name.as_bytes();
    if name.len() > u8::MAX as usize {
        return Err(StorageError::invariant(format!(
            "file name {} too long for a WAL record",
            file_name
        )));
    }
    buf.put_u8(name.len() as u8);
    buf.put_slice(name);
    buf.put_u32_le(page_no);
    Ok(())
}

fn get_page_id(buf: &mut &[u8]) -> StorageResult<(String, u32)> {
    need(buf, 1)?;
    let len = buf.get_u8() as usize;
    need(buf, len + 4)?;
    let file_name = String::from_utf8(buf[..len].to_vec())
        .map_err(|e| StorageError::Recovery(format!("bad file name in WAL record: {}", e)))?;
    buf.advance(len);
    let page_no = buf.get_u32_le();
    Ok((file_name, page_no))
}

fn segment_count(count: usize) -> StorageResult<u16> {
    u16::try_from(count)
        .map_err(|_| StorageError::invariant(format!("{} segments in one WAL record", count)))
}
