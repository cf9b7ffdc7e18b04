//! Write-ahead log records emitted by index loading.
//!
//! Frame format of one record:
//!
//! ┌──────────────┐
//! │ len(4)       │
//! ├──────────────┤
//! │ crc32(4)     │
//! ├──────────────┤
//! │ payload(len) │
//! └──────────────┘
//!
//! Payload starts with one byte of [`LogCode`].
use crate::catalog::TableID;
use crate::error::{Error, Result};
use crate::file::{FileID, PageID};
use crate::row::RowID;
use crate::serde::{Deser, LenPrefixBytes, Ser, Serde};
use crate::trx::TrxID;
use parking_lot::Mutex;
use std::mem;

pub type Lsn = u64;

const FRAME_HEADER_LEN: usize = mem::size_of::<u32>() * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogCode {
    SysOpBegin = 1,
    SysOpCommit = 2,
    SysOpAbort = 3,
    CreateIndexUndo = 4,
    NewPage = 5,
    PageImage = 6,
    VacuumNotify = 7,
}

impl TryFrom<u8> for LogCode {
    type Error = Error;
    #[inline]
    fn try_from(code: u8) -> Result<Self> {
        let res = match code {
            1 => LogCode::SysOpBegin,
            2 => LogCode::SysOpCommit,
            3 => LogCode::SysOpAbort,
            4 => LogCode::CreateIndexUndo,
            5 => LogCode::NewPage,
            6 => LogCode::PageImage,
            7 => LogCode::VacuumNotify,
            _ => return Err(Error::InvalidFormat),
        };
        Ok(res)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Start of a system operation, which is atomic on its own.
    SysOpBegin,
    SysOpCommit,
    SysOpAbort,
    /// Undo of index file creation. Rollback destroys the file.
    CreateIndexUndo { file_id: FileID, table_id: TableID },
    NewPage { file_id: FileID, page_id: PageID },
    /// Full page redo.
    PageImage {
        file_id: FileID,
        page_id: PageID,
        checksum: u32,
        data: Vec<u8>,
    },
    /// Tells vacuum an index entry of a deleted row must be purged.
    VacuumNotify {
        file_id: FileID,
        page_id: PageID,
        row_id: RowID,
        del: TrxID,
    },
}

impl LogRecord {
    #[inline]
    pub fn code(&self) -> LogCode {
        match self {
            LogRecord::SysOpBegin => LogCode::SysOpBegin,
            LogRecord::SysOpCommit => LogCode::SysOpCommit,
            LogRecord::SysOpAbort => LogCode::SysOpAbort,
            LogRecord::CreateIndexUndo { .. } => LogCode::CreateIndexUndo,
            LogRecord::NewPage { .. } => LogCode::NewPage,
            LogRecord::PageImage { .. } => LogCode::PageImage,
            LogRecord::VacuumNotify { .. } => LogCode::VacuumNotify,
        }
    }
}

impl Ser<'_> for LogRecord {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<u8>()
            + match self {
                LogRecord::SysOpBegin | LogRecord::SysOpCommit | LogRecord::SysOpAbort => 0,
                LogRecord::CreateIndexUndo { .. } | LogRecord::NewPage { .. } => 16,
                LogRecord::PageImage { data, .. } => 16 + 4 + 4 + data.len(),
                LogRecord::VacuumNotify { .. } => 32,
            }
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u8(start_idx, self.code() as u8);
        match self {
            LogRecord::SysOpBegin | LogRecord::SysOpCommit | LogRecord::SysOpAbort => idx,
            LogRecord::CreateIndexUndo { file_id, table_id } => {
                let idx = out.ser_u64(idx, *file_id);
                out.ser_u64(idx, *table_id)
            }
            LogRecord::NewPage { file_id, page_id } => {
                let idx = out.ser_u64(idx, *file_id);
                out.ser_u64(idx, *page_id)
            }
            LogRecord::PageImage {
                file_id,
                page_id,
                checksum,
                data,
            } => {
                let idx = out.ser_u64(idx, *file_id);
                let idx = out.ser_u64(idx, *page_id);
                let idx = out.ser_u32(idx, *checksum);
                let idx = out.ser_u32(idx, data.len() as u32);
                out.ser_byte_slice(idx, data)
            }
            LogRecord::VacuumNotify {
                file_id,
                page_id,
                row_id,
                del,
            } => {
                let idx = out.ser_u64(idx, *file_id);
                let idx = out.ser_u64(idx, *page_id);
                let idx = out.ser_u64(idx, row_id.to_u64());
                out.ser_u64(idx, *del)
            }
        }
    }
}

impl Deser for LogRecord {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, code) = input.deser_u8(start_idx)?;
        match LogCode::try_from(code)? {
            LogCode::SysOpBegin => Ok((idx, LogRecord::SysOpBegin)),
            LogCode::SysOpCommit => Ok((idx, LogRecord::SysOpCommit)),
            LogCode::SysOpAbort => Ok((idx, LogRecord::SysOpAbort)),
            LogCode::CreateIndexUndo => {
                let (idx, file_id) = input.deser_u64(idx)?;
                let (idx, table_id) = input.deser_u64(idx)?;
                Ok((idx, LogRecord::CreateIndexUndo { file_id, table_id }))
            }
            LogCode::NewPage => {
                let (idx, file_id) = input.deser_u64(idx)?;
                let (idx, page_id) = input.deser_u64(idx)?;
                Ok((idx, LogRecord::NewPage { file_id, page_id }))
            }
            LogCode::PageImage => {
                let (idx, file_id) = input.deser_u64(idx)?;
                let (idx, page_id) = input.deser_u64(idx)?;
                let (idx, checksum) = input.deser_u32(idx)?;
                let (idx, LenPrefixBytes(data)) = LenPrefixBytes::deser(input, idx)?;
                Ok((
                    idx,
                    LogRecord::PageImage {
                        file_id,
                        page_id,
                        checksum,
                        data,
                    },
                ))
            }
            LogCode::VacuumNotify => {
                let (idx, file_id) = input.deser_u64(idx)?;
                let (idx, page_id) = input.deser_u64(idx)?;
                let (idx, row_id) = input.deser_u64(idx)?;
                let (idx, del) = input.deser_u64(idx)?;
                Ok((
                    idx,
                    LogRecord::VacuumNotify {
                        file_id,
                        page_id,
                        row_id: RowID::from_u64(row_id),
                        del,
                    },
                ))
            }
        }
    }
}

/// Destination of log records.
pub trait LogSink: Send + Sync {
    /// Append one record, returns its LSN.
    fn append(&self, rec: LogRecord) -> Result<Lsn>;
}

/// Log kept in memory as framed bytes.
#[derive(Default)]
pub struct MemLog {
    buf: Mutex<Vec<u8>>,
}

impl MemLog {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode all records, validating checksum of each frame.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let g = self.buf.lock();
        let buf = &g[..];
        let mut res = vec![];
        let mut idx = 0;
        while idx < buf.len() {
            let (next, len) = buf.deser_u32(idx)?;
            let (next, crc) = buf.deser_u32(next)?;
            let (end, payload) = buf.deser_byte_slice(next, len as usize)?;
            if crc32fast::hash(payload) != crc {
                return Err(Error::ChecksumMismatch);
            }
            let (used, rec) = LogRecord::deser(payload, 0)?;
            if used != payload.len() {
                return Err(Error::InvalidFormat);
            }
            res.push(rec);
            idx = end;
        }
        Ok(res)
    }

    /// Total bytes of the log.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn corrupt_byte(&self, idx: usize) {
        self.buf.lock()[idx] ^= 0xff;
    }
}

impl LogSink for MemLog {
    #[inline]
    fn append(&self, rec: LogRecord) -> Result<Lsn> {
        let payload = rec.ser_to_vec();
        let crc = crc32fast::hash(&payload);
        let mut g = self.buf.lock();
        let lsn = g.len() as Lsn;
        let start = g.len();
        g.resize(start + FRAME_HEADER_LEN, 0);
        let idx = g[..].ser_u32(start, payload.len() as u32);
        g[..].ser_u32(idx, crc);
        g.extend_from_slice(&payload);
        Ok(lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_log_records() {
        let log = MemLog::new();
        let recs = vec![
            LogRecord::SysOpBegin,
            LogRecord::CreateIndexUndo {
                file_id: 3,
                table_id: 100,
            },
            LogRecord::NewPage {
                file_id: 3,
                page_id: 0,
            },
            LogRecord::PageImage {
                file_id: 3,
                page_id: 0,
                checksum: 42,
                data: vec![1, 2, 3],
            },
            LogRecord::VacuumNotify {
                file_id: 3,
                page_id: 1,
                row_id: RowID::new(0, 5, 6),
                del: 77,
            },
            LogRecord::SysOpCommit,
        ];
        let mut last_lsn = None;
        for rec in &recs {
            let lsn = log.append(rec.clone()).unwrap();
            assert!(last_lsn.map_or(true, |l| l < lsn));
            last_lsn = Some(lsn);
        }
        assert_eq!(log.records().unwrap(), recs);
    }

    #[test]
    fn test_mem_log_checksum() {
        let log = MemLog::new();
        log.append(LogRecord::NewPage {
            file_id: 1,
            page_id: 2,
        })
        .unwrap();
        log.corrupt_byte(FRAME_HEADER_LEN + 3);
        assert!(matches!(log.records(), Err(Error::ChecksumMismatch)));
    }
}
