use crate::error::{Error, Result};
use crate::row::{ClassID, RowID};
use crate::serde::Serde;
use crate::trx::MvccHeader;
use std::mem;

/// Row reference stored under an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    pub row_id: RowID,
    /// Present only if the index has class component.
    pub class_id: Option<ClassID>,
    pub mvcc: MvccHeader,
}

impl IndexEntry {
    #[inline]
    pub fn new(row_id: RowID, class_id: Option<ClassID>, mvcc: MvccHeader) -> Self {
        IndexEntry {
            row_id,
            class_id,
            mvcc,
        }
    }
}

/// Fixed-size entry format of one index.
///
/// ┌───────────────┐
/// │ row_id(8)     │
/// ├───────────────┤
/// │ class_id(8)?  │
/// ├───────────────┤
/// │ ins(8)        │
/// ├───────────────┤
/// │ del(8)        │
/// └───────────────┘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryFormat {
    pub has_class: bool,
}

impl EntryFormat {
    #[inline]
    pub fn new(has_class: bool) -> Self {
        EntryFormat { has_class }
    }

    #[inline]
    pub fn entry_size(&self) -> usize {
        let n = if self.has_class { 4 } else { 3 };
        n * mem::size_of::<u64>()
    }

    /// Append encoded entry to the buffer.
    #[inline]
    pub fn encode(&self, entry: &IndexEntry, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.entry_size(), 0);
        let buf = &mut out[..];
        let mut idx = buf.ser_u64(start, entry.row_id.to_u64());
        if self.has_class {
            idx = buf.ser_u64(idx, entry.class_id.unwrap_or(crate::row::INVALID_CLASS_ID));
        }
        idx = buf.ser_u64(idx, entry.mvcc.ins);
        buf.ser_u64(idx, entry.mvcc.del);
    }

    #[inline]
    pub fn decode(&self, input: &[u8]) -> Result<IndexEntry> {
        if input.len() != self.entry_size() {
            return Err(Error::InvalidFormat);
        }
        let (idx, row_id) = input.deser_u64(0)?;
        let (idx, class_id) = if self.has_class {
            let (idx, c) = input.deser_u64(idx)?;
            (idx, Some(c))
        } else {
            (idx, None)
        };
        let (idx, ins) = input.deser_u64(idx)?;
        let (_, del) = input.deser_u64(idx)?;
        Ok(IndexEntry {
            row_id: RowID::from_u64(row_id),
            class_id,
            mvcc: MvccHeader { ins, del },
        })
    }

    /// Decode a contiguous array of entries.
    #[inline]
    pub fn decode_all(&self, input: &[u8], out: &mut Vec<IndexEntry>) -> Result<()> {
        if input.len() % self.entry_size() != 0 {
            return Err(Error::InvalidFormat);
        }
        for chunk in input.chunks_exact(self.entry_size()) {
            out.push(self.decode(chunk)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trx::INVALID_TRX_ID;

    #[test]
    fn test_entry_format() {
        let e1 = IndexEntry::new(RowID::new(0, 3, 4), Some(9), MvccHeader::inserted(0));
        let e2 = IndexEntry::new(RowID::new(1, 0, 0), Some(10), MvccHeader::deleted(5, 8));
        let fmt = EntryFormat::new(true);
        let mut buf = vec![];
        fmt.encode(&e1, &mut buf);
        fmt.encode(&e2, &mut buf);
        assert_eq!(buf.len(), 64);
        let mut out = vec![];
        fmt.decode_all(&buf, &mut out).unwrap();
        assert_eq!(out, vec![e1, e2]);
        assert!(fmt.decode_all(&buf[..40], &mut out).is_err());

        let fmt = EntryFormat::new(false);
        let e = IndexEntry::new(RowID::new(0, 1, 2), None, MvccHeader::inserted(3));
        let mut buf = vec![];
        fmt.encode(&e, &mut buf);
        assert_eq!(buf.len(), 24);
        let d = fmt.decode(&buf).unwrap();
        assert_eq!(d, e);
        assert_eq!(d.mvcc.del, INVALID_TRX_ID);
    }
}
