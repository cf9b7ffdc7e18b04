//! External sort of index tuples.
//!
//! Tuples are buffered in memory until the buffer exceeds its budget,
//! then sorted and spilled as one run into a temporary file. Runs are
//! merged k-way with a binary heap. Ordering is key bytes first, then
//! row id.
use crate::error::{Error, Result};
use crate::row::{ClassID, RowID};
use crate::serde::Serde;
use crate::trx::MvccHeader;
use bitflags::bitflags;
use btload_datatype::memcmp::MemCmpKey;
use log::debug;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::PathBuf;

bitflags! {
    pub struct SortFlags: u8 {
        const HAS_NULL = 0x01;
        const HAS_CLASS = 0x02;
    }
}

/// Tuple exchanged between the feeder and the leaf builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRecord {
    pub key: MemCmpKey,
    pub has_null: bool,
    pub row_id: RowID,
    pub class_id: Option<ClassID>,
    pub mvcc: MvccHeader,
}

const SORT_RECORD_FIXED_LEN: usize = 4 + 1 + 8 + 8 + 8 + 4;

impl SortRecord {
    /// Packed length.
    #[inline]
    pub fn packed_len(&self) -> usize {
        SORT_RECORD_FIXED_LEN
            + if self.class_id.is_some() {
                mem::size_of::<ClassID>()
            } else {
                0
            }
            + self.key.len()
    }

    /// Pack tuple into flat bytes.
    ///
    /// ┌──────────────────┐
    /// │ next-link(4)     │
    /// ├──────────────────┤
    /// │ flags(1)         │
    /// ├──────────────────┤
    /// │ row_id(8)        │
    /// ├──────────────────┤
    /// │ class_id(8)?     │
    /// ├──────────────────┤
    /// │ ins(8)           │
    /// ├──────────────────┤
    /// │ del(8)           │
    /// ├──────────────────┤
    /// │ key_len(4)       │
    /// ├──────────────────┤
    /// │ key              │
    /// └──────────────────┘
    ///
    /// Next-link is a placeholder owned by the sort facility.
    #[inline]
    pub fn pack(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.packed_len(), 0);
        let buf = &mut out[..];
        let mut flags = SortFlags::empty();
        if self.has_null {
            flags |= SortFlags::HAS_NULL;
        }
        if self.class_id.is_some() {
            flags |= SortFlags::HAS_CLASS;
        }
        let mut idx = buf.ser_u32(start, 0);
        idx = buf.ser_u8(idx, flags.bits());
        idx = buf.ser_u64(idx, self.row_id.to_u64());
        if let Some(class_id) = self.class_id {
            idx = buf.ser_u64(idx, class_id);
        }
        idx = buf.ser_u64(idx, self.mvcc.ins);
        idx = buf.ser_u64(idx, self.mvcc.del);
        idx = buf.ser_u32(idx, self.key.len() as u32);
        buf.ser_byte_slice(idx, &self.key);
    }

    /// Exact inverse of [`SortRecord::pack`].
    #[inline]
    pub fn unpack(input: &[u8]) -> Result<Self> {
        let (idx, _link) = input.deser_u32(0)?;
        let (idx, flags) = input.deser_u8(idx)?;
        let flags = SortFlags::from_bits(flags).ok_or(Error::InvalidFormat)?;
        let (idx, row_id) = input.deser_u64(idx)?;
        let (idx, class_id) = if flags.contains(SortFlags::HAS_CLASS) {
            let (idx, c) = input.deser_u64(idx)?;
            (idx, Some(c))
        } else {
            (idx, None)
        };
        let (idx, ins) = input.deser_u64(idx)?;
        let (idx, del) = input.deser_u64(idx)?;
        let (idx, key_len) = input.deser_u32(idx)?;
        let (idx, key) = input.deser_byte_slice(idx, key_len as usize)?;
        if idx != input.len() {
            return Err(Error::InvalidFormat);
        }
        Ok(SortRecord {
            key: MemCmpKey::from(key),
            has_null: flags.contains(SortFlags::HAS_NULL),
            row_id: RowID::from_u64(row_id),
            class_id,
            mvcc: MvccHeader { ins, del },
        })
    }

    #[inline]
    fn same_identity(&self, other: &SortRecord) -> bool {
        self.row_id == other.row_id && self.key == other.key
    }
}

impl Ord for SortRecord {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.row_id.cmp(&other.row_id))
    }
}

impl PartialOrd for SortRecord {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorter with bounded memory.
pub struct ExternalSorter {
    buffer_size: usize,
    dir: PathBuf,
    buf: Vec<SortRecord>,
    buf_bytes: usize,
    runs: Vec<File>,
    total: usize,
}

impl ExternalSorter {
    #[inline]
    pub fn new(buffer_size: usize, dir: impl Into<PathBuf>) -> Self {
        ExternalSorter {
            buffer_size,
            dir: dir.into(),
            buf: vec![],
            buf_bytes: 0,
            runs: vec![],
            total: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, rec: SortRecord) -> Result<()> {
        self.buf_bytes += rec.packed_len();
        self.buf.push(rec);
        self.total += 1;
        if self.buf_bytes >= self.buffer_size {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of spilled runs.
    #[inline]
    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    fn sort_buffer(&mut self) -> Result<()> {
        self.buf.sort_unstable();
        if let Some(w) = self.buf.windows(2).find(|w| w[0].same_identity(&w[1])) {
            return Err(Error::DuplicateRowIdentity(w[0].row_id));
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.sort_buffer()?;
        let file = tempfile::tempfile_in(&self.dir)?;
        let mut writer = BufWriter::new(file);
        let mut packed = vec![];
        for rec in self.buf.drain(..) {
            packed.clear();
            rec.pack(&mut packed);
            writer.write_all(&(packed.len() as u32).to_le_bytes())?;
            writer.write_all(&packed)?;
        }
        let mut file = writer.into_inner().map_err(|e| Error::from(e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;
        debug!(
            "sort run {} spilled, {} bytes buffered",
            self.runs.len(),
            self.buf_bytes
        );
        self.runs.push(file);
        self.buf_bytes = 0;
        Ok(())
    }

    /// Finish input and return sorted output.
    pub fn finish(mut self) -> Result<SortedRun> {
        if self.runs.is_empty() {
            self.sort_buffer()?;
            debug!("sort finished in memory with {} records", self.total);
            return Ok(SortedRun {
                src: SortedSource::Memory(self.buf.into_iter()),
                prev: None,
            });
        }
        self.spill()?;
        let mut readers: Vec<RunReader> = self
            .runs
            .into_iter()
            .map(|f| RunReader {
                reader: BufReader::new(f),
                buf: vec![],
            })
            .collect();
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (run_no, reader) in readers.iter_mut().enumerate() {
            if let Some(rec) = reader.next()? {
                heap.push(Reverse(MergeItem { rec, run_no }));
            }
        }
        debug!(
            "sort merging {} runs with {} records",
            readers.len(),
            self.total
        );
        Ok(SortedRun {
            src: SortedSource::Merge { readers, heap },
            prev: None,
        })
    }
}

struct RunReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl RunReader {
    #[inline]
    fn next(&mut self) -> Result<Option<SortRecord>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.buf.resize(u32::from_le_bytes(len) as usize, 0);
        self.reader.read_exact(&mut self.buf)?;
        SortRecord::unpack(&self.buf).map(Some)
    }
}

struct MergeItem {
    rec: SortRecord,
    run_no: usize,
}

impl PartialEq for MergeItem {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeItem {}

impl Ord for MergeItem {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.rec
            .cmp(&other.rec)
            .then_with(|| self.run_no.cmp(&other.run_no))
    }
}

impl PartialOrd for MergeItem {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum SortedSource {
    Memory(std::vec::IntoIter<SortRecord>),
    Merge {
        readers: Vec<RunReader>,
        heap: BinaryHeap<Reverse<MergeItem>>,
    },
}

/// Sorted output stream.
pub struct SortedRun {
    src: SortedSource,
    prev: Option<SortRecord>,
}

impl SortedRun {
    /// Returns next tuple in order.
    /// Fails if two tuples share both key and row id.
    pub fn next(&mut self) -> Result<Option<SortRecord>> {
        let rec = match &mut self.src {
            SortedSource::Memory(it) => it.next(),
            SortedSource::Merge { readers, heap } => match heap.pop() {
                None => None,
                Some(Reverse(MergeItem { rec, run_no })) => {
                    if let Some(next) = readers[run_no].next()? {
                        heap.push(Reverse(MergeItem { rec: next, run_no }));
                    }
                    Some(rec)
                }
            },
        };
        let Some(rec) = rec else {
            return Ok(None);
        };
        if let Some(prev) = &self.prev {
            if prev.same_identity(&rec) {
                return Err(Error::DuplicateRowIdentity(rec.row_id));
            }
        }
        self.prev = Some(rec.clone());
        Ok(Some(rec))
    }
}
