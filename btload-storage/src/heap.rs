//! Heap access consumed by index loading.
//!
//! A heap yields raw records with their MVCC headers. An index over a
//! class hierarchy reads several heaps in sequence through [`MultiHeapScan`].
use crate::error::{Error, Result};
use crate::row::{ClassID, RowID};
use crate::trx::{MvccHeader, TrxID, INVALID_TRX_ID};
use crate::value::{encode_row, Val};
use parking_lot::RwLock;
use std::sync::Arc;

pub const DEFAULT_ROWS_PER_PAGE: u16 = 64;

/// One row version read from heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapRow {
    pub row_id: RowID,
    pub class_id: ClassID,
    pub record: Vec<u8>,
    pub mvcc: MvccHeader,
}

/// Sequential row producer.
pub trait RowSource {
    /// Returns next row, or None at end of scan.
    fn next(&mut self) -> Result<Option<HeapRow>>;

    /// Restart scan from the beginning.
    fn reset(&mut self);
}

/// Physical heap file of one class.
pub trait HeapFile: Send + Sync {
    fn class_id(&self) -> ClassID;

    fn scan(&self) -> Box<dyn RowSource + Send + '_>;
}

/// Reference to a heap of the class hierarchy.
/// Heap may be absent, e.g. an abstract class without storage.
#[derive(Clone)]
pub struct HeapRef {
    pub class_id: ClassID,
    pub heap: Option<Arc<dyn HeapFile>>,
}

impl HeapRef {
    #[inline]
    pub fn new(heap: Arc<dyn HeapFile>) -> Self {
        HeapRef {
            class_id: heap.class_id(),
            heap: Some(heap),
        }
    }

    #[inline]
    pub fn absent(class_id: ClassID) -> Self {
        HeapRef {
            class_id,
            heap: None,
        }
    }
}

struct HeapSlot {
    mvcc: MvccHeader,
    record: Vec<u8>,
}

/// In-memory heap. Rows are appended and never moved, so row id is
/// derived from the position.
pub struct MemHeap {
    class_id: ClassID,
    vol: u16,
    rows_per_page: u16,
    rows: RwLock<Vec<HeapSlot>>,
}

impl MemHeap {
    #[inline]
    pub fn new(class_id: ClassID, vol: u16) -> Self {
        MemHeap {
            class_id,
            vol,
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
            rows: RwLock::new(vec![]),
        }
    }

    #[inline]
    fn row_id_of(&self, pos: usize) -> RowID {
        let rpp = self.rows_per_page as usize;
        RowID::new(self.vol, (pos / rpp) as u32, (pos % rpp) as u16)
    }

    #[inline]
    fn pos_of(&self, row_id: RowID) -> Option<usize> {
        if row_id.vol != self.vol || row_id.slot >= self.rows_per_page {
            return None;
        }
        Some(row_id.page as usize * self.rows_per_page as usize + row_id.slot as usize)
    }

    /// Insert a row committed at given timestamp.
    #[inline]
    pub fn insert(&self, vals: &[Val], ins: TrxID) -> RowID {
        self.insert_raw(encode_row(vals), MvccHeader::inserted(ins))
    }

    #[inline]
    pub fn insert_raw(&self, record: Vec<u8>, mvcc: MvccHeader) -> RowID {
        let mut g = self.rows.write();
        let row_id = self.row_id_of(g.len());
        g.push(HeapSlot { mvcc, record });
        row_id
    }

    /// Mark row deleted by given transaction marker.
    #[inline]
    pub fn delete(&self, row_id: RowID, del: TrxID) -> Result<()> {
        let pos = self.pos_of(row_id).ok_or(Error::InvalidArgument)?;
        let mut g = self.rows.write();
        let slot = g.get_mut(pos).ok_or(Error::InvalidArgument)?;
        if slot.mvcc.del != INVALID_TRX_ID {
            return Err(Error::InvalidState);
        }
        slot.mvcc.del = del;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HeapFile for MemHeap {
    #[inline]
    fn class_id(&self) -> ClassID {
        self.class_id
    }

    #[inline]
    fn scan(&self) -> Box<dyn RowSource + Send + '_> {
        Box::new(MemHeapScan { heap: self, pos: 0 })
    }
}

/// Scan over a live heap. Each step takes the read latch only for the
/// row being copied, so concurrent writers are not blocked.
pub struct MemHeapScan<'a> {
    heap: &'a MemHeap,
    pos: usize,
}

impl RowSource for MemHeapScan<'_> {
    #[inline]
    fn next(&mut self) -> Result<Option<HeapRow>> {
        let g = self.heap.rows.read();
        match g.get(self.pos) {
            Some(slot) => {
                let row = HeapRow {
                    row_id: self.heap.row_id_of(self.pos),
                    class_id: self.heap.class_id,
                    record: slot.record.clone(),
                    mvcc: slot.mvcc,
                };
                self.pos += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.pos = 0;
    }
}

enum ScanState<'a> {
    NotStarted,
    Scanning {
        heap_no: usize,
        src: Box<dyn RowSource + Send + 'a>,
    },
    Exhausted,
}

/// Scan every heap of a class hierarchy one after another.
pub struct MultiHeapScan<'a> {
    heaps: &'a [HeapRef],
    state: ScanState<'a>,
}

impl<'a> MultiHeapScan<'a> {
    #[inline]
    pub fn new(heaps: &'a [HeapRef]) -> Self {
        MultiHeapScan {
            heaps,
            state: ScanState::NotStarted,
        }
    }

    /// Position the scan at the beginning of heap i.
    /// Absent heaps are skipped.
    #[inline]
    pub fn reset_to_heap(&mut self, mut heap_no: usize) {
        let heaps = self.heaps;
        while heap_no < heaps.len() {
            if let Some(heap) = heaps[heap_no].heap.as_ref() {
                self.state = ScanState::Scanning {
                    heap_no,
                    src: heap.scan(),
                };
                return;
            }
            heap_no += 1;
        }
        self.state = ScanState::Exhausted;
    }

    /// Index of the heap currently scanned.
    #[inline]
    pub fn current_heap(&self) -> Option<usize> {
        match &self.state {
            ScanState::Scanning { heap_no, .. } => Some(*heap_no),
            _ => None,
        }
    }
}

impl RowSource for MultiHeapScan<'_> {
    fn next(&mut self) -> Result<Option<HeapRow>> {
        loop {
            match &mut self.state {
                ScanState::NotStarted => self.reset_to_heap(0),
                ScanState::Scanning { heap_no, src } => {
                    if let Some(row) = src.next()? {
                        return Ok(Some(row));
                    }
                    let next_heap = *heap_no + 1;
                    self.reset_to_heap(next_heap);
                }
                ScanState::Exhausted => return Ok(None),
            }
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.state = ScanState::NotStarted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_heap_insert_delete() {
        let heap = MemHeap::new(1, 0);
        let r0 = heap.insert(&[Val::from(1i32)], 5);
        let r1 = heap.insert(&[Val::from(2i32)], 6);
        assert!(r0 < r1);
        heap.delete(r1, 7).unwrap();
        assert!(matches!(heap.delete(r1, 8), Err(Error::InvalidState)));
        assert!(heap.delete(RowID::new(9, 0, 0), 8).is_err());

        let mut scan = heap.scan();
        let row = scan.next().unwrap().unwrap();
        assert_eq!(row.row_id, r0);
        assert!(!row.mvcc.is_deleted());
        let row = scan.next().unwrap().unwrap();
        assert_eq!(row.mvcc.del, 7);
        assert!(scan.next().unwrap().is_none());
        scan.reset();
        assert!(scan.next().unwrap().is_some());
    }

    #[test]
    fn test_mem_heap_row_id_pages() {
        let heap = MemHeap::new(1, 2);
        let ids: Vec<RowID> = (0..130)
            .map(|i| heap.insert(&[Val::from(i as i64)], 1))
            .collect();
        assert_eq!(ids[64], RowID::new(2, 1, 0));
        assert_eq!(ids[129], RowID::new(2, 2, 1));
    }

    #[test]
    fn test_multi_heap_scan() {
        let h1 = Arc::new(MemHeap::new(1, 0));
        let h3 = Arc::new(MemHeap::new(3, 1));
        h1.insert(&[Val::from(1i32)], 1);
        h1.insert(&[Val::from(2i32)], 1);
        h3.insert(&[Val::from(3i32)], 1);
        let empty = Arc::new(MemHeap::new(4, 2));
        let heaps = vec![
            HeapRef::new(h1),
            HeapRef::absent(2),
            HeapRef::new(empty),
            HeapRef::new(h3),
        ];
        let mut scan = MultiHeapScan::new(&heaps);
        let mut classes = vec![];
        while let Some(row) = scan.next().unwrap() {
            classes.push(row.class_id);
        }
        assert_eq!(classes, vec![1, 1, 3]);
        assert!(scan.current_heap().is_none());
        scan.reset();
        assert_eq!(scan.next().unwrap().unwrap().class_id, 1);
        assert_eq!(scan.current_heap(), Some(0));
    }
}
