use crate::error::Result;
use crate::heap::{HeapRef, HeapRow, MultiHeapScan, RowSource};
use crate::index::key::{ExtractedKey, KeyExtractor, RowFilter};
use crate::index::load::LoadStats;
use crate::index::sort::SortRecord;
use crate::trx::{MvccHeader, TrxID, Visibility, Watermark};
use crate::value::decode_row;

/// Decides which row versions reach the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanCutoff {
    /// Keep all versions except those already vacuumed.
    Watermark(Watermark),
    /// Keep versions visible to the snapshot.
    Snapshot(TrxID),
}

impl ScanCutoff {
    #[inline]
    fn keep(&self, mvcc: &MvccHeader) -> bool {
        match self {
            ScanCutoff::Watermark(wm) => wm.classify(mvcc) != Visibility::Dead,
            ScanCutoff::Snapshot(sts) => mvcc.visible_to(*sts),
        }
    }
}

/// Feeds key/row pairs of all heaps of the index.
///
/// Rows below the cutoff and rows rejected by filter are skipped.
/// Keys whose components are all null are counted but not produced.
pub(crate) struct SortFeeder<'a> {
    scan: MultiHeapScan<'a>,
    extractor: KeyExtractor<'a>,
    filter: Option<&'a dyn RowFilter>,
    cutoff: ScanCutoff,
    has_class: bool,
}

impl<'a> SortFeeder<'a> {
    #[inline]
    pub fn new(
        heaps: &'a [HeapRef],
        extractor: KeyExtractor<'a>,
        filter: Option<&'a dyn RowFilter>,
        cutoff: ScanCutoff,
        has_class: bool,
    ) -> Self {
        SortFeeder {
            scan: MultiHeapScan::new(heaps),
            extractor,
            filter,
            cutoff,
            has_class,
        }
    }

    #[inline]
    fn extract(&self, row: &HeapRow, stats: &mut LoadStats) -> Result<Option<ExtractedKey>> {
        let vals = decode_row(&row.record)?;
        if let Some(filter) = self.filter {
            if !filter.evaluate(&vals)? {
                stats.filtered += 1;
                return Ok(None);
            }
        }
        let key = self.extractor.extract(&vals)?;
        if key.all_null {
            stats.entries += 1;
            stats.nulls += 1;
            return Ok(None);
        }
        Ok(Some(key))
    }

    pub fn next(&mut self, stats: &mut LoadStats) -> Result<Option<SortRecord>> {
        while let Some(row) = self.scan.next()? {
            stats.scanned += 1;
            if !self.cutoff.keep(&row.mvcc) {
                stats.dropped += 1;
                continue;
            }
            if let Some(key) = self.extract(&row, stats)? {
                return Ok(Some(SortRecord {
                    key: key.key,
                    has_null: key.has_null,
                    row_id: row.row_id,
                    class_id: self.has_class.then_some(row.class_id),
                    mvcc: row.mvcc,
                }));
            }
        }
        Ok(None)
    }
}
