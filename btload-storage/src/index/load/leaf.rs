use crate::error::{Error, Result};
use crate::file::PageID;
use crate::index::entry::IndexEntry;
use crate::index::load::overflow::{OverflowChain, OverflowKeyStore};
use crate::index::load::sink::PageSink;
use crate::index::load::{BuildEnv, LoadStats};
use crate::index::node::{KeyData, LeafRecord, NodeBuf, NodeType, LEAF_LEVEL, SLOT_LEN};
use crate::index::sort::SortRecord;
use crate::row::RowID;
use crate::trx::{TrxID, Visibility};
use btload_datatype::memcmp::MemCmpKey;
use log::debug;
use std::mem;

/// Leaf record whose key is still open.
///
/// At most `entry_cap` entries stay in memory. Later entries stream into
/// a chain of overflow pages as they arrive.
struct PendingRecord {
    key: MemCmpKey,
    has_null: bool,
    head: Vec<IndexEntry>,
    overflow: Option<OverflowChain>,
    count: u64,
    visible: usize,
    // (row_id, del) of entries waiting for vacuum.
    vacuum: Vec<(RowID, TrxID)>,
}

impl PendingRecord {
    #[inline]
    fn new(key: MemCmpKey, has_null: bool) -> Self {
        PendingRecord {
            key,
            has_null,
            head: vec![],
            overflow: None,
            count: 0,
            visible: 0,
            vacuum: vec![],
        }
    }

    /// Append entry. If uniqueness is checked, the first visible entry
    /// takes the head of the list and a second one is rejected.
    fn push(
        &mut self,
        entry: IndexEntry,
        vis: Visibility,
        env: &BuildEnv<'_>,
        sink: &mut PageSink<'_>,
    ) -> Result<()> {
        match vis {
            Visibility::Visible => {
                self.visible += 1;
                if env.unique && !self.has_null {
                    if self.visible > 1 {
                        return Err(Error::UniqueViolation {
                            key: env.domain.display(&self.key),
                            first: self.head[0].row_id,
                            second: entry.row_id,
                        });
                    }
                    // previous head moves to the tail.
                    if let Some(head) = self.head.first_mut() {
                        let displaced = mem::replace(head, entry);
                        return self.append(displaced, env, sink);
                    }
                }
            }
            Visibility::VacuumPending => self.vacuum.push((entry.row_id, entry.mvcc.del)),
            Visibility::Invisible | Visibility::Dead => (),
        }
        self.append(entry, env, sink)
    }

    #[inline]
    fn append(
        &mut self,
        entry: IndexEntry,
        env: &BuildEnv<'_>,
        sink: &mut PageSink<'_>,
    ) -> Result<()> {
        self.count += 1;
        if self.head.len() < env.entry_cap {
            self.head.push(entry);
            return Ok(());
        }
        if self.overflow.is_none() {
            self.overflow = Some(OverflowChain::new(sink, &env.fmt)?);
        }
        match self.overflow.as_mut() {
            Some(chain) => chain.push(sink, &env.fmt, &entry),
            None => Err(Error::InternalError),
        }
    }
}

/// Result of leaf level construction.
pub(crate) struct LeafOutput<'a> {
    pub sink: PageSink<'a>,
    pub ovf_keys: OverflowKeyStore,
    pub first_leaf: Option<PageID>,
    pub stats: LoadStats,
    pub vacuum: Vec<VacuumTarget>,
}

/// Entry waiting for vacuum, with the leaf page holding its record.
/// Notification is logged once the page location is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VacuumTarget {
    pub page_id: PageID,
    pub row_id: RowID,
    pub del: TrxID,
}

/// Builds leaf level from sorted tuples, strictly left to right.
pub(crate) struct LeafBuilder<'a, 'e> {
    env: &'e BuildEnv<'e>,
    sink: PageSink<'a>,
    ovf_keys: OverflowKeyStore,
    page: Option<NodeBuf>,
    first_leaf: Option<PageID>,
    cur: Option<PendingRecord>,
    stats: LoadStats,
    vacuum: Vec<VacuumTarget>,
    rec_buf: Vec<u8>,
    entry_buf: Vec<u8>,
}

impl<'a, 'e> LeafBuilder<'a, 'e> {
    #[inline]
    pub fn new(env: &'e BuildEnv<'e>, sink: PageSink<'a>, stats: LoadStats) -> Self {
        LeafBuilder {
            env,
            sink,
            ovf_keys: OverflowKeyStore::default(),
            page: None,
            first_leaf: None,
            cur: None,
            stats,
            vacuum: vec![],
            rec_buf: vec![],
            entry_buf: vec![],
        }
    }

    /// Consume next tuple. Tuples must arrive in sorted order.
    pub fn add(&mut self, rec: SortRecord) -> Result<()> {
        let vis = self.env.watermark.classify(&rec.mvcc);
        if vis == Visibility::Dead {
            // normally dropped by the feeder.
            self.stats.dropped += 1;
            return Ok(());
        }
        let entry = IndexEntry::new(
            rec.row_id,
            rec.class_id,
            self.env.watermark.compact(rec.mvcc),
        );
        let same_key = self.cur.as_ref().is_some_and(|cur| cur.key == rec.key);
        if !same_key {
            if let Some(cur) = self.cur.take() {
                self.close_record(cur)?;
            }
            self.cur = Some(PendingRecord::new(rec.key, rec.has_null));
        }
        match self.cur.as_mut() {
            Some(cur) => cur.push(entry, vis, self.env, &mut self.sink),
            None => Err(Error::InternalError),
        }
    }

    /// Close the last record and the last page.
    pub fn finish(mut self) -> Result<LeafOutput<'a>> {
        if let Some(cur) = self.cur.take() {
            self.close_record(cur)?;
        }
        if let Some(mut page) = self.page.take() {
            self.sink.write(&mut page)?;
        }
        self.stats.overflow_key_pages = self.ovf_keys.pages();
        debug!(
            "leaf level finished: {} pages, {} distinct keys, {} entries",
            self.stats.leaf_pages, self.stats.distinct, self.stats.entries
        );
        Ok(LeafOutput {
            sink: self.sink,
            ovf_keys: self.ovf_keys,
            first_leaf: self.first_leaf,
            stats: self.stats,
            vacuum: self.vacuum,
        })
    }

    fn close_record(&mut self, cur: PendingRecord) -> Result<()> {
        self.stats.entries += cur.count;
        if cur.has_null {
            self.stats.nulls += cur.count;
        } else if cur.visible > 0 {
            self.stats.distinct += 1;
        }

        let key = if cur.key.len() > self.env.max_inpage_key {
            self.ovf_keys.write(&mut self.sink, &cur.key)?
        } else {
            KeyData::Inline(&cur.key)
        };
        let overflow = match cur.overflow {
            Some(chain) => {
                let (first, pages) = chain.finish(&mut self.sink)?;
                self.stats.overflow_pages += pages;
                Some(first)
            }
            None => None,
        };
        self.entry_buf.clear();
        for e in &cur.head {
            self.env.fmt.encode(e, &mut self.entry_buf);
        }
        LeafRecord {
            has_null: cur.has_null,
            key,
            entry_count: cur.head.len() as u32,
            overflow,
            entries: &self.entry_buf,
        }
        .encode(&mut self.rec_buf);

        let page_id = self.insert_record(cur.key.len())?;
        self.vacuum
            .extend(cur.vacuum.into_iter().map(|(row_id, del)| VacuumTarget {
                page_id,
                row_id,
                del,
            }));
        Ok(())
    }

    /// Insert encoded record into current leaf page, opening a new page
    /// if free space falls below the reserve. Returns the page id.
    fn insert_record(&mut self, key_len: usize) -> Result<PageID> {
        let need = self.rec_buf.len() + SLOT_LEN + self.env.leaf_reserve;
        let switch = match self.page.as_ref() {
            None => true,
            Some(page) => !page.is_empty() && page.record_space() < need,
        };
        if switch {
            self.next_page()?;
        }
        let page = self.page.as_mut().ok_or(Error::InternalError)?;
        if page.record_space() < self.rec_buf.len() + SLOT_LEN {
            return Err(Error::RecordTooLarge);
        }
        page.insert_record(&self.rec_buf)?;
        page.update_max_key_len(key_len);
        Ok(page.page_id())
    }

    fn next_page(&mut self) -> Result<()> {
        let page_id = self.sink.allocate()?;
        let mut node = NodeBuf::new(page_id, self.sink.page_size(), NodeType::Leaf, LEAF_LEVEL);
        if let Some(mut prev) = self.page.take() {
            prev.set_next(page_id);
            node.set_prev(prev.page_id());
            self.sink.write(&mut prev)?;
        } else {
            self.first_leaf = Some(page_id);
        }
        self.page = Some(node);
        self.stats.leaf_pages += 1;
        Ok(())
    }
}
