//! Read access to a loaded index.
//!
//! The reader is used to verify the loaded structure, to merge-join
//! foreign keys and to compare against the live index. It is not a
//! query access path.
use crate::error::{Error, Result};
use crate::file::{PageID, PageStore, INVALID_PAGE_ID, ROOT_PAGE_ID};
use crate::index::entry::{EntryFormat, IndexEntry};
use crate::index::key::KeyDomain;
use crate::index::node::{
    KeyData, LeafRecord, NodeType, NodeView, NonLeafRecord, RootMeta, LEAF_LEVEL,
};
use crate::row::RowID;
use crate::serde::Deser;
use crate::trx::TrxID;
use btload_datatype::memcmp::MemCmpKey;
use std::ops::Bound;
use std::sync::Arc;

/// Read a page and validate its checksum.
#[inline]
pub(crate) fn read_node(store: &dyn PageStore, page_id: PageID) -> Result<Box<[u8]>> {
    let mut data = vec![0u8; store.page_size()].into_boxed_slice();
    store.read(page_id, &mut data)?;
    NodeView::checked(&data)?;
    Ok(data)
}

/// Returns full key of a record.
pub(crate) fn load_key(store: &dyn PageStore, key: KeyData<'_>) -> Result<Vec<u8>> {
    match key {
        KeyData::Inline(k) => Ok(k.to_vec()),
        KeyData::Overflow { page_id, len } => {
            let mut res = Vec::with_capacity(len as usize);
            let mut page_id = page_id;
            while page_id != INVALID_PAGE_ID {
                let data = read_node(store, page_id)?;
                let view = NodeView::new(&data)?;
                if view.header().node_type()? != NodeType::OverflowKey {
                    return Err(Error::InvalidFormat);
                }
                res.extend_from_slice(view.payload());
                page_id = view.header().next;
            }
            if res.len() != len as usize {
                return Err(Error::InvalidFormat);
            }
            Ok(res)
        }
    }
}

/// Decode all entries of a leaf record, following its overflow chain.
/// Returns number of overflow pages visited.
pub(crate) fn load_entries(
    store: &dyn PageStore,
    fmt: &EntryFormat,
    rec: &LeafRecord<'_>,
    out: &mut Vec<IndexEntry>,
) -> Result<usize> {
    fmt.decode_all(rec.entries, out)?;
    let mut pages = 0;
    let mut page_id = rec.overflow.unwrap_or(INVALID_PAGE_ID);
    while page_id != INVALID_PAGE_ID {
        let data = read_node(store, page_id)?;
        let view = NodeView::new(&data)?;
        let h = view.header();
        if h.node_type()? != NodeType::OverflowEntries
            || h.count as usize * fmt.entry_size() != view.payload().len()
        {
            return Err(Error::InvalidFormat);
        }
        fmt.decode_all(view.payload(), out)?;
        pages += 1;
        page_id = h.next;
    }
    Ok(pages)
}

/// One key of leaf level with all its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafItem {
    pub key: MemCmpKey,
    pub has_null: bool,
    pub entries: Vec<IndexEntry>,
}

impl LeafItem {
    /// Whether any entry is visible to current transactions.
    #[inline]
    pub fn has_visible(&self) -> bool {
        self.entries.iter().any(|e| e.mvcc.is_currently_visible())
    }

    /// Sorted row ids of entries visible to given snapshot.
    #[inline]
    pub fn rows_visible_to(&self, sts: TrxID) -> Vec<RowID> {
        let mut rows: Vec<RowID> = self
            .entries
            .iter()
            .filter(|e| e.mvcc.visible_to(sts))
            .map(|e| e.row_id)
            .collect();
        rows.sort();
        rows
    }
}

/// Point and range access shared by loaded and live indexes.
pub trait IndexLookup {
    fn lookup(&self, key: &[u8]) -> Result<Option<LeafItem>>;

    fn range(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Vec<LeafItem>>;
}

#[inline]
fn within_hi(key: &[u8], hi: Bound<&[u8]>) -> bool {
    match hi {
        Bound::Unbounded => true,
        Bound::Included(h) => key <= h,
        Bound::Excluded(h) => key < h,
    }
}

/// Shape of the tree collected by verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeShape {
    pub levels: u16,
    /// Page count of each level, leaf level first.
    pub level_pages: Vec<usize>,
    pub keys: u64,
    pub entries: u64,
    pub overflow_pages: usize,
}

impl TreeShape {
    #[inline]
    pub fn leaf_pages(&self) -> usize {
        self.level_pages.first().copied().unwrap_or(0)
    }
}

pub struct BTreeReader {
    store: Arc<dyn PageStore>,
    meta: RootMeta,
    fmt: EntryFormat,
    levels: u16,
    root: Box<[u8]>,
}

impl BTreeReader {
    pub fn open(store: Arc<dyn PageStore>) -> Result<Self> {
        let root = read_node(&*store, ROOT_PAGE_ID)?;
        let view = NodeView::new(&root)?;
        if !view.is_root() {
            return Err(Error::InvalidFormat);
        }
        let (_, meta) = RootMeta::deser(view.record(0)?, 0)?;
        let fmt = EntryFormat::new(meta.has_class);
        let levels = view.header().level;
        Ok(BTreeReader {
            store,
            meta,
            fmt,
            levels,
            root,
        })
    }

    #[inline]
    pub fn meta(&self) -> &RootMeta {
        &self.meta
    }

    #[inline]
    pub fn domain(&self) -> &KeyDomain {
        &self.meta.domain
    }

    #[inline]
    pub fn levels(&self) -> u16 {
        self.levels
    }

    #[inline]
    fn page(&self, page_id: PageID) -> Result<Box<[u8]>> {
        if page_id == ROOT_PAGE_ID {
            return Ok(self.root.clone());
        }
        read_node(&*self.store, page_id)
    }

    /// Descend to leaf page which may contain the key.
    /// Without key, descend to leftmost leaf.
    fn descend(&self, key: Option<&[u8]>) -> Result<Box<[u8]>> {
        let mut data = self.root.clone();
        loop {
            let view = NodeView::new(&data)?;
            let h = view.header();
            match h.node_type()? {
                NodeType::Leaf => return Ok(data),
                NodeType::NonLeaf => (),
                _ => return Err(Error::InvalidFormat),
            }
            if view.data_count() == 0 {
                return Err(Error::InvalidFormat);
            }
            let mut child = NonLeafRecord::decode(view.data_record(0)?)?.child;
            if let Some(key) = key {
                // last separator not greater than key.
                for i in 1..view.data_count() {
                    let rec = NonLeafRecord::decode(view.data_record(i)?)?;
                    let sep = load_key(&*self.store, rec.key)?;
                    if sep.as_slice() > key {
                        break;
                    }
                    child = rec.child;
                }
            }
            let next = self.page(child)?;
            if NodeView::new(&next)?.header().level + 1 != h.level {
                return Err(Error::InvalidFormat);
            }
            data = next;
        }
    }

    /// Cursor at the smallest key.
    #[inline]
    pub fn cursor(&self) -> Result<LeafCursor<'_>> {
        let page = self.descend(None)?;
        Ok(LeafCursor {
            reader: self,
            page: Some(page),
            idx: 0,
        })
    }

    /// Cursor at the first key not less than given key.
    pub fn seek(&self, key: &[u8]) -> Result<LeafCursor<'_>> {
        let page = self.descend(Some(key))?;
        let view = NodeView::new(&page)?;
        let mut idx = 0;
        while idx < view.data_count() {
            let rec = LeafRecord::decode(view.data_record(idx)?, self.fmt.entry_size())?;
            if load_key(&*self.store, rec.key)?.as_slice() >= key {
                break;
            }
            idx += 1;
        }
        Ok(LeafCursor {
            reader: self,
            page: Some(page),
            idx,
        })
    }

    /// Check structure of the whole tree.
    ///
    /// 1. Each level is a linked chain whose pages are exactly the
    ///    children of the level above, in order.
    /// 2. Keys strictly increase along the leaf level.
    /// 3. Separators route correctly: separator of child i is not greater
    ///    than the first key of child i and greater than every key of
    ///    child i-1.
    pub fn verify(&self) -> Result<TreeShape> {
        let levels = self.levels;
        if levels < LEAF_LEVEL {
            return Err(Error::InvalidFormat);
        }
        let mut shape = TreeShape {
            levels,
            level_pages: vec![0; levels as usize],
            ..Default::default()
        };
        // (separator, child) of pages in current level, top-down.
        let mut pages = vec![ROOT_PAGE_ID];
        let mut separators: Vec<(Vec<u8>, PageID)> = vec![];
        for level in (LEAF_LEVEL..=levels).rev() {
            shape.level_pages[(level - LEAF_LEVEL) as usize] = pages.len();
            self.verify_chain(&pages, level)?;
            if level == LEAF_LEVEL {
                self.verify_leaves(&pages, &separators, &mut shape)?;
                break;
            }
            let mut children = vec![];
            for page_id in &pages {
                let data = self.page(*page_id)?;
                let view = NodeView::new(&data)?;
                for i in 0..view.data_count() {
                    let rec = NonLeafRecord::decode(view.data_record(i)?)?;
                    children.push((load_key(&*self.store, rec.key)?, rec.child));
                }
            }
            for w in children.windows(2) {
                if w[0].0 >= w[1].0 {
                    return Err(Error::InvalidFormat);
                }
            }
            if level > LEAF_LEVEL + 1 {
                // upper separators repeat first separator of the child.
                for (sep, child) in &children {
                    let data = self.page(*child)?;
                    let view = NodeView::new(&data)?;
                    let first = NonLeafRecord::decode(view.data_record(0)?)?;
                    if load_key(&*self.store, first.key)? != *sep {
                        return Err(Error::InvalidFormat);
                    }
                }
            }
            pages = children.iter().map(|(_, c)| *c).collect();
            separators = children;
        }
        Ok(shape)
    }

    fn verify_chain(&self, pages: &[PageID], level: u16) -> Result<()> {
        for (i, page_id) in pages.iter().enumerate() {
            let data = self.page(*page_id)?;
            let view = NodeView::new(&data)?;
            let h = view.header();
            let expected = if level == LEAF_LEVEL {
                NodeType::Leaf
            } else {
                NodeType::NonLeaf
            };
            if h.level != level || h.node_type()? != expected {
                return Err(Error::InvalidFormat);
            }
            if view.is_root() != (*page_id == ROOT_PAGE_ID) {
                return Err(Error::InvalidFormat);
            }
            let prev = if i == 0 { INVALID_PAGE_ID } else { pages[i - 1] };
            let next = pages.get(i + 1).copied().unwrap_or(INVALID_PAGE_ID);
            if h.prev != prev || h.next != next {
                return Err(Error::InvalidFormat);
            }
        }
        Ok(())
    }

    fn verify_leaves(
        &self,
        pages: &[PageID],
        separators: &[(Vec<u8>, PageID)],
        shape: &mut TreeShape,
    ) -> Result<()> {
        let mut last_key: Option<Vec<u8>> = None;
        let mut entries = vec![];
        for (i, page_id) in pages.iter().enumerate() {
            let data = self.page(*page_id)?;
            let view = NodeView::new(&data)?;
            if view.data_count() == 0 && pages.len() > 1 {
                return Err(Error::InvalidFormat);
            }
            for j in 0..view.data_count() {
                let rec = LeafRecord::decode(view.data_record(j)?, self.fmt.entry_size())?;
                let key = load_key(&*self.store, rec.key)?;
                if j == 0 {
                    if let Some((sep, _)) = separators.get(i) {
                        if sep.as_slice() > key.as_slice() {
                            return Err(Error::InvalidFormat);
                        }
                        if last_key.as_ref().is_some_and(|lk| lk >= sep) {
                            return Err(Error::InvalidFormat);
                        }
                    }
                }
                if last_key.as_ref().is_some_and(|lk| *lk >= key) {
                    return Err(Error::InvalidFormat);
                }
                entries.clear();
                shape.overflow_pages += load_entries(&*self.store, &self.fmt, &rec, &mut entries)?;
                if entries.is_empty() {
                    return Err(Error::InvalidFormat);
                }
                shape.keys += 1;
                shape.entries += entries.len() as u64;
                last_key = Some(key);
            }
        }
        Ok(())
    }
}

impl IndexLookup for BTreeReader {
    #[inline]
    fn lookup(&self, key: &[u8]) -> Result<Option<LeafItem>> {
        let mut cursor = self.seek(key)?;
        match cursor.next()? {
            Some(item) if item.key.as_bytes() == key => Ok(Some(item)),
            _ => Ok(None),
        }
    }

    fn range(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Vec<LeafItem>> {
        let mut cursor = match lo {
            Bound::Unbounded => self.cursor()?,
            Bound::Included(k) | Bound::Excluded(k) => self.seek(k)?,
        };
        let mut res = vec![];
        while let Some(item) = cursor.next()? {
            if let Bound::Excluded(k) = lo {
                if item.key.as_bytes() == k {
                    continue;
                }
            }
            if !within_hi(&item.key, hi) {
                break;
            }
            res.push(item);
        }
        Ok(res)
    }
}

/// Forward cursor over the leaf chain.
pub struct LeafCursor<'a> {
    reader: &'a BTreeReader,
    page: Option<Box<[u8]>>,
    idx: usize,
}

impl LeafCursor<'_> {
    pub fn next(&mut self) -> Result<Option<LeafItem>> {
        loop {
            let Some(page) = self.page.as_ref() else {
                return Ok(None);
            };
            let view = NodeView::new(page)?;
            if self.idx < view.data_count() {
                let rec = LeafRecord::decode(
                    view.data_record(self.idx)?,
                    self.reader.fmt.entry_size(),
                )?;
                let key = load_key(&*self.reader.store, rec.key)?;
                let mut entries = vec![];
                load_entries(&*self.reader.store, &self.reader.fmt, &rec, &mut entries)?;
                self.idx += 1;
                return Ok(Some(LeafItem {
                    key: MemCmpKey::from(key),
                    has_null: rec.has_null,
                    entries,
                }));
            }
            let next = view.header().next;
            if next == INVALID_PAGE_ID {
                self.page = None;
            } else {
                self.page = Some(self.reader.page(next)?);
                self.idx = 0;
            }
        }
    }
}
