use crate::error::{Error, Result};
use crate::index::entry::IndexEntry;
use crate::index::key::KeyDomain;
use crate::index::tree::{IndexLookup, LeafItem};
use crate::row::RowID;
use crate::trx::TrxID;
use btload_datatype::memcmp::MemCmpKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Abstraction of an index accepting transactional inserts.
pub trait IndexInsert: IndexLookup + Send + Sync {
    /// Insert one entry under the key.
    /// Inserting the same row twice replaces its MVCC header.
    fn insert(&self, key: MemCmpKey, has_null: bool, entry: IndexEntry) -> Result<()>;
}

struct LiveItem {
    has_null: bool,
    entries: Vec<IndexEntry>,
}

/// In-memory index maintained by ordinary DML.
///
/// Uniqueness is not enforced on insert. Online build relies on its
/// own global re-check once all units are applied.
pub struct LiveIndex {
    domain: KeyDomain,
    tree: RwLock<BTreeMap<MemCmpKey, LiveItem>>,
}

impl LiveIndex {
    #[inline]
    pub fn new(domain: KeyDomain) -> Self {
        LiveIndex {
            domain,
            tree: RwLock::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn domain(&self) -> &KeyDomain {
        &self.domain
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark entry of given row deleted by transaction marker.
    #[inline]
    pub fn mark_deleted(&self, key: &[u8], row_id: RowID, del: TrxID) -> Result<()> {
        let mut g = self.tree.write();
        let entry = g
            .get_mut(key)
            .and_then(|item| item.entries.iter_mut().find(|e| e.row_id == row_id))
            .ok_or(Error::InvalidArgument)?;
        entry.mvcc.del = del;
        Ok(())
    }
}

impl IndexLookup for LiveIndex {
    #[inline]
    fn lookup(&self, key: &[u8]) -> Result<Option<LeafItem>> {
        let g = self.tree.read();
        Ok(g.get_key_value(key).map(|(k, item)| LeafItem {
            key: k.clone(),
            has_null: item.has_null,
            entries: item.entries.clone(),
        }))
    }

    #[inline]
    fn range(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Vec<LeafItem>> {
        let g = self.tree.read();
        let res = g
            .range::<[u8], _>((lo, hi))
            .map(|(k, item)| LeafItem {
                key: k.clone(),
                has_null: item.has_null,
                entries: item.entries.clone(),
            })
            .collect();
        Ok(res)
    }
}

impl IndexInsert for LiveIndex {
    #[inline]
    fn insert(&self, key: MemCmpKey, has_null: bool, entry: IndexEntry) -> Result<()> {
        let mut g = self.tree.write();
        let item = g.entry(key).or_insert_with(|| LiveItem {
            has_null,
            entries: vec![],
        });
        if item.has_null != has_null {
            return Err(Error::InvalidState);
        }
        match item.entries.iter_mut().find(|e| e.row_id == entry.row_id) {
            Some(e) => *e = entry,
            None => item.entries.push(entry),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::KeyColumn;
    use crate::trx::MvccHeader;
    use crate::value::{Val, ValKind};

    #[test]
    fn test_live_index_insert_lookup() {
        let domain = KeyDomain::new(vec![KeyColumn::new(ValKind::I32)]).unwrap();
        let index = LiveIndex::new(domain.clone());
        let (k1, _) = domain.encode(&[Val::from(1i32)]).unwrap();
        let (k2, _) = domain.encode(&[Val::from(2i32)]).unwrap();
        let r1 = RowID::new(0, 0, 1);
        let r2 = RowID::new(0, 0, 2);
        index
            .insert(k2.clone(), false, IndexEntry::new(r2, None, MvccHeader::inserted(5)))
            .unwrap();
        index
            .insert(k1.clone(), false, IndexEntry::new(r1, None, MvccHeader::inserted(5)))
            .unwrap();
        // same row again replaces the entry.
        index
            .insert(k1.clone(), false, IndexEntry::new(r1, None, MvccHeader::inserted(7)))
            .unwrap();
        assert_eq!(index.len(), 2);
        let item = index.lookup(&k1).unwrap().unwrap();
        assert_eq!(item.entries.len(), 1);
        assert_eq!(item.entries[0].mvcc.ins, 7);

        index.mark_deleted(&k1, r1, 9).unwrap();
        assert!(!index.lookup(&k1).unwrap().unwrap().has_visible());
        assert!(index.mark_deleted(&k1, r2, 9).is_err());

        let all = index.range(Bound::Unbounded, Bound::Unbounded).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, k1);
        let tail = index
            .range(Bound::Excluded(k1.as_bytes()), Bound::Unbounded)
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].key, k2);
    }
}
