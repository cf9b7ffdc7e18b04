use crate::error::{Error, Result};
use crate::file::{PageID, INVALID_PAGE_ID, ROOT_PAGE_ID};
use crate::index::load::overflow::OverflowKeyStore;
use crate::index::load::sink::PageSink;
use crate::index::load::BuildEnv;
use crate::index::node::{
    build_root, KeyData, LeafRecord, NodeBuf, NodeType, NodeView, NonLeafRecord, RootMeta,
    LEAF_LEVEL, SLOT_LEN,
};
use crate::index::tree::{load_key, read_node};
use log::debug;

/// Separator owned by the builder.
enum Separator {
    Inline(Vec<u8>),
    Ref { page_id: PageID, len: u32 },
}

impl Separator {
    #[inline]
    fn key_data(&self) -> KeyData<'_> {
        match self {
            Separator::Inline(k) => KeyData::Inline(k),
            Separator::Ref { page_id, len } => KeyData::Overflow {
                page_id: *page_id,
                len: *len,
            },
        }
    }
}

/// Shortest prefix of `first` which is still greater than `last`.
#[inline]
fn shortest_separator<'k>(last: &[u8], first: &'k [u8]) -> &'k [u8] {
    debug_assert!(last < first);
    let lcp = last
        .iter()
        .zip(first.iter())
        .take_while(|(a, b)| a == b)
        .count();
    &first[..(lcp + 1).min(first.len())]
}

/// Builds upper levels above a finished leaf chain.
pub(crate) struct NonLeafBuilder<'s, 'a, 'e> {
    env: &'e BuildEnv<'e>,
    sink: &'s mut PageSink<'a>,
    ovf_keys: &'s mut OverflowKeyStore,
    rec_buf: Vec<u8>,
    /// Total pages of all non-leaf levels.
    pub pages: usize,
}

impl<'s, 'a, 'e> NonLeafBuilder<'s, 'a, 'e> {
    #[inline]
    pub fn new(
        env: &'e BuildEnv<'e>,
        sink: &'s mut PageSink<'a>,
        ovf_keys: &'s mut OverflowKeyStore,
    ) -> Self {
        NonLeafBuilder {
            env,
            sink,
            ovf_keys,
            rec_buf: vec![],
            pages: 0,
        }
    }

    /// Build levels until one page remains. Returns the top page and
    /// its level.
    pub fn build(&mut self, first_leaf: PageID, leaf_pages: usize) -> Result<(PageID, u16)> {
        let mut level = LEAF_LEVEL;
        let mut first = first_leaf;
        let mut count = leaf_pages;
        while count > 1 {
            let (f, c) = self.build_level(first, level)?;
            level += 1;
            debug!("level {} built with {} pages", level, c);
            first = f;
            count = c;
            self.pages += c;
        }
        Ok((first, level))
    }

    /// Walk the chain of child level and build its parent level.
    fn build_level(&mut self, child_first: PageID, child_level: u16) -> Result<(PageID, usize)> {
        let store = self.sink.store();
        let entry_size = self.env.fmt.entry_size();
        let variable = self.env.domain.is_variable();
        let mut prev_last: Option<Vec<u8>> = None;
        let mut page: Option<NodeBuf> = None;
        let mut first_page = INVALID_PAGE_ID;
        let mut count = 0;
        let mut child = child_first;
        while child != INVALID_PAGE_ID {
            let data = read_node(store, child)?;
            let view = NodeView::new(&data)?;
            let h = view.header();
            if h.level != child_level || view.data_count() == 0 {
                return Err(Error::InvalidFormat);
            }
            let sep = if child_level == LEAF_LEVEL {
                let rec0 = LeafRecord::decode(view.data_record(0)?, entry_size)?;
                let first_key = load_key(store, rec0.key)?;
                let n = view.data_count();
                let last_rec = LeafRecord::decode(view.data_record(n - 1)?, entry_size)?;
                let last_key = load_key(store, last_rec.key)?;
                let sep = match prev_last.as_deref() {
                    Some(last) if variable => {
                        let s = shortest_separator(last, &first_key);
                        if s.len() == first_key.len() {
                            self.separator(rec0.key, &first_key)?
                        } else {
                            self.separator(KeyData::Inline(s), s)?
                        }
                    }
                    _ => self.separator(rec0.key, &first_key)?,
                };
                prev_last = Some(last_key);
                sep
            } else {
                // upper separator repeats first separator of the child.
                match NonLeafRecord::decode(view.data_record(0)?)?.key {
                    KeyData::Inline(k) => Separator::Inline(k.to_vec()),
                    KeyData::Overflow { page_id, len } => Separator::Ref { page_id, len },
                }
            };
            let key = sep.key_data();
            NonLeafRecord { key, child }.encode(&mut self.rec_buf);
            let need = self.rec_buf.len() + SLOT_LEN + self.env.nonleaf_reserve;
            let switch = match page.as_ref() {
                None => true,
                Some(p) => !p.is_empty() && p.record_space() < need,
            };
            if switch {
                let page_id = self.sink.allocate()?;
                let mut node = NodeBuf::new(
                    page_id,
                    self.sink.page_size(),
                    NodeType::NonLeaf,
                    child_level + 1,
                );
                match page.take() {
                    Some(mut prev) => {
                        prev.set_next(page_id);
                        node.set_prev(prev.page_id());
                        self.sink.write(&mut prev)?;
                    }
                    None => first_page = page_id,
                }
                page = Some(node);
                count += 1;
            }
            let p = page.as_mut().ok_or(Error::InternalError)?;
            p.insert_record(&self.rec_buf)?;
            p.update_max_key_len(key.key_len());
            child = h.next;
        }
        match page.as_mut() {
            Some(p) => self.sink.write(p)?,
            None => return Err(Error::InvalidState),
        }
        Ok((first_page, count))
    }

    /// Separator of given key bytes. The stored key reference is reused
    /// when the separator equals the whole key.
    #[inline]
    fn separator(&mut self, stored: KeyData<'_>, key: &[u8]) -> Result<Separator> {
        if let KeyData::Overflow { page_id, len } = stored {
            if len as usize == key.len() {
                return Ok(Separator::Ref { page_id, len });
            }
        }
        if key.len() > self.env.max_inpage_key {
            return match self.ovf_keys.write(self.sink, key)? {
                KeyData::Overflow { page_id, len } => Ok(Separator::Ref { page_id, len }),
                KeyData::Inline(_) => Err(Error::InternalError),
            };
        }
        Ok(Separator::Inline(key.to_vec()))
    }
}

/// Copy top page into page 0 together with root metadata, then release
/// the top page.
pub(crate) fn finalize_root(sink: &mut PageSink<'_>, top: PageID, meta: &RootMeta) -> Result<()> {
    let data = read_node(sink.store(), top)?;
    let view = NodeView::new(&data)?;
    let mut root = build_root(view, ROOT_PAGE_ID, meta)?;
    sink.write(&mut root)?;
    sink.release(top)?;
    debug!(
        "root finalized from page {} at level {}",
        top,
        root.header().level
    );
    Ok(())
}

/// Write root of an index without any stored key.
pub(crate) fn write_empty_root(sink: &mut PageSink<'_>, meta: &RootMeta) -> Result<()> {
    let page_id = sink.allocate()?;
    if page_id != ROOT_PAGE_ID {
        return Err(Error::InvalidState);
    }
    let empty = NodeBuf::new(page_id, sink.page_size(), NodeType::Leaf, LEAF_LEVEL);
    let mut root = build_root(empty.view(), ROOT_PAGE_ID, meta)?;
    sink.write(&mut root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortest_separator() {
        assert_eq!(shortest_separator(b"apple", b"banana"), b"b");
        assert_eq!(shortest_separator(b"abc", b"abd"), b"abd");
        assert_eq!(shortest_separator(b"ab", b"abc"), b"abc");
        assert_eq!(shortest_separator(b"abcx", b"abdzz"), b"abd");
    }
}
