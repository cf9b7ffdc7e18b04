//! Writers of overflow pages.
use crate::error::{Error, Result};
use crate::file::{PageID, INVALID_PAGE_ID};
use crate::index::entry::{EntryFormat, IndexEntry};
use crate::index::load::sink::PageSink;
use crate::index::node::{KeyData, NodeBuf, NodeType, NODE_HEADER_LEN};
use log::debug;

/// Number of entries one overflow page holds.
#[inline]
pub fn overflow_entry_capacity(page_size: usize, fmt: &EntryFormat) -> usize {
    (page_size - NODE_HEADER_LEN) / fmt.entry_size()
}

/// Chain of overflow entry pages, written while entries of one key
/// still arrive. Only the page being filled is kept in memory.
pub(crate) struct OverflowChain {
    first: PageID,
    page_id: PageID,
    prev: PageID,
    cap: usize,
    buf: Vec<u8>,
    count: usize,
    pages: usize,
}

impl OverflowChain {
    /// Start a chain at a newly allocated page.
    #[inline]
    pub fn new(sink: &mut PageSink<'_>, fmt: &EntryFormat) -> Result<Self> {
        let cap = overflow_entry_capacity(sink.page_size(), fmt);
        let first = sink.allocate()?;
        Ok(OverflowChain {
            first,
            page_id: first,
            prev: INVALID_PAGE_ID,
            cap,
            buf: Vec::with_capacity(cap * fmt.entry_size()),
            count: 0,
            pages: 0,
        })
    }

    /// Number of entries buffered for the page being filled.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.count
    }

    /// Append one entry. A full page is written out and linked to a
    /// new one before the entry is buffered.
    #[inline]
    pub fn push(
        &mut self,
        sink: &mut PageSink<'_>,
        fmt: &EntryFormat,
        entry: &IndexEntry,
    ) -> Result<()> {
        if self.count == self.cap {
            let next = sink.allocate()?;
            self.flush(sink, next)?;
        }
        fmt.encode(entry, &mut self.buf);
        self.count += 1;
        Ok(())
    }

    fn flush(&mut self, sink: &mut PageSink<'_>, next: PageID) -> Result<()> {
        let mut node = NodeBuf::new(
            self.page_id,
            sink.page_size(),
            NodeType::OverflowEntries,
            0,
        );
        node.append_payload(&self.buf, self.count as u16)?;
        node.set_prev(self.prev);
        node.set_next(next);
        sink.write(&mut node)?;
        self.pages += 1;
        self.prev = self.page_id;
        self.page_id = next;
        self.buf.clear();
        self.count = 0;
        Ok(())
    }

    /// Write the last page. Returns first page of the chain and number of
    /// pages written.
    #[inline]
    pub fn finish(mut self, sink: &mut PageSink<'_>) -> Result<(PageID, usize)> {
        debug_assert!(self.count > 0);
        self.flush(sink, INVALID_PAGE_ID)?;
        Ok((self.first, self.pages))
    }
}

/// Storage of keys too long to be kept in page.
///
/// The storage is created on first use. Each long key is written as its
/// own chain of overflow key pages, and records refer to the first page.
#[derive(Default)]
pub(crate) struct OverflowKeyStore {
    created: bool,
    pages: usize,
}

impl OverflowKeyStore {
    #[inline]
    pub fn pages(&self) -> usize {
        self.pages
    }

    #[inline]
    fn allocate(&mut self, sink: &mut PageSink<'_>) -> Result<PageID> {
        if self.created {
            return sink.allocate();
        }
        match sink.allocate() {
            Ok(page_id) => {
                debug!("overflow key storage created at page {}", page_id);
                self.created = true;
                Ok(page_id)
            }
            Err(_) => Err(Error::OverflowKeyStorage),
        }
    }

    pub fn write<'k>(&mut self, sink: &mut PageSink<'_>, key: &[u8]) -> Result<KeyData<'k>> {
        let chunk_size = sink.page_size() - NODE_HEADER_LEN;
        let first = self.allocate(sink)?;
        let mut page_id = first;
        let mut chunks = key.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            let mut node = NodeBuf::new(page_id, sink.page_size(), NodeType::OverflowKey, 0);
            node.append_payload(chunk, 1)?;
            let next = if chunks.peek().is_some() {
                self.allocate(sink)?
            } else {
                INVALID_PAGE_ID
            };
            node.set_next(next);
            sink.write(&mut node)?;
            self.pages += 1;
            page_id = next;
        }
        Ok(KeyData::Overflow {
            page_id: first,
            len: key.len() as u32,
        })
    }
}
