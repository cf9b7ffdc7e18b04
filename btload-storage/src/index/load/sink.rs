use crate::error::Result;
use crate::file::{FileID, PageID, PageStore};
use crate::index::node::NodeBuf;
use crate::wal::{LogRecord, LogSink};

/// Page output of one build. Every allocation and page write is
/// logged so that recovery can replay the new file.
pub(crate) struct PageSink<'a> {
    store: &'a dyn PageStore,
    log: &'a dyn LogSink,
    allocated: usize,
}

impl<'a> PageSink<'a> {
    #[inline]
    pub fn new(store: &'a dyn PageStore, log: &'a dyn LogSink) -> Self {
        PageSink {
            store,
            log,
            allocated: 0,
        }
    }

    #[inline]
    pub fn file_id(&self) -> FileID {
        self.store.file_id()
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    #[inline]
    pub fn store(&self) -> &'a dyn PageStore {
        self.store
    }

    /// Number of pages allocated through this sink.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn allocate(&mut self) -> Result<PageID> {
        let page_id = self.store.allocate()?;
        self.allocated += 1;
        self.log.append(LogRecord::NewPage {
            file_id: self.file_id(),
            page_id,
        })?;
        Ok(page_id)
    }

    /// Seal the node, write it to store and log its image.
    #[inline]
    pub fn write(&mut self, node: &mut NodeBuf) -> Result<()> {
        let page_id = node.page_id();
        let file_id = self.file_id();
        let (data, checksum) = node.seal();
        self.store.write(page_id, data)?;
        self.log.append(LogRecord::PageImage {
            file_id,
            page_id,
            checksum,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    #[inline]
    pub fn release(&mut self, page_id: PageID) -> Result<()> {
        self.store.release(page_id)
    }
}
