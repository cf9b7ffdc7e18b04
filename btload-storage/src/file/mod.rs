//! Page stores backing index files.
//!
//! An index lives in its own file. Pages are addressed by [`PageID`],
//! which is the page number inside the file. Page 0 is the first page
//! ever allocated and is reserved for the root.
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type PageID = u64;
pub const INVALID_PAGE_ID: PageID = !0;
pub const ROOT_PAGE_ID: PageID = 0;

pub type FileID = u64;

/// Fixed-size page storage of one file.
pub trait PageStore: Send + Sync {
    fn file_id(&self) -> FileID;

    fn page_size(&self) -> usize;

    /// Allocate a new zeroed page.
    fn allocate(&self) -> Result<PageID>;

    /// Return page to free list of the file.
    fn release(&self, page_id: PageID) -> Result<()>;

    fn read(&self, page_id: PageID, buf: &mut [u8]) -> Result<()>;

    fn write(&self, page_id: PageID, buf: &[u8]) -> Result<()>;

    /// Number of pages in use.
    fn page_count(&self) -> usize;
}

/// Creates and destroys page stores.
pub trait PageStoreFactory: Send + Sync {
    fn create(&self, page_size: usize) -> Result<Arc<dyn PageStore>>;

    /// Destroy file and all its pages.
    fn destroy(&self, file_id: FileID) -> Result<()>;

    fn exists(&self, file_id: FileID) -> bool;
}

/// Free page bookkeeping shared by stores.
#[derive(Default)]
struct PageAlloc {
    next: PageID,
    free: Vec<PageID>,
    used: usize,
}

impl PageAlloc {
    #[inline]
    fn allocate(&mut self, limit: Option<usize>) -> Result<(PageID, bool)> {
        if limit.is_some_and(|l| self.used >= l) {
            return Err(Error::PageAllocFailed);
        }
        self.used += 1;
        // reuse freed page with the smallest id, page 0 comes first.
        if let Some(pos) = self
            .free
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| **p)
            .map(|(i, _)| i)
        {
            return Ok((self.free.swap_remove(pos), false));
        }
        let page_id = self.next;
        self.next += 1;
        Ok((page_id, true))
    }

    #[inline]
    fn release(&mut self, page_id: PageID) -> Result<()> {
        if page_id >= self.next || self.free.contains(&page_id) {
            return Err(Error::PageNotFound(page_id));
        }
        self.free.push(page_id);
        self.used -= 1;
        Ok(())
    }

    #[inline]
    fn check(&self, page_id: PageID) -> Result<()> {
        if page_id >= self.next || self.free.contains(&page_id) {
            return Err(Error::PageNotFound(page_id));
        }
        Ok(())
    }
}

/// In-memory page store, pages are kept in an arena indexed by page id.
pub struct MemPageStore {
    file_id: FileID,
    page_size: usize,
    page_limit: Option<usize>,
    inner: Mutex<(PageAlloc, Vec<Box<[u8]>>)>,
}

impl MemPageStore {
    #[inline]
    pub fn new(file_id: FileID, page_size: usize) -> Self {
        MemPageStore {
            file_id,
            page_size,
            page_limit: None,
            inner: Mutex::new((PageAlloc::default(), vec![])),
        }
    }

    /// Fail allocation once given number of pages are in use.
    #[inline]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }
}

impl PageStore for MemPageStore {
    #[inline]
    fn file_id(&self) -> FileID {
        self.file_id
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    fn allocate(&self) -> Result<PageID> {
        let mut g = self.inner.lock();
        let (alloc, pages) = &mut *g;
        let (page_id, fresh) = alloc.allocate(self.page_limit)?;
        if fresh {
            pages.push(vec![0u8; self.page_size].into_boxed_slice());
        } else {
            pages[page_id as usize].fill(0);
        }
        Ok(page_id)
    }

    #[inline]
    fn release(&self, page_id: PageID) -> Result<()> {
        self.inner.lock().0.release(page_id)
    }

    #[inline]
    fn read(&self, page_id: PageID, buf: &mut [u8]) -> Result<()> {
        let g = self.inner.lock();
        g.0.check(page_id)?;
        buf.copy_from_slice(&g.1[page_id as usize]);
        Ok(())
    }

    #[inline]
    fn write(&self, page_id: PageID, buf: &[u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(Error::InvalidArgument);
        }
        let mut g = self.inner.lock();
        g.0.check(page_id)?;
        g.1[page_id as usize].copy_from_slice(buf);
        Ok(())
    }

    #[inline]
    fn page_count(&self) -> usize {
        self.inner.lock().0.used
    }
}

/// Factory of in-memory page stores.
#[derive(Default)]
pub struct MemFileFactory {
    next_file_id: AtomicU64,
    page_limit: Option<usize>,
    files: Mutex<HashMap<FileID, Arc<MemPageStore>>>,
}

impl MemFileFactory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every created store fails allocation beyond the limit.
    #[inline]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    #[inline]
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

impl PageStoreFactory for MemFileFactory {
    #[inline]
    fn create(&self, page_size: usize) -> Result<Arc<dyn PageStore>> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let mut store = MemPageStore::new(file_id, page_size);
        if let Some(limit) = self.page_limit {
            store = store.with_page_limit(limit);
        }
        let store = Arc::new(store);
        self.files.lock().insert(file_id, Arc::clone(&store));
        Ok(store)
    }

    #[inline]
    fn destroy(&self, file_id: FileID) -> Result<()> {
        self.files
            .lock()
            .remove(&file_id)
            .map(|_| ())
            .ok_or(Error::FileNotFound(file_id))
    }

    #[inline]
    fn exists(&self, file_id: FileID) -> bool {
        self.files.lock().contains_key(&file_id)
    }
}

/// Page store backed by a file on disk.
pub struct FilePageStore {
    file_id: FileID,
    page_size: usize,
    file: File,
    alloc: Mutex<PageAlloc>,
}

impl FilePageStore {
    #[inline]
    pub fn create(file_id: FileID, path: PathBuf, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(FilePageStore {
            file_id,
            page_size,
            file,
            alloc: Mutex::new(PageAlloc::default()),
        })
    }

    #[inline]
    fn offset(&self, page_id: PageID) -> u64 {
        page_id * self.page_size as u64
    }
}

impl PageStore for FilePageStore {
    #[inline]
    fn file_id(&self) -> FileID {
        self.file_id
    }

    #[inline]
    fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    fn allocate(&self) -> Result<PageID> {
        let (page_id, _) = self.alloc.lock().allocate(None)?;
        let zero = vec![0u8; self.page_size];
        self.file.write_all_at(&zero, self.offset(page_id))?;
        Ok(page_id)
    }

    #[inline]
    fn release(&self, page_id: PageID) -> Result<()> {
        self.alloc.lock().release(page_id)
    }

    #[inline]
    fn read(&self, page_id: PageID, buf: &mut [u8]) -> Result<()> {
        self.alloc.lock().check(page_id)?;
        self.file.read_exact_at(buf, self.offset(page_id))?;
        Ok(())
    }

    #[inline]
    fn write(&self, page_id: PageID, buf: &[u8]) -> Result<()> {
        if buf.len() != self.page_size {
            return Err(Error::InvalidArgument);
        }
        self.alloc.lock().check(page_id)?;
        self.file.write_all_at(buf, self.offset(page_id))?;
        Ok(())
    }

    #[inline]
    fn page_count(&self) -> usize {
        self.alloc.lock().used
    }
}

/// Factory of file page stores under one directory.
/// File of id N is named `index-N.btl`.
pub struct FileFactory {
    dir: PathBuf,
    next_file_id: AtomicU64,
    files: Mutex<HashMap<FileID, PathBuf>>,
}

impl FileFactory {
    #[inline]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileFactory {
            dir: dir.into(),
            next_file_id: AtomicU64::new(0),
            files: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn file_path(&self, file_id: FileID) -> PathBuf {
        self.dir.join(format!("index-{}.btl", file_id))
    }
}

impl PageStoreFactory for FileFactory {
    #[inline]
    fn create(&self, page_size: usize) -> Result<Arc<dyn PageStore>> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::SeqCst);
        let path = self.file_path(file_id);
        let store = FilePageStore::create(file_id, path.clone(), page_size)?;
        self.files.lock().insert(file_id, path);
        Ok(Arc::new(store))
    }

    #[inline]
    fn destroy(&self, file_id: FileID) -> Result<()> {
        let path = self
            .files
            .lock()
            .remove(&file_id)
            .ok_or(Error::FileNotFound(file_id))?;
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[inline]
    fn exists(&self, file_id: FileID) -> bool {
        self.files.lock().contains_key(&file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_page_store(store: &dyn PageStore) {
        let p0 = store.allocate().unwrap();
        let p1 = store.allocate().unwrap();
        assert_eq!((p0, p1), (0, 1));
        let mut page = vec![0u8; store.page_size()];
        page[0] = 7;
        page[store.page_size() - 1] = 9;
        store.write(p1, &page).unwrap();
        let mut out = vec![0u8; store.page_size()];
        store.read(p1, &mut out).unwrap();
        assert_eq!(out, page);
        assert_eq!(store.page_count(), 2);

        store.release(p1).unwrap();
        assert!(store.read(p1, &mut out).is_err());
        assert!(store.release(p1).is_err());
        // released page is reused and zeroed.
        let p2 = store.allocate().unwrap();
        assert_eq!(p2, p1);
        store.read(p2, &mut out).unwrap();
        assert!(out.iter().all(|b| *b == 0));
        assert!(store.write(p2, &out[..10]).is_err());
    }

    #[test]
    fn test_mem_page_store() {
        run_page_store(&MemPageStore::new(0, 1024));
    }

    #[test]
    fn test_mem_page_store_limit() {
        let store = MemPageStore::new(0, 1024).with_page_limit(2);
        store.allocate().unwrap();
        store.allocate().unwrap();
        assert!(matches!(store.allocate(), Err(Error::PageAllocFailed)));
    }

    #[test]
    fn test_file_page_store() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FileFactory::new(dir.path());
        let store = factory.create(4096).unwrap();
        run_page_store(&*store);
        let file_id = store.file_id();
        assert!(factory.file_path(file_id).exists());
        factory.destroy(file_id).unwrap();
        assert!(!factory.file_path(file_id).exists());
        assert!(!factory.exists(file_id));
    }

    #[test]
    fn test_mem_file_factory() {
        let factory = MemFileFactory::new();
        let s1 = factory.create(1024).unwrap();
        let s2 = factory.create(1024).unwrap();
        assert_ne!(s1.file_id(), s2.file_id());
        assert_eq!(factory.file_count(), 2);
        factory.destroy(s1.file_id()).unwrap();
        assert!(factory.destroy(s1.file_id()).is_err());
        assert!(factory.exists(s2.file_id()));
    }
}
