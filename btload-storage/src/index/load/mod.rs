//! Offline bulk loading of a B-tree index.
//!
//! The build is a pipeline: heap rows are turned into key/row tuples,
//! sorted externally, then packed into the leaf level strictly left to
//! right. Upper levels are built bottom-up from the leaf chain and the
//! final top page is copied into page 0 together with index statistics.
//!
//! The whole build is one system operation. The new file is recorded by
//! an undo record, so any failure destroys the file and aborts the
//! operation.
mod feeder;
mod leaf;
mod nonleaf;
mod overflow;
mod sink;

pub use overflow::overflow_entry_capacity;

pub(crate) use feeder::{ScanCutoff, SortFeeder};

use crate::catalog::{ColumnSpec, IndexSpec, TableID};
use crate::conf::LoadConfig;
use crate::error::{Error, Result};
use crate::file::{FileID, PageID, PageStore, PageStoreFactory, ROOT_PAGE_ID};
use crate::heap::HeapRef;
use crate::index::entry::EntryFormat;
use crate::index::fk::{verify_foreign_key, ForeignKeyRef};
use crate::index::key::{FunctionIndex, KeyDomain, KeyExtractor, RowFilter};
use crate::index::node::{RootMeta, LEAF_LEVEL, NODE_HEADER_LEN, ROOT_META_RESERVE};
use crate::index::sort::ExternalSorter;
use crate::index::tree::BTreeReader;
use crate::trx::Watermark;
use crate::wal::{LogRecord, LogSink};
use leaf::{LeafBuilder, LeafOutput, VacuumTarget};
use log::{debug, info, warn};
use nonleaf::{finalize_root, write_empty_root, NonLeafBuilder};
use scopeguard::ScopeGuard;
use sink::PageSink;
use std::sync::Arc;

/// Environment shared by one offline build.
pub struct LoadContext<'a> {
    pub config: &'a LoadConfig,
    pub files: &'a dyn PageStoreFactory,
    pub log: &'a dyn LogSink,
    /// Cutoff of version compaction.
    pub watermark: Watermark,
}

/// What to build.
#[derive(Clone)]
pub struct LoadArgs {
    pub table_id: TableID,
    pub columns: Vec<ColumnSpec>,
    pub index: IndexSpec,
    /// Heaps of the class hierarchy, in class order.
    pub heaps: Vec<HeapRef>,
    pub not_null: bool,
    pub fk: Option<ForeignKeyRef>,
    pub filter: Option<Arc<dyn RowFilter>>,
    pub function_index: Option<Arc<dyn FunctionIndex>>,
    /// Worker count of online build, config value if not set.
    pub workers: Option<usize>,
}

impl LoadArgs {
    #[inline]
    pub fn new(
        table_id: TableID,
        columns: Vec<ColumnSpec>,
        index: IndexSpec,
        heaps: Vec<HeapRef>,
    ) -> Self {
        LoadArgs {
            table_id,
            columns,
            index,
            heaps,
            not_null: false,
            fk: None,
            filter: None,
            function_index: None,
            workers: None,
        }
    }

    #[inline]
    pub fn not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }

    #[inline]
    pub fn foreign_key(mut self, fk: ForeignKeyRef) -> Self {
        self.fk = Some(fk);
        self
    }

    #[inline]
    pub fn filter(mut self, filter: Arc<dyn RowFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    #[inline]
    pub fn function_index(mut self, function_index: Arc<dyn FunctionIndex>) -> Self {
        self.function_index = Some(function_index);
        self
    }

    #[inline]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Domain of index keys. A function index defines its own columns.
    #[inline]
    pub fn key_domain(&self) -> Result<KeyDomain> {
        match self.function_index.as_ref() {
            Some(f) => KeyDomain::new(f.key_columns()),
            None => KeyDomain::from_index(&self.columns, &self.index),
        }
    }

    #[inline]
    pub fn unique(&self) -> bool {
        self.index.unique()
    }

    /// Entries carry class id if rows come from several heaps or
    /// uniqueness spans the class hierarchy.
    #[inline]
    pub fn has_class(&self) -> bool {
        self.heaps.len() > 1 || self.unique()
    }

    #[inline]
    pub(crate) fn extractor<'a>(&'a self, domain: &'a KeyDomain) -> KeyExtractor<'a> {
        let not_null = self.not_null || self.index.not_null();
        let extractor = KeyExtractor::new(domain, &self.columns, &self.index, not_null);
        match self.function_index.as_deref() {
            Some(f) => extractor.with_function(f),
            None => extractor,
        }
    }
}

/// Counters of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Row versions read from heaps.
    pub scanned: u64,
    /// Rows rejected by filter.
    pub filtered: u64,
    /// Versions dropped as already vacuumed.
    pub dropped: u64,
    /// Index entries, including those of all-null keys which are not stored.
    pub entries: u64,
    /// Keys without null and with at least one visible entry.
    pub distinct: u64,
    /// Entries whose key has any null component.
    pub nulls: u64,
    pub vacuum_notified: u64,
    pub sort_runs: usize,
    pub levels: u16,
    pub leaf_pages: usize,
    pub nonleaf_pages: usize,
    pub overflow_pages: usize,
    pub overflow_key_pages: usize,
}

/// Handle of a built index.
pub struct BuiltIndex {
    pub file_id: FileID,
    pub store: Arc<dyn PageStore>,
    pub meta: RootMeta,
    pub stats: LoadStats,
}

impl BuiltIndex {
    #[inline]
    pub fn reader(&self) -> Result<BTreeReader> {
        BTreeReader::open(Arc::clone(&self.store))
    }
}

/// Limits derived from page size, shared by all builders.
pub(crate) struct BuildEnv<'a> {
    pub domain: &'a KeyDomain,
    pub fmt: EntryFormat,
    pub unique: bool,
    pub watermark: Watermark,
    /// Longer keys are moved to overflow key pages.
    pub max_inpage_key: usize,
    /// Entries kept in leaf record, the rest go to overflow pages.
    pub entry_cap: usize,
    pub leaf_reserve: usize,
    pub nonleaf_reserve: usize,
}

impl<'a> BuildEnv<'a> {
    #[inline]
    pub fn new(
        config: &LoadConfig,
        domain: &'a KeyDomain,
        unique: bool,
        has_class: bool,
        watermark: Watermark,
    ) -> Self {
        let fmt = EntryFormat::new(has_class);
        let usable = config.page_size - NODE_HEADER_LEN - ROOT_META_RESERVE;
        BuildEnv {
            domain,
            fmt,
            unique,
            watermark,
            max_inpage_key: usable / 8,
            entry_cap: (usable / 4 / fmt.entry_size()).max(1),
            leaf_reserve: config.leaf_reserve(),
            nonleaf_reserve: config.nonleaf_reserve(),
        }
    }
}

/// Build index from heaps without concurrent modification.
pub fn build_index_offline(ctx: &LoadContext<'_>, args: LoadArgs) -> Result<BuiltIndex> {
    ctx.config.validate()?;
    let domain = args.key_domain()?;
    let env = BuildEnv::new(
        ctx.config,
        &domain,
        args.unique(),
        args.has_class(),
        ctx.watermark,
    );
    info!(
        "offline build of index {} on table {} started, {} heaps",
        args.index.index_name,
        args.table_id,
        args.heaps.len()
    );
    ctx.log.append(LogRecord::SysOpBegin)?;
    let store = match ctx.files.create(ctx.config.page_size) {
        Ok(store) => store,
        Err(e) => {
            ctx.log.append(LogRecord::SysOpAbort)?;
            return Err(e);
        }
    };
    let mut guard = scopeguard::guard(store.file_id(), |file_id| {
        if let Err(e) = ctx.files.destroy(file_id) {
            warn!("destroy index file {} failed: {}", file_id, e);
        }
        if let Err(e) = ctx.log.append(LogRecord::SysOpAbort) {
            warn!("log abort of index build failed: {}", e);
        }
        warn!("index build aborted, file {} destroyed", file_id);
    });
    ctx.log.append(LogRecord::CreateIndexUndo {
        file_id: store.file_id(),
        table_id: args.table_id,
    })?;

    let mut stats = LoadStats::default();
    let mut sorter = ExternalSorter::new(
        ctx.config.sort_buffer_size.as_u64() as usize,
        &ctx.config.sort_dir,
    );
    {
        let mut feeder = SortFeeder::new(
            &args.heaps,
            args.extractor(&domain),
            args.filter.as_deref(),
            ScanCutoff::Watermark(ctx.watermark),
            args.has_class(),
        );
        while let Some(rec) = feeder.next(&mut stats)? {
            sorter.push(rec)?;
        }
    }
    stats.sort_runs = sorter.runs();
    let mut run = sorter.finish()?;
    debug!(
        "{} rows scanned, {} filtered, {} dropped, {} sort runs",
        stats.scanned, stats.filtered, stats.dropped, stats.sort_runs
    );

    let mut sink = PageSink::new(&*store, ctx.log);
    // page 0 is reserved for root.
    if sink.allocate()? != ROOT_PAGE_ID {
        return Err(Error::InvalidState);
    }
    let mut leaf = LeafBuilder::new(&env, sink, stats);
    while let Some(rec) = run.next()? {
        leaf.add(rec)?;
    }
    let LeafOutput {
        mut sink,
        mut ovf_keys,
        first_leaf,
        mut stats,
        vacuum,
    } = leaf.finish()?;

    let (store, top) = match first_leaf {
        Some(first_leaf) => {
            let mut builder = NonLeafBuilder::new(&env, &mut sink, &mut ovf_keys);
            let (top, levels) = builder.build(first_leaf, stats.leaf_pages)?;
            stats.nonleaf_pages = builder.pages;
            stats.levels = levels;
            stats.overflow_key_pages = ovf_keys.pages();
            let meta = root_meta(&args, &env, &stats);
            finalize_root(&mut sink, top, &meta)?;
            debug!("{} pages allocated in file {}", sink.allocated(), sink.file_id());
            (store, Some(top))
        }
        None => {
            // Nothing stored: replace file with a canonical empty index.
            let old_file_id = store.file_id();
            drop(sink);
            drop(store);
            ctx.files.destroy(old_file_id)?;
            let store = ctx.files.create(ctx.config.page_size)?;
            *guard = store.file_id();
            ctx.log.append(LogRecord::CreateIndexUndo {
                file_id: store.file_id(),
                table_id: args.table_id,
            })?;
            stats.levels = LEAF_LEVEL;
            stats.leaf_pages = 1;
            let meta = root_meta(&args, &env, &stats);
            let mut sink = PageSink::new(&*store, ctx.log);
            write_empty_root(&mut sink, &meta)?;
            debug!(
                "no key stored, empty index written to file {}",
                store.file_id()
            );
            (store, None)
        }
    };

    let reader = BTreeReader::open(Arc::clone(&store))?;
    if let Some(fk) = args.fk.as_ref() {
        let mut cursor = reader.cursor()?;
        verify_foreign_key(
            std::iter::from_fn(|| cursor.next().transpose()),
            &domain,
            fk,
        )?;
    }
    // logged only once every check has passed.
    if let Some(top) = top {
        stats.vacuum_notified = notify_vacuum(ctx.log, store.file_id(), top, &vacuum)?;
    }
    let meta = reader.meta().clone();
    ctx.log.append(LogRecord::SysOpCommit)?;
    let file_id = ScopeGuard::into_inner(guard);
    info!(
        "index {} built in file {}: {} levels, {} leaf pages, {} entries, {} distinct keys",
        args.index.index_name,
        file_id,
        stats.levels,
        stats.leaf_pages,
        stats.entries,
        stats.distinct
    );
    Ok(BuiltIndex {
        file_id,
        store,
        meta,
        stats,
    })
}

/// Log vacuum notifications. Records of the top page now live in root.
fn notify_vacuum(
    log: &dyn LogSink,
    file_id: FileID,
    top: PageID,
    targets: &[VacuumTarget],
) -> Result<u64> {
    for t in targets {
        let page_id = if t.page_id == top {
            ROOT_PAGE_ID
        } else {
            t.page_id
        };
        log.append(LogRecord::VacuumNotify {
            file_id,
            page_id,
            row_id: t.row_id,
            del: t.del,
        })?;
        debug!("vacuum notified for row {} on leaf page {}", t.row_id, page_id);
    }
    Ok(targets.len() as u64)
}

#[inline]
fn root_meta(args: &LoadArgs, env: &BuildEnv<'_>, stats: &LoadStats) -> RootMeta {
    RootMeta {
        distinct: stats.distinct,
        entries: stats.entries,
        nulls: stats.nulls,
        table_id: args.table_id,
        unique: env.unique,
        has_class: env.fmt.has_class,
        domain: env.domain.clone(),
    }
}
