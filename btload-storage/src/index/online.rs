//! Online index build.
//!
//! Table stays open for DML during the build. The scanner reads rows
//! visible to the build snapshot and dispatches them in units to a pool
//! of worker threads. Each worker applies its unit through the ordinary
//! insert path of the live index, so concurrent changes and build
//! changes meet in one structure.
//!
//! After all units are applied, table lock is promoted to exclusive,
//! then uniqueness and foreign key are checked against the final state.
use crate::conf::LoadConfig;
use crate::error::{Error, Result};
use crate::index::entry::IndexEntry;
use crate::index::fk::verify_foreign_key;
use crate::index::live::IndexInsert;
use crate::index::load::{LoadArgs, LoadStats, ScanCutoff, SortFeeder};
use crate::index::sort::SortRecord;
use crate::row::RowID;
use crate::thread::spawn_named;
use crate::trx::lock::{LockManager, LockMode, LockOwner};
use crate::trx::TrxID;
use btload_datatype::memcmp::MemCmpKey;
use crossbeam_utils::CachePadded;
use flume::{Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::mem;
use std::ops::Bound;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Environment of one online build.
pub struct OnlineContext<'a> {
    pub config: &'a LoadConfig,
    pub locks: &'a LockManager,
    /// Owner of the table lock held by the build.
    pub lock_owner: LockOwner,
    /// Snapshot timestamp of the build.
    pub snapshot_ts: TrxID,
    pub interrupt: &'a AtomicBool,
    /// Wait slice of each lock promotion attempt.
    pub lock_retry: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineBuildStats {
    pub scan: LoadStats,
    pub units: u64,
    pub inserted: u64,
    pub workers: usize,
}

/// Batch of tuples applied by one worker.
struct WorkUnit {
    recs: Vec<SortRecord>,
}

/// Non-null keys with visible row, reported by each unit for the
/// uniqueness re-check.
type UnitKeys = Vec<(MemCmpKey, RowID)>;

#[derive(Default)]
struct WorkerShared {
    failed: AtomicBool,
    error: Mutex<Option<Error>>,
    executed: CachePadded<AtomicU64>,
}

impl WorkerShared {
    /// Record the first error and raise failure flag.
    #[inline]
    fn fail(&self, err: Error) {
        let mut g = self.error.lock();
        if g.is_none() {
            *g = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }

    #[inline]
    fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    #[inline]
    fn take_error(&self) -> Option<Error> {
        self.error.lock().take()
    }
}

fn apply_unit(index: &dyn IndexInsert, unit: WorkUnit, unique: bool) -> Result<UnitKeys> {
    let mut keys = vec![];
    for rec in unit.recs {
        if unique && !rec.has_null && rec.mvcc.is_currently_visible() {
            keys.push((rec.key.clone(), rec.row_id));
        }
        let entry = IndexEntry::new(rec.row_id, rec.class_id, rec.mvcc);
        index.insert(rec.key, rec.has_null, entry)?;
    }
    Ok(keys)
}

fn worker_loop(
    index: Arc<dyn IndexInsert>,
    rx: Receiver<WorkUnit>,
    keys_tx: Sender<UnitKeys>,
    shared: Arc<WorkerShared>,
    unique: bool,
) {
    while let Ok(unit) = rx.recv() {
        // after failure, units are drained without being applied.
        if !shared.failed() {
            match apply_unit(&*index, unit, unique) {
                Ok(keys) => {
                    if unique && keys_tx.send(keys).is_err() {
                        shared.fail(Error::SendError);
                    }
                }
                Err(e) => {
                    warn!("index unit failed: {}", e);
                    shared.fail(e);
                }
            }
        }
        shared.executed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Scan heaps and dispatch units. Returns number of dispatched units.
fn dispatch_units(
    ctx: &OnlineContext<'_>,
    feeder: &mut SortFeeder<'_>,
    tx: &Sender<WorkUnit>,
    shared: &WorkerShared,
    stats: &mut OnlineBuildStats,
) -> Result<u64> {
    let unit_size = ctx.config.online_unit_size.as_u64() as usize;
    let mut recs = vec![];
    let mut unit_bytes = 0;
    let mut dispatched = 0u64;
    loop {
        let rec = feeder.next(&mut stats.scan)?;
        let end = rec.is_none();
        if let Some(rec) = rec {
            unit_bytes += rec.packed_len();
            recs.push(rec);
        }
        if recs.is_empty() || (!end && unit_bytes < unit_size) {
            if end {
                return Ok(dispatched);
            }
            continue;
        }
        // batch boundary.
        if ctx.interrupt.load(Ordering::Acquire) {
            return Err(Error::Interrupted);
        }
        if shared.failed() {
            return Err(shared.take_error().unwrap_or(Error::WorkerFailed));
        }
        stats.inserted += recs.len() as u64;
        tx.send(WorkUnit {
            recs: mem::take(&mut recs),
        })?;
        unit_bytes = 0;
        dispatched += 1;
        if end {
            return Ok(dispatched);
        }
    }
}

/// Sleep until every dispatched unit is executed.
fn wait_units(
    ctx: &OnlineContext<'_>,
    shared: &WorkerShared,
    handles: Vec<JoinHandle<()>>,
    dispatched: u64,
) -> Result<()> {
    let poll = Duration::from_micros(ctx.config.online_poll_interval_us);
    while shared.executed.load(Ordering::Acquire) < dispatched {
        if handles.iter().all(|h| h.is_finished())
            && shared.executed.load(Ordering::Acquire) < dispatched
        {
            return Err(Error::WorkerFailed);
        }
        thread::sleep(poll);
    }
    for h in handles {
        h.join().map_err(|_| Error::WorkerFailed)?;
    }
    Ok(())
}

/// Confirm every key reported by the units against the live index.
/// A scanned row may collide with another scanned row or with a row
/// inserted by concurrent DML, and DML may have deleted either of them
/// meanwhile.
fn recheck_unique(args: &LoadArgs, index: &dyn IndexInsert, mut keys: UnitKeys) -> Result<()> {
    keys.sort();
    keys.dedup_by(|a, b| a.0 == b.0);
    for (key, _) in &keys {
        let Some(item) = index.lookup(key)? else {
            continue;
        };
        let mut rows: Vec<RowID> = item
            .entries
            .iter()
            .filter(|e| e.mvcc.is_currently_visible())
            .map(|e| e.row_id)
            .collect();
        if rows.len() > 1 {
            rows.sort();
            let domain = args.key_domain()?;
            return Err(Error::UniqueViolation {
                key: domain.display(key),
                first: rows[0],
                second: rows[1],
            });
        }
    }
    Ok(())
}

/// Build index while the table stays open for DML.
pub fn build_index_online(
    ctx: &OnlineContext<'_>,
    args: LoadArgs,
    index: Arc<dyn IndexInsert>,
) -> Result<OnlineBuildStats> {
    ctx.config.validate()?;
    let domain = args.key_domain()?;
    let unique = args.unique();
    let workers = args.workers.unwrap_or(ctx.config.online_workers);
    if workers == 0 {
        return Err(Error::InvalidArgument);
    }
    info!(
        "online build of index {} on table {} started, snapshot {}, {} workers",
        args.index.index_name, args.table_id, ctx.snapshot_ts, workers
    );
    let mut stats = OnlineBuildStats {
        workers,
        ..Default::default()
    };
    let shared = Arc::new(WorkerShared::default());
    let (tx, rx) = flume::bounded::<WorkUnit>(ctx.config.online_queue_depth);
    let (keys_tx, keys_rx) = flume::unbounded::<UnitKeys>();
    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let index = Arc::clone(&index);
        let rx = rx.clone();
        let keys_tx = keys_tx.clone();
        let shared = Arc::clone(&shared);
        let handle = spawn_named(
            format!("Index-Loader-{}", i),
            AssertUnwindSafe(move || worker_loop(index, rx, keys_tx, shared, unique)),
        );
        match handle {
            Ok(h) => handles.push(h),
            Err(e) => {
                // stop started workers before giving up.
                drop(tx);
                for h in handles {
                    let _ = h.join();
                }
                return Err(e);
            }
        }
    }
    drop(rx);
    drop(keys_tx);

    let scan_res = {
        let mut feeder = SortFeeder::new(
            &args.heaps,
            args.extractor(&domain),
            args.filter.as_deref(),
            ScanCutoff::Snapshot(ctx.snapshot_ts),
            args.has_class(),
        );
        dispatch_units(ctx, &mut feeder, &tx, &shared, &mut stats)
    };
    drop(tx);
    let dispatched = match scan_res {
        Ok(n) => n,
        Err(e) => {
            shared.failed.store(true, Ordering::Release);
            // units already queued are drained before returning.
            let executed = shared.executed.load(Ordering::Acquire);
            debug!("online scan stopped after {} executed units: {}", executed, e);
            for h in handles {
                let _ = h.join();
            }
            return Err(e);
        }
    };
    stats.units = dispatched;
    wait_units(ctx, &shared, handles, dispatched)?;
    if let Some(e) = shared.take_error() {
        return Err(e);
    }
    debug!(
        "{} units applied, {} tuples inserted",
        dispatched, stats.inserted
    );

    ctx.locks.convert_until_granted(
        ctx.lock_owner,
        args.table_id,
        LockMode::Exclusive,
        ctx.lock_retry,
    )?;
    if unique {
        let keys: UnitKeys = keys_rx.try_iter().flatten().collect();
        recheck_unique(&args, &*index, keys)?;
    }
    if let Some(fk) = args.fk.as_ref() {
        let items = index.range(Bound::Unbounded, Bound::Unbounded)?;
        verify_foreign_key(items.into_iter().map(Ok), &domain, fk)?;
    }
    info!(
        "online build of index {} finished: {} rows scanned, {} tuples in {} units",
        args.index.index_name, stats.scan.scanned, stats.inserted, stats.units
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        ColumnAttributes, ColumnSpec, IndexAttributes, IndexKey, IndexSpec, TableID,
    };
    use crate::file::MemFileFactory;
    use crate::heap::{HeapFile, HeapRef, MemHeap};
    use crate::index::fk::ForeignKeyRef;
    use crate::index::key::KeyDomain;
    use crate::index::live::LiveIndex;
    use crate::index::load::{build_index_offline, LoadContext};
    use crate::index::tree::{IndexLookup, LeafItem};
    use crate::trx::{MvccHeader, Watermark};
    use crate::value::{Val, ValKind};
    use crate::wal::MemLog;
    use std::collections::BTreeMap;
    use std::io::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    const TABLE_ID: TableID = 7;
    const BUILD_OWNER: LockOwner = 1;
    const DML_OWNER: LockOwner = 2;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", ValKind::I64, ColumnAttributes::empty()),
            ColumnSpec::new("cust", ValKind::I64, ColumnAttributes::NULLABLE),
        ]
    }

    fn cust_index(attrs: IndexAttributes) -> IndexSpec {
        IndexSpec::new("idx_cust", vec![IndexKey::new(1)], attrs)
    }

    fn cust_row(id: i64, cust: Option<i64>) -> Vec<Val> {
        vec![Val::from(id), cust.map(Val::from).unwrap_or(Val::Null)]
    }

    fn args_of(heap: &Arc<MemHeap>, attrs: IndexAttributes) -> LoadArgs {
        LoadArgs::new(
            TABLE_ID,
            columns(),
            cust_index(attrs),
            vec![HeapRef::new(Arc::clone(heap) as Arc<dyn HeapFile>)],
        )
    }

    fn live_of(args: &LoadArgs) -> Arc<LiveIndex> {
        Arc::new(LiveIndex::new(args.key_domain().unwrap()))
    }

    fn test_config() -> LoadConfig {
        LoadConfig::default()
            .online_workers(4)
            .online_unit_size(512u64)
            .online_queue_depth(2)
            .online_poll_interval_us(100)
    }

    struct Fixture {
        config: LoadConfig,
        locks: LockManager,
        interrupt: AtomicBool,
    }

    impl Fixture {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let locks = LockManager::new();
            locks
                .lock(
                    BUILD_OWNER,
                    TABLE_ID,
                    LockMode::IntentExclusive,
                    Duration::from_secs(1),
                    None,
                )
                .unwrap();
            Fixture {
                config: test_config(),
                locks,
                interrupt: AtomicBool::new(false),
            }
        }

        fn ctx(&self) -> OnlineContext<'_> {
            OnlineContext {
                config: &self.config,
                locks: &self.locks,
                lock_owner: BUILD_OWNER,
                snapshot_ts: 100,
                interrupt: &self.interrupt,
                lock_retry: Duration::from_millis(10),
            }
        }
    }

    fn visible_map(items: Vec<LeafItem>, sts: TrxID) -> BTreeMap<MemCmpKey, Vec<RowID>> {
        items
            .into_iter()
            .filter_map(|item| {
                let rows = item.rows_visible_to(sts);
                (!rows.is_empty()).then_some((item.key, rows))
            })
            .collect()
    }

    #[test]
    fn test_online_build_matches_offline() {
        let fx = Fixture::new();
        let heap = Arc::new(MemHeap::new(1, 0));
        let args = args_of(&heap, IndexAttributes::empty());
        let live = live_of(&args);
        let domain = args.key_domain().unwrap();
        for i in 0..2000i64 {
            let cust = if i % 17 == 0 { None } else { Some(i % 150) };
            let row_id = heap.insert(&cust_row(i, cust), 10);
            match i % 10 {
                // deleted before the snapshot.
                3 => heap.delete(row_id, 20).unwrap(),
                // deleted by DML after the snapshot.
                7 => {
                    heap.delete(row_id, 120).unwrap();
                    let (key, has_null) = domain.encode(&cust_row(i, cust)[1..]).unwrap();
                    let entry = IndexEntry::new(row_id, None, MvccHeader::deleted(10, 120));
                    live.insert(key, has_null, entry).unwrap();
                }
                _ => (),
            }
        }
        // rows inserted by DML after the snapshot go to the live index directly.
        for i in 2000..2100i64 {
            let cust = Some(i % 150);
            let row_id = heap.insert(&cust_row(i, cust), 150);
            let (key, has_null) = domain.encode(&cust_row(i, cust)[1..]).unwrap();
            let entry = IndexEntry::new(row_id, None, MvccHeader::inserted(150));
            live.insert(key, has_null, entry).unwrap();
        }

        let stats = build_index_online(
            &fx.ctx(),
            args_of(&heap, IndexAttributes::empty()),
            Arc::clone(&live) as Arc<dyn IndexInsert>,
        )
        .unwrap();
        assert_eq!(stats.workers, 4);
        assert!(stats.units > 1);
        assert_eq!(stats.scan.scanned, 2100);
        assert_eq!(fx.locks.held(BUILD_OWNER, TABLE_ID), Some(LockMode::Exclusive));

        let files = MemFileFactory::new();
        let log = MemLog::new();
        let offline = build_index_offline(
            &LoadContext {
                config: &fx.config,
                files: &files,
                log: &log,
                // rows inserted at 150 keep their timestamp.
                watermark: Watermark::new(130, 50),
            },
            args_of(&heap, IndexAttributes::empty()),
        )
        .unwrap();
        let reader = offline.reader().unwrap();
        for sts in [130, 200] {
            let expected = reader.range(Bound::Unbounded, Bound::Unbounded).unwrap();
            let actual = live.range(Bound::Unbounded, Bound::Unbounded).unwrap();
            assert_eq!(visible_map(actual, sts), visible_map(expected, sts));
        }
    }

    #[test]
    fn test_online_unique_violation() {
        let fx = Fixture::new();
        let heap = Arc::new(MemHeap::new(1, 0));
        for i in 0..300i64 {
            heap.insert(&cust_row(i, Some(i)), 10);
        }
        // deleted after snapshot, does not conflict.
        let gone = heap.insert(&cust_row(300, Some(5)), 10);
        heap.delete(gone, 120).unwrap();
        let args = args_of(&heap, IndexAttributes::UK);
        let live = live_of(&args);
        build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>).unwrap();

        let dup = heap.insert(&cust_row(301, Some(42)), 10);
        let args = args_of(&heap, IndexAttributes::UK);
        let live = live_of(&args);
        match build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>) {
            Err(Error::UniqueViolation { key, first, second }) => {
                assert_eq!(key, "(42)");
                assert!(first < second);
                assert_eq!(second, dup);
            }
            _ => panic!("unique violation expected"),
        }
    }

    #[test]
    fn test_online_unique_with_concurrent_insert() {
        let fx = Fixture::new();
        let heap = Arc::new(MemHeap::new(1, 0));
        for i in 0..300i64 {
            heap.insert(&cust_row(i, Some(i)), 10);
        }
        let args = args_of(&heap, IndexAttributes::UK);
        let live = live_of(&args);
        let domain = args.key_domain().unwrap();
        // inserted by DML after the snapshot, only the live index has it.
        let dml = heap.insert(&cust_row(300, Some(5)), 150);
        let (key, has_null) = domain.encode(&cust_row(300, Some(5))[1..]).unwrap();
        live.insert(key, has_null, IndexEntry::new(dml, None, MvccHeader::inserted(150)))
            .unwrap();
        match build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>) {
            Err(Error::UniqueViolation { key, first, second }) => {
                assert_eq!(key, "(5)");
                assert!(first < second);
                assert_eq!(second, dml);
            }
            _ => panic!("unique violation expected"),
        }
    }

    #[test]
    fn test_online_foreign_key() {
        let fx = Fixture::new();
        let pk_heap = Arc::new(MemHeap::new(2, 0));
        for id in 0..50i64 {
            pk_heap.insert(&cust_row(id, Some(id)), 10);
        }
        let files = MemFileFactory::new();
        let log = MemLog::new();
        let pk = build_index_offline(
            &LoadContext {
                config: &fx.config,
                files: &files,
                log: &log,
                watermark: Watermark::new(100, 50),
            },
            LoadArgs::new(
                2,
                columns(),
                IndexSpec::new("pk", vec![IndexKey::new(0)], IndexAttributes::PK),
                vec![HeapRef::new(pk_heap as Arc<dyn HeapFile>)],
            ),
        )
        .unwrap();
        let fk = ForeignKeyRef::new("fk_cust", Arc::new(pk.reader().unwrap()));

        let heap = Arc::new(MemHeap::new(1, 0));
        for i in 0..200i64 {
            let cust = if i % 9 == 0 { None } else { Some(i % 50) };
            heap.insert(&cust_row(i, cust), 10);
        }
        let args = args_of(&heap, IndexAttributes::empty()).foreign_key(fk.clone());
        let live = live_of(&args);
        build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>).unwrap();

        heap.insert(&cust_row(500, Some(77)), 10);
        let args = args_of(&heap, IndexAttributes::empty()).foreign_key(fk);
        let live = live_of(&args);
        match build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>) {
            Err(Error::ForeignKeyViolation { name, value }) => {
                assert_eq!(name, "fk_cust");
                assert_eq!(value, "(77)");
            }
            _ => panic!("foreign key violation expected"),
        }
    }

    /// Index failing or panicking after a number of inserts.
    struct FaultyIndex {
        inner: LiveIndex,
        left: AtomicUsize,
        panic: bool,
    }

    impl FaultyIndex {
        fn new(domain: KeyDomain, inserts: usize, panic: bool) -> Self {
            FaultyIndex {
                inner: LiveIndex::new(domain),
                left: AtomicUsize::new(inserts),
                panic,
            }
        }
    }

    impl IndexLookup for FaultyIndex {
        fn lookup(&self, key: &[u8]) -> Result<Option<LeafItem>> {
            self.inner.lookup(key)
        }

        fn range(&self, lo: Bound<&[u8]>, hi: Bound<&[u8]>) -> Result<Vec<LeafItem>> {
            self.inner.range(lo, hi)
        }
    }

    impl IndexInsert for FaultyIndex {
        fn insert(&self, key: MemCmpKey, has_null: bool, entry: IndexEntry) -> Result<()> {
            let allowed = self
                .left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |l| l.checked_sub(1))
                .is_ok();
            if !allowed {
                if self.panic {
                    panic!("index insert panic");
                }
                return Err(Error::IOError(ErrorKind::Other));
            }
            self.inner.insert(key, has_null, entry)
        }
    }

    fn many_rows() -> Arc<MemHeap> {
        let heap = Arc::new(MemHeap::new(1, 0));
        for i in 0..3000i64 {
            heap.insert(&cust_row(i, Some(i % 300)), 10);
        }
        heap
    }

    #[test]
    fn test_online_worker_error() {
        let fx = Fixture::new();
        let heap = many_rows();
        let args = args_of(&heap, IndexAttributes::empty());
        let index = Arc::new(FaultyIndex::new(args.key_domain().unwrap(), 100, false));
        let res = build_index_online(&fx.ctx(), args, index as Arc<dyn IndexInsert>);
        assert!(matches!(res, Err(Error::IOError(ErrorKind::Other))));
        // lock is not promoted on failure.
        assert_eq!(
            fx.locks.held(BUILD_OWNER, TABLE_ID),
            Some(LockMode::IntentExclusive)
        );
    }

    #[test]
    fn test_online_worker_panic() {
        let mut fx = Fixture::new();
        fx.config = test_config().online_workers(1);
        let heap = many_rows();
        let args = args_of(&heap, IndexAttributes::empty());
        let index = Arc::new(FaultyIndex::new(args.key_domain().unwrap(), 100, true));
        let res = build_index_online(&fx.ctx(), args, index as Arc<dyn IndexInsert>);
        assert!(matches!(
            res,
            Err(Error::WorkerFailed) | Err(Error::SendError)
        ));
    }

    #[test]
    fn test_online_interrupted() {
        let fx = Fixture::new();
        fx.interrupt.store(true, Ordering::Release);
        let heap = many_rows();
        let args = args_of(&heap, IndexAttributes::empty());
        let live = live_of(&args);
        let res = build_index_online(&fx.ctx(), args, Arc::clone(&live) as Arc<dyn IndexInsert>);
        assert!(matches!(res, Err(Error::Interrupted)));
        assert!(live.is_empty());
    }

    #[test]
    fn test_online_waits_for_lock() {
        let fx = Fixture::new();
        fx.locks
            .lock(
                DML_OWNER,
                TABLE_ID,
                LockMode::IntentExclusive,
                Duration::from_secs(1),
                None,
            )
            .unwrap();
        let heap = many_rows();
        let args = args_of(&heap, IndexAttributes::empty());
        let live = live_of(&args);
        let stats = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                fx.locks.release(DML_OWNER, TABLE_ID);
            });
            build_index_online(&fx.ctx(), args, Arc::clone(&live) as Arc<dyn IndexInsert>)
        })
        .unwrap();
        assert_eq!(stats.inserted, 3000);
        assert_eq!(live.len(), 300);
        assert_eq!(fx.locks.held(BUILD_OWNER, TABLE_ID), Some(LockMode::Exclusive));
        assert_eq!(fx.locks.held(DML_OWNER, TABLE_ID), None);
    }

    #[test]
    fn test_online_lock_not_held() {
        let fx = Fixture::new();
        fx.locks.release(BUILD_OWNER, TABLE_ID);
        let heap = many_rows();
        let args = args_of(&heap, IndexAttributes::empty());
        let live = live_of(&args);
        let res = build_index_online(&fx.ctx(), args, live as Arc<dyn IndexInsert>);
        assert!(matches!(res, Err(Error::LockNotHeld)));
    }
}
