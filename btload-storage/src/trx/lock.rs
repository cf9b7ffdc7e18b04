use crate::catalog::TableID;
use crate::error::{Error, Result};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub type LockOwner = u64;

const LOCK_WAIT_SLICE: Duration = Duration::from_millis(10);

/// Table lock modes with the classic multi-granularity compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentShared,
    IntentExclusive,
    Shared,
    Exclusive,
}

impl LockMode {
    #[inline]
    pub fn compatible(self, other: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, other),
            (IntentShared, IntentShared)
                | (IntentShared, IntentExclusive)
                | (IntentShared, Shared)
                | (IntentExclusive, IntentShared)
                | (IntentExclusive, IntentExclusive)
                | (Shared, IntentShared)
                | (Shared, Shared)
        )
    }
}

/// Table-level lock table.
///
/// One owner holds at most one mode per table. Requesting another mode
/// converts the held lock, which covers both promotion and demotion.
#[derive(Default)]
pub struct LockManager {
    tables: Mutex<HashMap<TableID, HashMap<LockOwner, LockMode>>>,
    cond: Condvar,
}

impl LockManager {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire or convert lock of given table.
    ///
    /// Waits at most `timeout`. If `interrupt` is provided and gets set
    /// during the wait, returns `Error::Interrupted`.
    pub fn lock(
        &self,
        owner: LockOwner,
        table_id: TableID,
        mode: LockMode,
        timeout: Duration,
        interrupt: Option<&AtomicBool>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut g = self.tables.lock();
        loop {
            let holders = g.entry(table_id).or_default();
            let conflict = holders
                .iter()
                .any(|(o, m)| *o != owner && !m.compatible(mode));
            if !conflict {
                let prev = holders.insert(owner, mode);
                if prev.is_some() {
                    // demotion may unblock waiters.
                    self.cond.notify_all();
                }
                return Ok(());
            }
            if interrupt.is_some_and(|i| i.load(Ordering::Acquire)) {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout);
            }
            let wait = (deadline - now).min(LOCK_WAIT_SLICE);
            self.cond.wait_for(&mut g, wait);
        }
    }

    /// Convert a held lock, failing if the owner holds nothing.
    #[inline]
    pub fn convert(
        &self,
        owner: LockOwner,
        table_id: TableID,
        mode: LockMode,
        timeout: Duration,
        interrupt: Option<&AtomicBool>,
    ) -> Result<()> {
        if self.held(owner, table_id).is_none() {
            return Err(Error::LockNotHeld);
        }
        self.lock(owner, table_id, mode, timeout, interrupt)
    }

    /// Convert a held lock and keep retrying through timeouts until it is
    /// granted. Interruption is ignored.
    pub fn convert_until_granted(
        &self,
        owner: LockOwner,
        table_id: TableID,
        mode: LockMode,
        retry_timeout: Duration,
    ) -> Result<()> {
        let mut retries = 0u64;
        loop {
            match self.convert(owner, table_id, mode, retry_timeout, None) {
                Ok(()) => {
                    if retries > 0 {
                        debug!(
                            "lock conversion of table {} to {:?} granted after {} retries",
                            table_id, mode, retries
                        );
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable_lock_error() => {
                    retries += 1;
                    debug!(
                        "lock conversion of table {} to {:?} retry {}",
                        table_id, mode, retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[inline]
    pub fn release(&self, owner: LockOwner, table_id: TableID) {
        let mut g = self.tables.lock();
        if let Some(holders) = g.get_mut(&table_id) {
            holders.remove(&owner);
            if holders.is_empty() {
                g.remove(&table_id);
            }
        }
        self.cond.notify_all();
    }

    #[inline]
    pub fn held(&self, owner: LockOwner, table_id: TableID) -> Option<LockMode> {
        let g = self.tables.lock();
        g.get(&table_id).and_then(|h| h.get(&owner).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_compatibility() {
        let lm = LockManager::new();
        let t = Duration::from_millis(20);
        lm.lock(1, 10, LockMode::IntentExclusive, t, None).unwrap();
        lm.lock(2, 10, LockMode::IntentExclusive, t, None).unwrap();
        assert!(matches!(
            lm.lock(3, 10, LockMode::Shared, t, None),
            Err(Error::LockTimeout)
        ));
        assert!(matches!(
            lm.convert(1, 10, LockMode::Exclusive, t, None),
            Err(Error::LockTimeout)
        ));
        lm.release(2, 10);
        lm.convert(1, 10, LockMode::Exclusive, t, None).unwrap();
        assert_eq!(lm.held(1, 10), Some(LockMode::Exclusive));
        assert!(matches!(
            lm.convert(9, 10, LockMode::Shared, t, None),
            Err(Error::LockNotHeld)
        ));
    }

    #[test]
    fn test_lock_interrupt() {
        let lm = LockManager::new();
        lm.lock(1, 10, LockMode::Exclusive, Duration::ZERO, None)
            .unwrap();
        let interrupt = AtomicBool::new(true);
        let res = lm.lock(
            2,
            10,
            LockMode::IntentShared,
            Duration::from_secs(5),
            Some(&interrupt),
        );
        assert!(matches!(res, Err(Error::Interrupted)));
    }

    #[test]
    fn test_lock_convert_until_granted() {
        let lm = Arc::new(LockManager::new());
        let t = Duration::from_millis(5);
        lm.lock(1, 10, LockMode::IntentExclusive, t, None).unwrap();
        lm.lock(2, 10, LockMode::IntentExclusive, t, None).unwrap();
        let handle = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                lm.release(2, 10);
            })
        };
        lm.convert_until_granted(1, 10, LockMode::Exclusive, t)
            .unwrap();
        assert_eq!(lm.held(1, 10), Some(LockMode::Exclusive));
        handle.join().unwrap();
    }
}
