//! Foreign key verification.
//!
//! Keys of the new index are merged against the leaf chain of the
//! referenced primary key. Both sides are sorted, so one forward cursor
//! per primary key partition is enough as long as targets keep growing.
use crate::error::{Error, Result};
use crate::index::key::KeyDomain;
use crate::index::tree::{BTreeReader, LeafCursor, LeafItem};
use crate::value::Val;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps key values of a foreign key to partition of the referenced index.
pub trait PartitionResolver: Send + Sync {
    fn resolve(&self, vals: &[Val]) -> Result<usize>;
}

/// Referenced primary key of a foreign key constraint.
#[derive(Clone)]
pub struct ForeignKeyRef {
    pub name: String,
    pub partitions: Vec<Arc<BTreeReader>>,
    pub resolver: Option<Arc<dyn PartitionResolver>>,
}

impl ForeignKeyRef {
    #[inline]
    pub fn new(name: impl Into<String>, pk: Arc<BTreeReader>) -> Self {
        ForeignKeyRef {
            name: name.into(),
            partitions: vec![pk],
            resolver: None,
        }
    }

    #[inline]
    pub fn partitioned(
        name: impl Into<String>,
        partitions: Vec<Arc<BTreeReader>>,
        resolver: Arc<dyn PartitionResolver>,
    ) -> Self {
        ForeignKeyRef {
            name: name.into(),
            partitions,
            resolver: Some(resolver),
        }
    }

    #[inline]
    fn partition_of(&self, vals: &[Val]) -> Result<usize> {
        let no = match self.resolver.as_ref() {
            Some(r) => r.resolve(vals)?,
            None => 0,
        };
        if no >= self.partitions.len() {
            return Err(Error::InvalidArgument);
        }
        Ok(no)
    }
}

struct PkCursor<'a> {
    reader: &'a BTreeReader,
    cursor: LeafCursor<'a>,
    cur: Option<LeafItem>,
    last: Vec<u8>,
}

impl<'a> PkCursor<'a> {
    #[inline]
    fn open(reader: &'a BTreeReader, target: &[u8]) -> Result<Self> {
        let mut cursor = reader.seek(target)?;
        let cur = cursor.next()?;
        Ok(PkCursor {
            reader,
            cursor,
            cur,
            last: target.to_vec(),
        })
    }

    /// Whether the target key exists with a live entry.
    fn probe(&mut self, target: &[u8]) -> Result<bool> {
        if target < self.last.as_slice() {
            self.cursor = self.reader.seek(target)?;
            self.cur = self.cursor.next()?;
        }
        self.last.clear();
        self.last.extend_from_slice(target);
        while let Some(item) = self.cur.as_ref() {
            if item.key.as_bytes() >= target {
                break;
            }
            self.cur = self.cursor.next()?;
        }
        Ok(self
            .cur
            .as_ref()
            .is_some_and(|item| item.key.as_bytes() == target && item.has_visible()))
    }
}

/// Check every live key of the foreign key index against the referenced
/// primary key. Keys with null component are not checked.
/// Returns number of keys checked.
pub fn verify_foreign_key<I>(items: I, fk_domain: &KeyDomain, fk: &ForeignKeyRef) -> Result<u64>
where
    I: IntoIterator<Item = Result<LeafItem>>,
{
    let mut cursors: HashMap<usize, PkCursor<'_>> = HashMap::new();
    let mut checked = 0u64;
    for item in items {
        let item = item?;
        if item.has_null || !item.has_visible() {
            continue;
        }
        let vals = fk_domain.decode(&item.key)?;
        let no = fk.partition_of(&vals)?;
        let reader = &*fk.partitions[no];
        let (target, _) = reader.domain().encode(&vals)?;
        let found = match cursors.get_mut(&no) {
            Some(c) => c.probe(&target)?,
            None => {
                let mut c = PkCursor::open(reader, &target)?;
                let found = c.probe(&target)?;
                cursors.insert(no, c);
                found
            }
        };
        if !found {
            return Err(Error::ForeignKeyViolation {
                name: fk.name.clone(),
                value: fk_domain.display(&item.key),
            });
        }
        checked += 1;
    }
    debug!(
        "foreign key {} verified: {} keys over {} partitions",
        fk.name,
        checked,
        cursors.len()
    );
    Ok(checked)
}
