//! Transaction markers used by index loading.
//!
//! Every row version carries an insert marker and a delete marker.
//! A marker is either a commit timestamp (CTS) of a committed transaction,
//! or an active transaction id, which always has the highest bit set.
//! Therefore "committed before X" can be checked as a plain comparison.
//!
//! The loader classifies each version against a [`Watermark`]:
//! 1. `oldest_active` is the smallest snapshot timestamp of all active
//!    transactions. A delete committed before it is invisible to every
//!    present and future transaction.
//! 2. `vacuum_horizon` is the position of the garbage vacuum. Deletes
//!    committed before it are already purged from every other structure,
//!    so the index can drop them without telling anyone.
pub mod lock;

use crate::error::Result;
use crate::serde::{Deser, Ser, Serde};
use std::mem;

pub type TrxID = u64;
pub const INVALID_TRX_ID: TrxID = !0;
pub const MIN_SNAPSHOT_TS: TrxID = 1;
pub const MAX_SNAPSHOT_TS: TrxID = 1 << 63;
pub const MAX_COMMIT_TS: TrxID = 1 << 63;
// data without version chain will treated as its commit timestamp equals to 0
pub const GLOBAL_VISIBLE_COMMIT_TS: TrxID = 0;
// As active transaction id is always greater than STS, that means
// visibility check can be simplified to "STS is larger".
pub const MIN_ACTIVE_TRX_ID: TrxID = (1 << 63) + 1;

/// Returns whether the marker is a commit timestamp.
#[inline]
pub fn trx_is_committed(ts: TrxID) -> bool {
    ts < MAX_COMMIT_TS
}

/// MVCC header of a row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MvccHeader {
    pub ins: TrxID,
    /// INVALID_TRX_ID if the row is not deleted.
    pub del: TrxID,
}

impl MvccHeader {
    #[inline]
    pub const fn inserted(ins: TrxID) -> Self {
        MvccHeader {
            ins,
            del: INVALID_TRX_ID,
        }
    }

    #[inline]
    pub const fn deleted(ins: TrxID, del: TrxID) -> Self {
        MvccHeader { ins, del }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.del != INVALID_TRX_ID
    }

    /// Whether the latest state of the row is live: no delete,
    /// or a delete that has not committed yet.
    #[inline]
    pub fn is_currently_visible(&self) -> bool {
        !self.is_deleted() || !trx_is_committed(self.del)
    }

    /// Whether a reader with given snapshot timestamp sees this version.
    #[inline]
    pub fn visible_to(&self, sts: TrxID) -> bool {
        let ins_visible = trx_is_committed(self.ins) && self.ins < sts;
        let del_visible = self.is_deleted() && trx_is_committed(self.del) && self.del < sts;
        ins_visible && !del_visible
    }
}

impl Ser<'_> for MvccHeader {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<TrxID>() * 2
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u64(start_idx, self.ins);
        out.ser_u64(idx, self.del)
    }
}

impl Deser for MvccHeader {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, ins) = input.deser_u64(start_idx)?;
        let (idx, del) = input.deser_u64(idx)?;
        Ok((idx, MvccHeader { ins, del }))
    }
}

/// Classification of a row version against the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Row is live, or its delete is not committed.
    Visible,
    /// Delete committed but some active snapshot may still read the row.
    Invisible,
    /// Delete is permanently invisible but vacuum has not passed it yet.
    /// Entry must be kept and vacuum notified.
    VacuumPending,
    /// Delete is permanently invisible and already vacuumed.
    Dead,
}

impl Visibility {
    #[inline]
    pub fn is_visible(self) -> bool {
        self == Visibility::Visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub oldest_active: TrxID,
    pub vacuum_horizon: TrxID,
}

impl Watermark {
    /// Create a watermark. Vacuum never runs ahead of the oldest active snapshot.
    #[inline]
    pub fn new(oldest_active: TrxID, vacuum_horizon: TrxID) -> Self {
        Watermark {
            oldest_active,
            vacuum_horizon: vacuum_horizon.min(oldest_active),
        }
    }

    /// Watermark whose vacuum has caught up with the oldest active snapshot.
    #[inline]
    pub fn caught_up(oldest_active: TrxID) -> Self {
        Self::new(oldest_active, oldest_active)
    }

    #[inline]
    pub fn classify(&self, mvcc: &MvccHeader) -> Visibility {
        if mvcc.is_currently_visible() {
            return Visibility::Visible;
        }
        if mvcc.del >= self.oldest_active {
            Visibility::Invisible
        } else if mvcc.del >= self.vacuum_horizon {
            Visibility::VacuumPending
        } else {
            Visibility::Dead
        }
    }

    /// Drop insert marker that every transaction already sees.
    #[inline]
    pub fn compact(&self, mut mvcc: MvccHeader) -> MvccHeader {
        if trx_is_committed(mvcc.ins) && mvcc.ins < self.oldest_active {
            mvcc.ins = GLOBAL_VISIBLE_COMMIT_TS;
        }
        mvcc
    }
}
