use crate::catalog::TableID;
use std::fmt;

/// Class identifier of a physical heap. Each table in a class hierarchy
/// owns one heap, and its class id equals its table id.
pub type ClassID = TableID;
pub const INVALID_CLASS_ID: ClassID = !0;

/// Row identifier, a fixed-size triple of volume, page and slot.
///
/// Ordering follows (vol, page, slot), which is identical to the
/// ordering of its packed u64 form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowID {
    pub vol: u16,
    pub page: u32,
    pub slot: u16,
}

pub const INVALID_ROW_ID: RowID = RowID {
    vol: !0,
    page: !0,
    slot: !0,
};

impl RowID {
    #[inline]
    pub const fn new(vol: u16, page: u32, slot: u16) -> Self {
        RowID { vol, page, slot }
    }

    #[inline]
    pub const fn to_u64(self) -> u64 {
        ((self.vol as u64) << 48) | ((self.page as u64) << 16) | self.slot as u64
    }

    #[inline]
    pub const fn from_u64(v: u64) -> Self {
        RowID {
            vol: (v >> 48) as u16,
            page: (v >> 16) as u32,
            slot: v as u16,
        }
    }
}

impl fmt::Display for RowID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{}|{})", self.vol, self.page, self.slot)
    }
}
