use crate::error::{Error, Result};
use crate::value::ValKind;
use bitflags::bitflags;
use semistr::SemiStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub column_name: SemiStr,
    pub column_type: ValKind,
    pub column_attributes: ColumnAttributes,
}

impl ColumnSpec {
    #[inline]
    pub fn new(
        column_name: &str,
        column_type: ValKind,
        column_attributes: ColumnAttributes,
    ) -> Self {
        Self {
            column_name: SemiStr::new(column_name),
            column_type,
            column_attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub index_name: SemiStr,
    pub index_cols: Vec<IndexKey>,
    pub index_attributes: IndexAttributes,
}

impl IndexSpec {
    #[inline]
    pub fn new(name: &str, index_cols: Vec<IndexKey>, index_attributes: IndexAttributes) -> Self {
        let index_name = SemiStr::new(name);
        Self {
            index_name,
            index_cols,
            index_attributes,
        }
    }

    #[inline]
    pub fn unique(&self) -> bool {
        self.index_attributes.contains(IndexAttributes::PK)
            || self.index_attributes.contains(IndexAttributes::UK)
    }

    /// Primary key implies all key columns are not null.
    #[inline]
    pub fn not_null(&self) -> bool {
        self.index_attributes.contains(IndexAttributes::PK)
            || self.index_attributes.contains(IndexAttributes::NOT_NULL)
    }
}

bitflags! {
    pub struct ColumnAttributes: u32 {
        // whether value can be null.
        const NULLABLE = 0x01;
    }
}

bitflags! {
    pub struct IndexAttributes: u32 {
        const PK = 0x01;
        const UK = 0x02;
        // reject rows with null in any key column.
        const NOT_NULL = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey {
    pub col_no: u16,
    pub order: IndexOrder,
    /// Prefix length of variable-length column, 0 means full value.
    pub prefix_len: u16,
}

impl IndexKey {
    #[inline]
    pub fn new(col_no: u16) -> Self {
        IndexKey {
            col_no,
            order: IndexOrder::Asc,
            prefix_len: 0,
        }
    }

    #[inline]
    pub fn desc(mut self) -> Self {
        self.order = IndexOrder::Desc;
        self
    }

    #[inline]
    pub fn prefix(mut self, prefix_len: u16) -> Self {
        self.prefix_len = prefix_len;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexOrder {
    Asc = 0,
    Desc = 1,
}

impl TryFrom<u8> for IndexOrder {
    type Error = Error;
    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IndexOrder::Asc),
            1 => Ok(IndexOrder::Desc),
            _ => Err(Error::InvalidFormat),
        }
    }
}
