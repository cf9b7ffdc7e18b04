//! Page layout of the loaded B+tree.
//!
//! Every page starts with a [`NodeHeader`], followed by a slot array
//! growing upward. Record data grows downward from the end of page.
//! Overflow pages have no slots, their payload follows the header
//! contiguously.
//!
//! ┌──────────────────────────┐
//! │ header(40)               │
//! ├──────────────────────────┤
//! │ slot 0 | slot 1 | ...    │
//! ├──────────────────────────┤
//! │ free space               │
//! ├──────────────────────────┤
//! │ ... | record 1 | record 0│
//! └──────────────────────────┘
//!
//! The root is always page 0. Its slot 0 holds [`RootMeta`], and data
//! records start from slot 1. Every leaf and non-leaf page keeps
//! [`ROOT_META_RESERVE`] bytes unused, so the top page of any level can
//! be copied into page 0 together with the metadata.
use crate::catalog::TableID;
use crate::error::{Error, Result};
use crate::file::{PageID, INVALID_PAGE_ID};
use crate::index::key::{KeyDomain, MAX_KEY_COLUMNS};
use crate::serde::{Deser, Ser, Serde};
use bitflags::bitflags;
use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};
use std::mem;

pub const NODE_HEADER_LEN: usize = mem::size_of::<NodeHeader>();
pub const SLOT_LEN: usize = mem::size_of::<u32>() * 2;
const CHECKSUM_OFFSET: usize = mem::offset_of!(NodeHeader, checksum);

/// Bytes kept free on every page for root metadata and its slot.
pub const ROOT_META_RESERVE: usize = 320;

const _: () = assert!(NODE_HEADER_LEN == 40);
const _: () =
    assert!(ROOT_META_RESERVE >= SLOT_LEN + ROOT_META_FIXED_LEN + 2 + 4 * MAX_KEY_COLUMNS);

/// Leaf level is 1, non-leaf levels count upward.
pub const LEAF_LEVEL: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Leaf = 1,
    NonLeaf = 2,
    /// Continuation of the entry list of one leaf record.
    OverflowEntries = 3,
    /// Chunk of a key too long to be stored in page.
    OverflowKey = 4,
}

impl TryFrom<u8> for NodeType {
    type Error = Error;
    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(NodeType::Leaf),
            2 => Ok(NodeType::NonLeaf),
            3 => Ok(NodeType::OverflowEntries),
            4 => Ok(NodeType::OverflowKey),
            _ => Err(Error::InvalidFormat),
        }
    }
}

bitflags! {
    pub struct NodeFlags: u8 {
        const ROOT = 0x01;
    }
}

/// Node header, in total 40 bytes.
///
/// ┌──────────────────┐
/// │ node_type(1)     │
/// ├──────────────────┤
/// │ flags(1)         │
/// ├──────────────────┤
/// │ level(2)         │
/// ├──────────────────┤
/// │ count(2)         │
/// ├──────────────────┤
/// │ reserved(2)      │
/// ├──────────────────┤
/// │ max_key_len(4)   │
/// ├──────────────────┤
/// │ free_start(4)    │
/// ├──────────────────┤
/// │ free_end(4)      │
/// ├──────────────────┤
/// │ checksum(4)      │
/// ├──────────────────┤
/// │ prev(8)          │
/// ├──────────────────┤
/// │ next(8)          │
/// └──────────────────┘
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeHeader {
    pub node_type: u8,
    pub flags: u8,
    pub level: u16,
    /// Number of slots, or number of payload units of overflow page.
    pub count: u16,
    reserved: u16,
    /// Maximum key length of records in this page.
    pub max_key_len: u32,
    pub free_start: u32,
    pub free_end: u32,
    /// crc32 of the page with this field zeroed.
    pub checksum: u32,
    pub prev: PageID,
    pub next: PageID,
}

impl NodeHeader {
    #[inline]
    pub fn node_type(&self) -> Result<NodeType> {
        NodeType::try_from(self.node_type)
    }

    #[inline]
    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags)
    }
}

/// Checksum of page content, excluding the checksum field itself.
#[inline]
pub fn page_checksum(page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&page[CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

/// Owned page image under construction.
pub struct NodeBuf {
    page_id: PageID,
    data: Box<[u8]>,
}

impl NodeBuf {
    #[inline]
    pub fn new(page_id: PageID, page_size: usize, node_type: NodeType, level: u16) -> Self {
        let mut node = NodeBuf {
            page_id,
            data: vec![0u8; page_size].into_boxed_slice(),
        };
        node.reset(node_type, level);
        node
    }

    /// Wrap an existing page image.
    #[inline]
    pub fn from_bytes(page_id: PageID, data: Box<[u8]>) -> Result<Self> {
        NodeView::new(&data)?;
        Ok(NodeBuf { page_id, data })
    }

    /// Clear content and reinitialize header.
    #[inline]
    pub fn reset(&mut self, node_type: NodeType, level: u16) {
        self.data.fill(0);
        let header = NodeHeader {
            node_type: node_type as u8,
            flags: 0,
            level,
            count: 0,
            reserved: 0,
            max_key_len: 0,
            free_start: NODE_HEADER_LEN as u32,
            free_end: self.data.len() as u32,
            checksum: 0,
            prev: INVALID_PAGE_ID,
            next: INVALID_PAGE_ID,
        };
        self.set_header(&header);
    }

    #[inline]
    pub fn page_id(&self) -> PageID {
        self.page_id
    }

    #[inline]
    pub fn header(&self) -> NodeHeader {
        pod_read_unaligned(&self.data[..NODE_HEADER_LEN])
    }

    #[inline]
    pub fn set_header(&mut self, header: &NodeHeader) {
        self.data[..NODE_HEADER_LEN].copy_from_slice(bytes_of(header));
    }

    #[inline]
    fn update_header<F: FnOnce(&mut NodeHeader)>(&mut self, f: F) {
        let mut header = self.header();
        f(&mut header);
        self.set_header(&header);
    }

    #[inline]
    pub fn set_prev(&mut self, prev: PageID) {
        self.update_header(|h| h.prev = prev);
    }

    #[inline]
    pub fn set_next(&mut self, next: PageID) {
        self.update_header(|h| h.next = next);
    }

    #[inline]
    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.update_header(|h| h.flags = flags.bits());
    }

    #[inline]
    pub fn update_max_key_len(&mut self, key_len: usize) {
        self.update_header(|h| h.max_key_len = h.max_key_len.max(key_len as u32));
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.header().count as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        let h = self.header();
        (h.free_end - h.free_start) as usize
    }

    /// Free space usable by data records, excluding the root reserve.
    #[inline]
    pub fn record_space(&self) -> usize {
        self.free_space().saturating_sub(ROOT_META_RESERVE)
    }

    /// Append a record with a new slot. Record must fit into free space.
    #[inline]
    pub fn insert_record(&mut self, rec: &[u8]) -> Result<usize> {
        if self.free_space() < rec.len() + SLOT_LEN {
            return Err(Error::RecordTooLarge);
        }
        let mut h = self.header();
        let offset = h.free_end as usize - rec.len();
        self.data[offset..offset + rec.len()].copy_from_slice(rec);
        let slot_idx = h.free_start as usize;
        let idx = self.data[..].ser_u32(slot_idx, offset as u32);
        self.data[..].ser_u32(idx, rec.len() as u32);
        let slot_no = h.count as usize;
        h.count += 1;
        h.free_start += SLOT_LEN as u32;
        h.free_end = offset as u32;
        self.set_header(&h);
        Ok(slot_no)
    }

    /// Append raw payload right after previous payload, without slot.
    /// Used by overflow pages.
    #[inline]
    pub fn append_payload(&mut self, payload: &[u8], units: u16) -> Result<()> {
        if self.free_space() < payload.len() {
            return Err(Error::RecordTooLarge);
        }
        let mut h = self.header();
        let start = h.free_start as usize;
        self.data[start..start + payload.len()].copy_from_slice(payload);
        h.free_start += payload.len() as u32;
        h.count += units;
        self.set_header(&h);
        Ok(())
    }

    #[inline]
    pub fn view(&self) -> NodeView<'_> {
        NodeView { data: &self.data }
    }

    /// Seal the page and return its bytes and checksum.
    #[inline]
    pub fn seal(&mut self) -> (&[u8], u32) {
        let checksum = page_checksum(&self.data);
        self.update_header(|h| h.checksum = checksum);
        (&self.data, checksum)
    }
}

/// Read-only view of a page.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    data: &'a [u8],
}

impl<'a> NodeView<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < NODE_HEADER_LEN {
            return Err(Error::InvalidFormat);
        }
        let view = NodeView { data };
        let h = view.header();
        h.node_type()?;
        if (h.free_start as usize) < NODE_HEADER_LEN
            || h.free_start > h.free_end
            || h.free_end as usize > data.len()
        {
            return Err(Error::InvalidFormat);
        }
        Ok(view)
    }

    /// Create view and validate checksum.
    #[inline]
    pub fn checked(data: &'a [u8]) -> Result<Self> {
        let view = Self::new(data)?;
        if page_checksum(data) != view.header().checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(view)
    }

    #[inline]
    pub fn header(&self) -> NodeHeader {
        pod_read_unaligned(&self.data[..NODE_HEADER_LEN])
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.header().flags().contains(NodeFlags::ROOT)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.header().count as usize
    }

    /// Slot number of the first data record.
    #[inline]
    pub fn first_data_slot(&self) -> usize {
        if self.is_root() {
            1
        } else {
            0
        }
    }

    /// Number of data records, root metadata excluded.
    #[inline]
    pub fn data_count(&self) -> usize {
        self.count().saturating_sub(self.first_data_slot())
    }

    #[inline]
    pub fn record(&self, slot_no: usize) -> Result<&'a [u8]> {
        if slot_no >= self.count() {
            return Err(Error::InvalidArgument);
        }
        let slot_idx = NODE_HEADER_LEN + slot_no * SLOT_LEN;
        let (idx, offset) = self.data.deser_u32(slot_idx)?;
        let (_, len) = self.data.deser_u32(idx)?;
        let (offset, len) = (offset as usize, len as usize);
        self.data
            .get(offset..offset + len)
            .ok_or(Error::InvalidFormat)
    }

    /// i-th data record, skipping root metadata.
    #[inline]
    pub fn data_record(&self, i: usize) -> Result<&'a [u8]> {
        self.record(self.first_data_slot() + i)
    }

    /// Payload of overflow page.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.data[NODE_HEADER_LEN..self.header().free_start as usize]
    }
}

bitflags! {
    pub struct RecordFlags: u8 {
        /// Key contains at least one null component.
        const HAS_NULL = 0x01;
        /// Key is stored in overflow key pages.
        const KEY_OVERFLOW = 0x02;
        /// Entry list continues in overflow pages.
        const ENTRY_OVERFLOW = 0x04;
    }
}

/// Key stored in a record, either inline or by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyData<'a> {
    Inline(&'a [u8]),
    Overflow { page_id: PageID, len: u32 },
}

impl KeyData<'_> {
    #[inline]
    pub fn key_len(&self) -> usize {
        match self {
            KeyData::Inline(k) => k.len(),
            KeyData::Overflow { len, .. } => *len as usize,
        }
    }

    #[inline]
    fn stored_len(&self) -> usize {
        match self {
            KeyData::Inline(k) => k.len(),
            KeyData::Overflow { .. } => mem::size_of::<PageID>(),
        }
    }

    #[inline]
    fn flags(&self) -> RecordFlags {
        match self {
            KeyData::Inline(_) => RecordFlags::empty(),
            KeyData::Overflow { .. } => RecordFlags::KEY_OVERFLOW,
        }
    }

    #[inline]
    fn ser_body(&self, out: &mut [u8], idx: usize) -> usize {
        match self {
            KeyData::Inline(k) => out.ser_byte_slice(idx, k),
            KeyData::Overflow { page_id, .. } => out.ser_u64(idx, *page_id),
        }
    }

    #[inline]
    fn deser_body<'a>(
        input: &'a [u8],
        idx: usize,
        flags: RecordFlags,
        len: u32,
    ) -> Result<(usize, KeyData<'a>)> {
        if flags.contains(RecordFlags::KEY_OVERFLOW) {
            let (idx, page_id) = input.deser_u64(idx)?;
            Ok((idx, KeyData::Overflow { page_id, len }))
        } else {
            let (idx, k) = input.deser_byte_slice(idx, len as usize)?;
            Ok((idx, KeyData::Inline(k)))
        }
    }
}

const LEAF_RECORD_FIXED_LEN: usize = 1 + 4 + 4;
const NONLEAF_RECORD_FIXED_LEN: usize = 1 + 4 + 8;

/// Leaf record.
///
/// ┌──────────────────────────┐
/// │ flags(1)                 │
/// ├──────────────────────────┤
/// │ key_len(4)               │
/// ├──────────────────────────┤
/// │ entry_count(4)           │
/// ├──────────────────────────┤
/// │ overflow page(8)?        │
/// ├──────────────────────────┤
/// │ key bytes or key page(8) │
/// ├──────────────────────────┤
/// │ entries                  │
/// └──────────────────────────┘
///
/// `entry_count` is number of entries stored in the record itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRecord<'a> {
    pub has_null: bool,
    pub key: KeyData<'a>,
    pub entry_count: u32,
    pub overflow: Option<PageID>,
    pub entries: &'a [u8],
}

impl<'a> LeafRecord<'a> {
    #[inline]
    pub fn flags(&self) -> RecordFlags {
        let mut flags = self.key.flags();
        if self.has_null {
            flags |= RecordFlags::HAS_NULL;
        }
        if self.overflow.is_some() {
            flags |= RecordFlags::ENTRY_OVERFLOW;
        }
        flags
    }

    /// Encoded length of record with given key and entry bytes.
    #[inline]
    pub fn encoded_len(key: &KeyData<'_>, overflow: bool, entry_bytes: usize) -> usize {
        LEAF_RECORD_FIXED_LEN
            + if overflow { mem::size_of::<PageID>() } else { 0 }
            + key.stored_len()
            + entry_bytes
    }

    #[inline]
    pub fn encode(&self, out: &mut Vec<u8>) {
        let len = Self::encoded_len(&self.key, self.overflow.is_some(), self.entries.len());
        out.clear();
        out.resize(len, 0);
        let buf = &mut out[..];
        let mut idx = buf.ser_u8(0, self.flags().bits());
        idx = buf.ser_u32(idx, self.key.key_len() as u32);
        idx = buf.ser_u32(idx, self.entry_count);
        if let Some(page_id) = self.overflow {
            idx = buf.ser_u64(idx, page_id);
        }
        idx = self.key.ser_body(buf, idx);
        idx = buf.ser_byte_slice(idx, self.entries);
        debug_assert_eq!(idx, len);
    }

    #[inline]
    pub fn decode(input: &'a [u8], entry_size: usize) -> Result<Self> {
        let (idx, flags) = input.deser_u8(0)?;
        let flags = RecordFlags::from_bits(flags).ok_or(Error::InvalidFormat)?;
        let (idx, key_len) = input.deser_u32(idx)?;
        let (idx, entry_count) = input.deser_u32(idx)?;
        let (idx, overflow) = if flags.contains(RecordFlags::ENTRY_OVERFLOW) {
            let (idx, page_id) = input.deser_u64(idx)?;
            (idx, Some(page_id))
        } else {
            (idx, None)
        };
        let (idx, key) = KeyData::deser_body(input, idx, flags, key_len)?;
        let (idx, entries) = input.deser_byte_slice(idx, entry_count as usize * entry_size)?;
        if idx != input.len() {
            return Err(Error::InvalidFormat);
        }
        Ok(LeafRecord {
            has_null: flags.contains(RecordFlags::HAS_NULL),
            key,
            entry_count,
            overflow,
            entries,
        })
    }
}

/// Non-leaf record.
///
/// ┌──────────────────────────┐
/// │ flags(1)                 │
/// ├──────────────────────────┤
/// │ key_len(4)               │
/// ├──────────────────────────┤
/// │ child(8)                 │
/// ├──────────────────────────┤
/// │ key bytes or key page(8) │
/// └──────────────────────────┘
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonLeafRecord<'a> {
    pub key: KeyData<'a>,
    pub child: PageID,
}

impl<'a> NonLeafRecord<'a> {
    #[inline]
    pub fn encoded_len(key: &KeyData<'_>) -> usize {
        NONLEAF_RECORD_FIXED_LEN + key.stored_len()
    }

    #[inline]
    pub fn encode(&self, out: &mut Vec<u8>) {
        let len = Self::encoded_len(&self.key);
        out.clear();
        out.resize(len, 0);
        let buf = &mut out[..];
        let mut idx = buf.ser_u8(0, self.key.flags().bits());
        idx = buf.ser_u32(idx, self.key.key_len() as u32);
        idx = buf.ser_u64(idx, self.child);
        idx = self.key.ser_body(buf, idx);
        debug_assert_eq!(idx, len);
    }

    #[inline]
    pub fn decode(input: &'a [u8]) -> Result<Self> {
        let (idx, flags) = input.deser_u8(0)?;
        let flags = RecordFlags::from_bits(flags).ok_or(Error::InvalidFormat)?;
        let (idx, key_len) = input.deser_u32(idx)?;
        let (idx, child) = input.deser_u64(idx)?;
        let (idx, key) = KeyData::deser_body(input, idx, flags, key_len)?;
        if idx != input.len() {
            return Err(Error::InvalidFormat);
        }
        Ok(NonLeafRecord { key, child })
    }
}

const ROOT_META_FIXED_LEN: usize = 8 * 4 + 1 + 1;

/// Statistics and key descriptor kept in root page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMeta {
    pub distinct: u64,
    pub entries: u64,
    pub nulls: u64,
    pub table_id: TableID,
    pub unique: bool,
    pub has_class: bool,
    pub domain: KeyDomain,
}

impl Ser<'_> for RootMeta {
    #[inline]
    fn ser_len(&self) -> usize {
        ROOT_META_FIXED_LEN + self.domain.ser_len()
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u64(start_idx, self.distinct);
        let idx = out.ser_u64(idx, self.entries);
        let idx = out.ser_u64(idx, self.nulls);
        let idx = out.ser_u64(idx, self.table_id);
        let idx = out.ser_bool(idx, self.unique);
        let idx = out.ser_bool(idx, self.has_class);
        self.domain.ser(out, idx)
    }
}

impl Deser for RootMeta {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, distinct) = input.deser_u64(start_idx)?;
        let (idx, entries) = input.deser_u64(idx)?;
        let (idx, nulls) = input.deser_u64(idx)?;
        let (idx, table_id) = input.deser_u64(idx)?;
        let (idx, unique) = input.deser_bool(idx)?;
        let (idx, has_class) = input.deser_bool(idx)?;
        let (idx, domain) = KeyDomain::deser(input, idx)?;
        Ok((
            idx,
            RootMeta {
                distinct,
                entries,
                nulls,
                table_id,
                unique,
                has_class,
                domain,
            },
        ))
    }
}

/// Build root page image: metadata in slot 0, then all records of the
/// top page in order.
pub fn build_root(top: NodeView<'_>, root_page_id: PageID, meta: &RootMeta) -> Result<NodeBuf> {
    let th = top.header();
    let mut root = NodeBuf::new(root_page_id, top.data.len(), th.node_type()?, th.level);
    root.set_flags(NodeFlags::ROOT);
    root.update_max_key_len(th.max_key_len as usize);
    root.insert_record(&meta.ser_to_vec())?;
    for i in 0..top.data_count() {
        root.insert_record(top.data_record(i)?)?;
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::KeyColumn;
    use crate::value::ValKind;

    #[test]
    fn test_node_buf_records() {
        let mut node = NodeBuf::new(3, 1024, NodeType::Leaf, LEAF_LEVEL);
        assert!(node.is_empty());
        assert_eq!(node.free_space(), 1024 - NODE_HEADER_LEN);
        node.insert_record(b"hello").unwrap();
        node.insert_record(b"world!").unwrap();
        node.set_next(7);
        node.update_max_key_len(6);
        let (bytes, checksum) = node.seal();
        let bytes = bytes.to_vec();
        let view = NodeView::checked(&bytes).unwrap();
        assert_eq!(view.header().checksum, checksum);
        assert_eq!(view.count(), 2);
        assert_eq!(view.record(0).unwrap(), b"hello");
        assert_eq!(view.record(1).unwrap(), b"world!");
        assert!(view.record(2).is_err());
        assert_eq!(view.header().next, 7);
        assert_eq!(view.header().prev, INVALID_PAGE_ID);
        assert_eq!(view.header().max_key_len, 6);

        let mut corrupted = bytes.clone();
        corrupted[1000] ^= 0x1;
        assert!(matches!(
            NodeView::checked(&corrupted),
            Err(Error::ChecksumMismatch)
        ));
        let big = vec![0u8; 1024];
        assert!(matches!(
            node.insert_record(&big),
            Err(Error::RecordTooLarge)
        ));
    }

    #[test]
    fn test_leaf_record_codec() {
        let entries = [1u8; 48];
        let rec = LeafRecord {
            has_null: true,
            key: KeyData::Inline(b"apple"),
            entry_count: 2,
            overflow: Some(9),
            entries: &entries,
        };
        let mut buf = vec![];
        rec.encode(&mut buf);
        assert_eq!(buf.len(), LeafRecord::encoded_len(&rec.key, true, 48));
        let decoded = LeafRecord::decode(&buf, 24).unwrap();
        assert_eq!(decoded, rec);
        assert!(decoded.flags().contains(RecordFlags::ENTRY_OVERFLOW));

        let rec = LeafRecord {
            has_null: false,
            key: KeyData::Overflow {
                page_id: 12,
                len: 5000,
            },
            entry_count: 1,
            overflow: None,
            entries: &entries[..24],
        };
        rec.encode(&mut buf);
        assert_eq!(LeafRecord::decode(&buf, 24).unwrap(), rec);
        assert!(LeafRecord::decode(&buf[..buf.len() - 1], 24).is_err());
    }

    #[test]
    fn test_nonleaf_record_codec() {
        let rec = NonLeafRecord {
            key: KeyData::Inline(b"ban"),
            child: 42,
        };
        let mut buf = vec![];
        rec.encode(&mut buf);
        assert_eq!(NonLeafRecord::decode(&buf).unwrap(), rec);
    }

    #[test]
    fn test_build_root() {
        let mut top = NodeBuf::new(5, 1024, NodeType::NonLeaf, 2);
        top.insert_record(b"a").unwrap();
        top.insert_record(b"b").unwrap();
        top.set_prev(4);
        let meta = RootMeta {
            distinct: 10,
            entries: 12,
            nulls: 1,
            table_id: 100,
            unique: true,
            has_class: true,
            domain: KeyDomain::new(vec![KeyColumn::new(ValKind::I32); MAX_KEY_COLUMNS]).unwrap(),
        };
        let mut root = build_root(top.view(), 0, &meta).unwrap();
        let (bytes, _) = root.seal();
        let view = NodeView::checked(bytes).unwrap();
        assert!(view.is_root());
        assert_eq!(view.header().level, 2);
        assert_eq!(view.header().prev, INVALID_PAGE_ID);
        assert_eq!(view.data_count(), 2);
        assert_eq!(view.data_record(1).unwrap(), b"b");
        let (_, decoded) = RootMeta::deser(view.record(0).unwrap(), 0).unwrap();
        assert_eq!(decoded, meta);
    }
}
