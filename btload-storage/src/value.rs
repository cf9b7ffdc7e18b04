use crate::error::{Error, Result};
use crate::serde::{Deser, Ser, Serde};
use btload_datatype::memcmp::{
    BytesExtendable, MemCmpDecode, MemCmpFormat, Null, NullableMemCmpFormat, SegmentedBytes,
    NON_NULL_FLAG, NULL_FLAG,
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::mem;

pub const VAR_LEN_INLINE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValKind {
    I8 = 1,
    U8 = 2,
    I16 = 3,
    U16 = 4,
    I32 = 5,
    U32 = 6,
    I64 = 7,
    U64 = 8,
    F32 = 9,
    F64 = 10,
    VarByte = 11,
}

impl ValKind {
    /// Returns length of fixed-size value, None for variable-length kind.
    #[inline]
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ValKind::I8 | ValKind::U8 => Some(1),
            ValKind::I16 | ValKind::U16 => Some(2),
            ValKind::I32 | ValKind::U32 | ValKind::F32 => Some(4),
            ValKind::I64 | ValKind::U64 | ValKind::F64 => Some(8),
            ValKind::VarByte => None,
        }
    }

    #[inline]
    pub fn is_fixed(self) -> bool {
        self.fixed_len().is_some()
    }
}

impl TryFrom<u8> for ValKind {
    type Error = Error;
    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        let kind = match value {
            1 => ValKind::I8,
            2 => ValKind::U8,
            3 => ValKind::I16,
            4 => ValKind::U16,
            5 => ValKind::I32,
            6 => ValKind::U32,
            7 => ValKind::I64,
            8 => ValKind::U64,
            9 => ValKind::F32,
            10 => ValKind::F64,
            11 => ValKind::VarByte,
            _ => return Err(Error::InvalidDatatype),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValCode {
    Null = 0,
    Byte1 = 1,
    Byte2 = 2,
    Byte4 = 3,
    Byte8 = 4,
    VarByte = 5,
}

impl TryFrom<u8> for ValCode {
    type Error = Error;
    #[inline]
    fn try_from(value: u8) -> Result<Self> {
        let code = match value {
            0 => ValCode::Null,
            1 => ValCode::Byte1,
            2 => ValCode::Byte2,
            3 => ValCode::Byte4,
            4 => ValCode::Byte8,
            5 => ValCode::VarByte,
            _ => return Err(Error::InvalidFormat),
        };
        Ok(code)
    }
}

/// Val is value representation of a row column.
/// Interpretation of fixed-size bytes depends on the column's kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Val {
    #[default]
    Null,
    Byte1(u8),
    Byte2(u16),
    Byte4(u32),
    Byte8(u64),
    VarByte(SmallVec<[u8; VAR_LEN_INLINE]>),
}

impl Val {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Val::Null)
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Val::VarByte(v) => Some(v),
            _ => None,
        }
    }

    /// Truncate variable-length value to given prefix length.
    #[inline]
    pub fn truncate_prefix(&mut self, len: usize) {
        if let Val::VarByte(v) = self {
            v.truncate(len);
        }
    }

    /// Append nullable memory comparable format of this value.
    #[inline]
    pub fn encode_memcmp<T: BytesExtendable>(&self, kind: ValKind, buf: &mut T) -> Result<()> {
        match (kind, self) {
            (_, Val::Null) => Null.extend_nmcf_to(buf),
            (ValKind::I8, Val::Byte1(v)) => (*v as i8).extend_nmcf_to(buf),
            (ValKind::U8, Val::Byte1(v)) => v.extend_nmcf_to(buf),
            (ValKind::I16, Val::Byte2(v)) => (*v as i16).extend_nmcf_to(buf),
            (ValKind::U16, Val::Byte2(v)) => v.extend_nmcf_to(buf),
            (ValKind::I32, Val::Byte4(v)) => (*v as i32).extend_nmcf_to(buf),
            (ValKind::U32, Val::Byte4(v)) => v.extend_nmcf_to(buf),
            (ValKind::F32, Val::Byte4(v)) => f32::from_bits(*v).extend_nmcf_to(buf),
            (ValKind::I64, Val::Byte8(v)) => (*v as i64).extend_nmcf_to(buf),
            (ValKind::U64, Val::Byte8(v)) => v.extend_nmcf_to(buf),
            (ValKind::F64, Val::Byte8(v)) => f64::from_bits(*v).extend_nmcf_to(buf),
            (ValKind::VarByte, Val::VarByte(v)) => SegmentedBytes(v).extend_nmcf_to(buf),
            _ => return Err(Error::InvalidDatatype),
        }
        Ok(())
    }

    /// Returns encoded length of the nullable memory comparable value at head of input.
    #[inline]
    pub fn memcmp_len(kind: ValKind, input: &[u8], inverted: bool) -> Result<usize> {
        let flag = match input.first() {
            Some(f) if inverted => !*f,
            Some(f) => *f,
            None => return Err(Error::InvalidFormat),
        };
        match flag {
            NULL_FLAG => Ok(1),
            NON_NULL_FLAG => match kind.fixed_len() {
                Some(n) => Ok(1 + n),
                None => Ok(1 + btload_datatype::memcmp::segmented_len(&input[1..], inverted)?),
            },
            _ => Err(Error::InvalidFormat),
        }
    }

    /// Decode one value in nullable memory comparable format.
    #[inline]
    pub fn decode_memcmp(kind: ValKind, input: &[u8]) -> Result<(usize, Val)> {
        let (flag, body) = input.split_first().ok_or(Error::InvalidFormat)?;
        match *flag {
            NULL_FLAG => return Ok((1, Val::Null)),
            NON_NULL_FLAG => (),
            _ => return Err(Error::InvalidFormat),
        }
        let (n, val) = match kind {
            ValKind::I8 => i8::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::U8 => u8::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::I16 => i16::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::U16 => u16::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::I32 => i32::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::U32 => u32::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::F32 => f32::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::I64 => i64::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::U64 => u64::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::F64 => f64::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
            ValKind::VarByte => Vec::<u8>::decode_mcf(body).map(|(n, v)| (n, Val::from(v)))?,
        };
        Ok((1 + n, val))
    }

    /// Returns a displayable view interpreting the value with given kind.
    #[inline]
    pub fn display(&self, kind: ValKind) -> ValDisplay<'_> {
        ValDisplay { val: self, kind }
    }
}

pub struct ValDisplay<'a> {
    val: &'a Val,
    kind: ValKind,
}

impl fmt::Display for ValDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.val) {
            (_, Val::Null) => write!(f, "NULL"),
            (ValKind::I8, Val::Byte1(v)) => write!(f, "{}", *v as i8),
            (ValKind::I16, Val::Byte2(v)) => write!(f, "{}", *v as i16),
            (ValKind::I32, Val::Byte4(v)) => write!(f, "{}", *v as i32),
            (ValKind::F32, Val::Byte4(v)) => write!(f, "{}", f32::from_bits(*v)),
            (ValKind::I64, Val::Byte8(v)) => write!(f, "{}", *v as i64),
            (ValKind::F64, Val::Byte8(v)) => write!(f, "{}", f64::from_bits(*v)),
            (_, Val::Byte1(v)) => write!(f, "{}", v),
            (_, Val::Byte2(v)) => write!(f, "{}", v),
            (_, Val::Byte4(v)) => write!(f, "{}", v),
            (_, Val::Byte8(v)) => write!(f, "{}", v),
            (_, Val::VarByte(v)) => match std::str::from_utf8(v) {
                Ok(s) => write!(f, "'{}'", s),
                Err(_) => write!(f, "{:?}", v.as_slice()),
            },
        }
    }
}

impl From<u8> for Val {
    #[inline]
    fn from(value: u8) -> Self {
        Val::Byte1(value)
    }
}

impl From<i8> for Val {
    #[inline]
    fn from(value: i8) -> Self {
        Val::Byte1(value as u8)
    }
}

impl From<u16> for Val {
    #[inline]
    fn from(value: u16) -> Self {
        Val::Byte2(value)
    }
}

impl From<i16> for Val {
    #[inline]
    fn from(value: i16) -> Self {
        Val::Byte2(value as u16)
    }
}

impl From<u32> for Val {
    #[inline]
    fn from(value: u32) -> Self {
        Val::Byte4(value)
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(value: i32) -> Self {
        Val::Byte4(value as u32)
    }
}

impl From<u64> for Val {
    #[inline]
    fn from(value: u64) -> Self {
        Val::Byte8(value)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(value: i64) -> Self {
        Val::Byte8(value as u64)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(value: f32) -> Self {
        Val::Byte4(value.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(value: f64) -> Self {
        Val::Byte8(value.to_bits())
    }
}

impl From<&[u8]> for Val {
    #[inline]
    fn from(value: &[u8]) -> Self {
        Val::VarByte(SmallVec::from_slice(value))
    }
}

impl From<&str> for Val {
    #[inline]
    fn from(value: &str) -> Self {
        Val::from(value.as_bytes())
    }
}

impl From<Vec<u8>> for Val {
    #[inline]
    fn from(value: Vec<u8>) -> Self {
        Val::VarByte(SmallVec::from_vec(value))
    }
}

impl Ser<'_> for Val {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<ValCode>()
            + match self {
                Val::Null => 0, // null is encoded with code only.
                Val::Byte1(_) => 1,
                Val::Byte2(_) => 2,
                Val::Byte4(_) => 4,
                Val::Byte8(_) => 8,
                Val::VarByte(v) => mem::size_of::<u16>() + v.len(),
            }
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        match self {
            Val::Null => out.ser_u8(start_idx, ValCode::Null as u8),
            Val::Byte1(v) => {
                let idx = out.ser_u8(start_idx, ValCode::Byte1 as u8);
                out.ser_u8(idx, *v)
            }
            Val::Byte2(v) => {
                let idx = out.ser_u8(start_idx, ValCode::Byte2 as u8);
                out.ser_u16(idx, *v)
            }
            Val::Byte4(v) => {
                let idx = out.ser_u8(start_idx, ValCode::Byte4 as u8);
                out.ser_u32(idx, *v)
            }
            Val::Byte8(v) => {
                let idx = out.ser_u8(start_idx, ValCode::Byte8 as u8);
                out.ser_u64(idx, *v)
            }
            Val::VarByte(v) => {
                let idx = out.ser_u8(start_idx, ValCode::VarByte as u8);
                let idx = out.ser_u16(idx, v.len() as u16);
                out.ser_byte_slice(idx, v)
            }
        }
    }
}

impl Deser for Val {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, code) = input.deser_u8(start_idx)?;
        match ValCode::try_from(code)? {
            ValCode::Null => Ok((idx, Val::Null)),
            ValCode::Byte1 => input.deser_u8(idx).map(|(i, v)| (i, Val::Byte1(v))),
            ValCode::Byte2 => input.deser_u16(idx).map(|(i, v)| (i, Val::Byte2(v))),
            ValCode::Byte4 => input.deser_u32(idx).map(|(i, v)| (i, Val::Byte4(v))),
            ValCode::Byte8 => input.deser_u64(idx).map(|(i, v)| (i, Val::Byte8(v))),
            ValCode::VarByte => {
                let (idx, len) = input.deser_u16(idx)?;
                let (idx, bs) = input.deser_byte_slice(idx, len as usize)?;
                Ok((idx, Val::from(bs)))
            }
        }
    }
}

/// Encode a row as raw record bytes stored in heap.
#[inline]
pub fn encode_row(vals: &[Val]) -> Vec<u8> {
    vals.ser_to_vec()
}

/// Decode raw record bytes into column values.
#[inline]
pub fn decode_row(record: &[u8]) -> Result<Vec<Val>> {
    let (idx, vals) = Vec::<Val>::deser(record, 0)?;
    if idx != record.len() {
        return Err(Error::InvalidFormat);
    }
    Ok(vals)
}
