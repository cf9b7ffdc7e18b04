use crate::error::{Error, Result};
use std::mem;

/// Positional little-endian codec over a byte buffer.
///
/// Every method takes the start index and returns the index right after
/// the written or read value, so calls can be chained.
/// Deserialization is bounds checked because input comes from disk.
pub trait Serde {
    /// Serialize a u64 value to a byte slice.
    fn ser_u64(&mut self, idx: usize, val: u64) -> usize;

    /// Serialize a i64 value to a byte slice.
    fn ser_i64(&mut self, idx: usize, val: i64) -> usize;

    /// Serialize a u32 value to a byte slice.
    fn ser_u32(&mut self, idx: usize, val: u32) -> usize;

    /// Serialize a u16 value to a byte slice.
    fn ser_u16(&mut self, idx: usize, val: u16) -> usize;

    /// Serialize a u8 value to a byte slice.
    fn ser_u8(&mut self, idx: usize, val: u8) -> usize;

    /// Serialize bool value.
    #[inline]
    fn ser_bool(&mut self, idx: usize, val: bool) -> usize {
        self.ser_u8(idx, if val { 1 } else { 0 })
    }

    /// Serialize byte slice.
    fn ser_byte_slice(&mut self, idx: usize, val: &[u8]) -> usize;

    /// Returns size (number of bytes).
    fn size(&self) -> usize;

    /// Deserialize a u64 value from a byte slice.
    fn deser_u64(&self, idx: usize) -> Result<(usize, u64)>;

    /// Deserialize a i64 value from a byte slice.
    fn deser_i64(&self, idx: usize) -> Result<(usize, i64)>;

    /// Deserialize a u32 value from a byte slice.
    fn deser_u32(&self, idx: usize) -> Result<(usize, u32)>;

    /// Deserialize a u16 value from a byte slice.
    fn deser_u16(&self, idx: usize) -> Result<(usize, u16)>;

    /// Deserialize a u8 value from a byte slice.
    fn deser_u8(&self, idx: usize) -> Result<(usize, u8)>;

    /// Deserialize bool value.
    #[inline]
    fn deser_bool(&self, idx: usize) -> Result<(usize, bool)> {
        self.deser_u8(idx).map(|(i, r)| (i, r != 0))
    }

    /// Deserialize byte slice.
    fn deser_byte_slice(&self, idx: usize, len: usize) -> Result<(usize, &[u8])>;
}

macro_rules! impl_deser_le {
    ($name:ident, $ty:ty) => {
        #[inline]
        fn $name(&self, idx: usize) -> Result<(usize, $ty)> {
            let end = idx + mem::size_of::<$ty>();
            let bs = self.get(idx..end).ok_or(Error::InvalidFormat)?;
            Ok((end, <$ty>::from_le_bytes(bs.try_into()?)))
        }
    };
}

impl Serde for [u8] {
    #[inline]
    fn ser_u64(&mut self, idx: usize, val: u64) -> usize {
        self.ser_byte_slice(idx, &val.to_le_bytes())
    }

    #[inline]
    fn ser_i64(&mut self, idx: usize, val: i64) -> usize {
        self.ser_byte_slice(idx, &val.to_le_bytes())
    }

    #[inline]
    fn ser_u32(&mut self, idx: usize, val: u32) -> usize {
        self.ser_byte_slice(idx, &val.to_le_bytes())
    }

    #[inline]
    fn ser_u16(&mut self, idx: usize, val: u16) -> usize {
        self.ser_byte_slice(idx, &val.to_le_bytes())
    }

    #[inline]
    fn ser_u8(&mut self, idx: usize, val: u8) -> usize {
        debug_assert!(idx < self.len());
        self[idx] = val;
        idx + 1
    }

    #[inline]
    fn ser_byte_slice(&mut self, idx: usize, val: &[u8]) -> usize {
        debug_assert!(idx + val.len() <= self.len());
        self[idx..idx + val.len()].copy_from_slice(val);
        idx + val.len()
    }

    #[inline]
    fn size(&self) -> usize {
        self.len()
    }

    impl_deser_le!(deser_u64, u64);
    impl_deser_le!(deser_i64, i64);
    impl_deser_le!(deser_u32, u32);
    impl_deser_le!(deser_u16, u16);

    #[inline]
    fn deser_u8(&self, idx: usize) -> Result<(usize, u8)> {
        let v = *self.get(idx).ok_or(Error::InvalidFormat)?;
        Ok((idx + 1, v))
    }

    #[inline]
    fn deser_byte_slice(&self, idx: usize, len: usize) -> Result<(usize, &[u8])> {
        let res = self.get(idx..idx + len).ok_or(Error::InvalidFormat)?;
        Ok((idx + len, res))
    }
}

/// Defines how to serialize self to bytes.
///
/// This trait is designed to write a serialized object with a known
/// size to a fixed-sized buffer.
pub trait Ser<'a> {
    /// length of serialized bytes.
    fn ser_len(&self) -> usize;

    /// Serialize object into fix-sized byte slice.
    /// The buffer is guaranteed to be big enough.
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize;

    /// Serialize into a newly allocated buffer.
    #[inline]
    fn ser_to_vec(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.ser_len()];
        let idx = self.ser(&mut buf[..], 0);
        debug_assert_eq!(idx, buf.len());
        buf
    }
}

/// Defines how to deserialize objects from bytes.
///
/// The result is owned by the caller so that it can be passed to
/// different threads.
pub trait Deser: Sized {
    /// Deserialize objects from input.
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)>;
}

macro_rules! impl_ser_deser_for {
    ($ty:ty, $ser:ident, $deser:ident) => {
        impl Ser<'_> for $ty {
            #[inline]
            fn ser_len(&self) -> usize {
                mem::size_of::<$ty>()
            }

            #[inline]
            fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
                out.$ser(start_idx, *self)
            }
        }

        impl Deser for $ty {
            #[inline]
            fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
                input.$deser(start_idx)
            }
        }
    };
}

impl_ser_deser_for!(u64, ser_u64, deser_u64);
impl_ser_deser_for!(u32, ser_u32, deser_u32);
impl_ser_deser_for!(u16, ser_u16, deser_u16);
impl_ser_deser_for!(u8, ser_u8, deser_u8);
impl_ser_deser_for!(bool, ser_bool, deser_bool);

impl<'a, T: Ser<'a>> Ser<'a> for [T] {
    #[inline]
    fn ser_len(&self) -> usize {
        // 4-byte vector length + data
        mem::size_of::<u32>() + self.iter().map(|v| v.ser_len()).sum::<usize>()
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let mut idx = out.ser_u32(start_idx, self.len() as u32);
        for v in self.iter() {
            idx = v.ser(out, idx);
        }
        idx
    }
}

impl<T: Deser> Deser for Vec<T> {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (mut idx, len) = input.deser_u32(start_idx)?;
        let mut vec = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let (idx0, val) = T::deser(input, idx)?;
            idx = idx0;
            vec.push(val);
        }
        Ok((idx, vec))
    }
}

/// Length-prefixed raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenPrefixBytes(pub Vec<u8>);

impl Ser<'_> for LenPrefixBytes {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<u32>() + self.0.len()
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u32(start_idx, self.0.len() as u32);
        out.ser_byte_slice(idx, &self.0)
    }
}

impl Deser for LenPrefixBytes {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, len) = input.deser_u32(start_idx)?;
        let (idx, bs) = input.deser_byte_slice(idx, len as usize)?;
        Ok((idx, LenPrefixBytes(bs.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_primitives() {
        let mut buf = vec![0u8; 15];
        let mut idx = 0;
        idx = buf.ser_u64(idx, 0x0102030405060708);
        idx = buf.ser_u32(idx, 42);
        idx = buf.ser_u16(idx, 7);
        idx = buf.ser_bool(idx, true);
        assert_eq!(idx, 15);

        let (idx, a) = buf.deser_u64(0).unwrap();
        let (idx, b) = buf.deser_u32(idx).unwrap();
        let (idx, c) = buf.deser_u16(idx).unwrap();
        let (idx, d) = buf.deser_bool(idx).unwrap();
        assert_eq!((a, b, c, d), (0x0102030405060708, 42, 7, true));
        assert_eq!(idx, 15);
    }

    #[test]
    fn test_serde_out_of_bound() {
        let buf = vec![0u8; 3];
        assert!(matches!(buf.deser_u32(0), Err(Error::InvalidFormat)));
        assert!(matches!(buf.deser_byte_slice(2, 2), Err(Error::InvalidFormat)));
        assert!(buf.deser_u16(1).is_ok());
    }

    #[test]
    fn test_serde_vec() {
        let v: Vec<u64> = vec![1, 2, 3];
        let buf = v[..].ser_to_vec();
        assert_eq!(buf.len(), 4 + 24);
        let (idx, res) = Vec::<u64>::deser(&buf[..], 0).unwrap();
        assert_eq!(idx, buf.len());
        assert_eq!(res, v);

        let bs = LenPrefixBytes(b"hello".to_vec());
        let buf = bs.ser_to_vec();
        let (_, res) = LenPrefixBytes::deser(&buf[..], 0).unwrap();
        assert_eq!(res, bs);
    }
}
