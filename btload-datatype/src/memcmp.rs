use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::ops::Deref;

/// Extendable byte container.
pub trait BytesExtendable {
    /// Push single byte into the container.
    fn push_byte(&mut self, value: u8);

    /// Extend from a byte slice.
    fn extend_from_byte_slice(&mut self, values: &[u8]);

    fn extend_repeat_n(&mut self, val: u8, n: usize);

    /// Update last byte.
    fn update_last_byte(&mut self, value: u8);
}

impl BytesExtendable for Vec<u8> {
    #[inline]
    fn push_byte(&mut self, value: u8) {
        self.push(value);
    }

    #[inline]
    fn extend_from_byte_slice(&mut self, values: &[u8]) {
        self.extend_from_slice(values);
    }

    #[inline]
    fn extend_repeat_n(&mut self, val: u8, n: usize) {
        self.extend(std::iter::repeat_n(val, n))
    }

    #[inline]
    fn update_last_byte(&mut self, value: u8) {
        if let Some(b) = self.last_mut() {
            *b = value;
        }
    }
}

/// Memory comparable format ensure sort result of encoded value is
/// identical to original value.
///
/// 1. Unsigned integer: Use Bigendian encoding.
/// 2. Signed integer: Use Bigendian encoding, then flip most significant bit.
/// 3. Float-point number: Use Bigendian encoding, if positive, flip most significant bit,
///    Otherwise, flip all bits. Negative zero is normalized to zero.
/// 4. Variable length bytes/string: segmented encoding, so that composite keys
///    stay prefix-free and every component can be decoded back.
///
/// Variable-size type encoding:
///
/// 1. Split the value into segments. Each segment has at most 15 bytes.
///    If segment has less than 15 bytes, append 0x00 until it's length equal to 15.
/// 2. Append one byte at end of each segment:
///    a) if original length is less than 15, use original length as the value.
///    b) if original length is equal to 15 but it's not last segment, use 0xFF as the value.
///    c) if original length is equal to 15 but it's last segment, use 15 as the value.
///
/// Descending order is achieved by inverting every byte of a component's
/// encoding, see [`invert_bytes`].
pub trait MemCmpFormat {
    /// Returns estimated length of the type.
    /// This may return None if the length can only be determined by the runtime value.
    fn est_mcf_len() -> Option<usize>;

    /// Returns exact encoded length of this value.
    fn enc_mcf_len(&self) -> usize;

    /// Attach to end of the buffer with the memory comparable format.
    fn extend_mcf_to<T: BytesExtendable>(&self, buf: &mut T);
}

/// Inverse of [`MemCmpFormat`].
pub trait MemCmpDecode: Sized {
    /// Decode one value from the head of input.
    /// Returns number of consumed bytes and the value.
    fn decode_mcf(input: &[u8]) -> Result<(usize, Self)>;
}

pub const NULL_FLAG: u8 = 0x01;
pub const NON_NULL_FLAG: u8 = 0x02;
const FIX_SEG_FLAG: u8 = 0xff;
const SEG_LEN: usize = 15;
pub const MIN_VAR_MCF_LEN: usize = SEG_LEN + 1;
pub const MIN_VAR_NMCF_LEN: usize = MIN_VAR_MCF_LEN + 1;

/// Nullable memory comparable format.
pub trait NullableMemCmpFormat {
    /// Returns estimated length of the type.
    /// Should prepend 1-byte nullable flag, followed by
    /// memory comparable format.
    fn est_nmcf_len() -> Option<usize>;

    /// Returns exact encoded length of this value.
    fn enc_nmcf_len(&self) -> usize;

    /// Attach value to end of the buffer with the memory comparable format.
    fn extend_nmcf_to<T: BytesExtendable>(&self, buf: &mut T);
}

pub struct Null;

impl NullableMemCmpFormat for Null {
    #[inline]
    fn est_nmcf_len() -> Option<usize> {
        Some(1)
    }

    #[inline]
    fn enc_nmcf_len(&self) -> usize {
        1
    }

    #[inline]
    fn extend_nmcf_to<T: BytesExtendable>(&self, buf: &mut T) {
        buf.push_byte(NULL_FLAG);
    }
}

macro_rules! impl_nmcf_for {
    ($t1:ty) => {
        impl NullableMemCmpFormat for $t1 {
            #[inline]
            fn est_nmcf_len() -> Option<usize> {
                <Self as MemCmpFormat>::est_mcf_len().map(|n| n + 1)
            }

            #[inline]
            fn enc_nmcf_len(&self) -> usize {
                self.enc_mcf_len() + 1
            }

            #[inline]
            fn extend_nmcf_to<T: BytesExtendable>(&self, buf: &mut T) {
                buf.push_byte(NON_NULL_FLAG);
                self.extend_mcf_to(buf);
            }
        }
    };
}

#[inline]
fn fixed_head<const N: usize>(input: &[u8]) -> Result<[u8; N]> {
    if input.len() < N {
        return Err(Error::UnexpectedEnd);
    }
    let mut bs = [0u8; N];
    bs.copy_from_slice(&input[..N]);
    Ok(bs)
}

macro_rules! impl_mcf_for_u {
    ($t1:ty) => {
        impl MemCmpFormat for $t1 {
            #[inline]
            fn est_mcf_len() -> Option<usize> {
                Some(size_of::<$t1>())
            }

            #[inline]
            fn enc_mcf_len(&self) -> usize {
                size_of::<$t1>()
            }

            #[inline]
            fn extend_mcf_to<T: BytesExtendable>(&self, buf: &mut T) {
                let bs = self.to_be_bytes();
                buf.extend_from_byte_slice(&bs);
            }
        }

        impl MemCmpDecode for $t1 {
            #[inline]
            fn decode_mcf(input: &[u8]) -> Result<(usize, Self)> {
                let bs = fixed_head::<{ size_of::<$t1>() }>(input)?;
                Ok((size_of::<$t1>(), <$t1>::from_be_bytes(bs)))
            }
        }
    };
}

impl_mcf_for_u!(u8);
impl_mcf_for_u!(u16);
impl_mcf_for_u!(u32);
impl_mcf_for_u!(u64);
impl_nmcf_for!(u8);
impl_nmcf_for!(u16);
impl_nmcf_for!(u32);
impl_nmcf_for!(u64);

macro_rules! impl_mcf_for_i {
    ($t1:ty) => {
        impl MemCmpFormat for $t1 {
            #[inline]
            fn est_mcf_len() -> Option<usize> {
                Some(size_of::<$t1>())
            }

            #[inline]
            fn enc_mcf_len(&self) -> usize {
                size_of::<$t1>()
            }

            #[inline]
            fn extend_mcf_to<T: BytesExtendable>(&self, buf: &mut T) {
                let mut bs = self.to_be_bytes();
                bs[0] ^= 0x80;
                buf.extend_from_byte_slice(&bs);
            }
        }

        impl MemCmpDecode for $t1 {
            #[inline]
            fn decode_mcf(input: &[u8]) -> Result<(usize, Self)> {
                let mut bs = fixed_head::<{ size_of::<$t1>() }>(input)?;
                bs[0] ^= 0x80;
                Ok((size_of::<$t1>(), <$t1>::from_be_bytes(bs)))
            }
        }
    };
}

impl_mcf_for_i!(i8);
impl_mcf_for_i!(i16);
impl_mcf_for_i!(i32);
impl_mcf_for_i!(i64);
impl_nmcf_for!(i8);
impl_nmcf_for!(i16);
impl_nmcf_for!(i32);
impl_nmcf_for!(i64);

macro_rules! impl_mcf_for_f {
    ($t1:ty, $u:ty, $zero:expr, $mask:expr) => {
        impl MemCmpFormat for $t1 {
            #[inline]
            fn est_mcf_len() -> Option<usize> {
                Some(size_of::<$t1>())
            }

            #[inline]
            fn enc_mcf_len(&self) -> usize {
                size_of::<$t1>()
            }

            #[inline]
            fn extend_mcf_to<T: BytesExtendable>(&self, buf: &mut T) {
                // -0.0 and 0.0 must share one encoding.
                let v = if *self == $zero { $zero } else { *self };
                let u = if v >= $zero {
                    // flip msb
                    v.to_bits() ^ $mask
                } else {
                    // flip all bits
                    !(v.to_bits())
                };
                buf.extend_from_byte_slice(&u.to_be_bytes());
            }
        }

        impl MemCmpDecode for $t1 {
            #[inline]
            fn decode_mcf(input: &[u8]) -> Result<(usize, Self)> {
                let bs = fixed_head::<{ size_of::<$t1>() }>(input)?;
                let u = <$u>::from_be_bytes(bs);
                let bits = if u & $mask != 0 { u ^ $mask } else { !u };
                Ok((size_of::<$t1>(), <$t1>::from_bits(bits)))
            }
        }
    };
}

impl_mcf_for_f!(f32, u32, 0.0f32, 0x8000_0000);
impl_mcf_for_f!(f64, u64, 0.0f64, 0x8000_0000_0000_0000);
impl_nmcf_for!(f32);
impl_nmcf_for!(f64);

#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentedBytes<'a>(pub &'a [u8]);

impl MemCmpFormat for SegmentedBytes<'_> {
    #[inline]
    fn est_mcf_len() -> Option<usize> {
        None
    }

    #[inline]
    fn enc_mcf_len(&self) -> usize {
        let n_segs = self.0.len().max(1).div_ceil(SEG_LEN);
        n_segs * (SEG_LEN + 1)
    }

    #[inline]
    fn extend_mcf_to<T: BytesExtendable>(&self, buf: &mut T) {
        extend_segmented_bytes(self.0, buf)
    }
}

impl_nmcf_for!(SegmentedBytes<'_>);

impl MemCmpDecode for Vec<u8> {
    #[inline]
    fn decode_mcf(input: &[u8]) -> Result<(usize, Self)> {
        let mut res = Vec::new();
        let mut offset = 0;
        loop {
            if input.len() < offset + SEG_LEN + 1 {
                return Err(Error::UnexpectedEnd);
            }
            let seg = &input[offset..offset + SEG_LEN];
            let flag = input[offset + SEG_LEN];
            offset += SEG_LEN + 1;
            match flag {
                FIX_SEG_FLAG => res.extend_from_slice(seg),
                n if (n as usize) <= SEG_LEN => {
                    res.extend_from_slice(&seg[..n as usize]);
                    return Ok((offset, res));
                }
                _ => return Err(Error::InvalidFormat),
            }
        }
    }
}

#[inline]
fn extend_segmented_bytes<T: BytesExtendable>(bs: &[u8], buf: &mut T) {
    if bs.is_empty() {
        buf.extend_repeat_n(0, SEG_LEN + 1); // last byte is zero
        return;
    }
    let mut chunks = bs.chunks_exact(SEG_LEN);
    if chunks.remainder().is_empty() {
        for c in chunks {
            buf.extend_from_byte_slice(c);
            buf.push_byte(FIX_SEG_FLAG);
        }
        // update last byte as segment length
        buf.update_last_byte(SEG_LEN as u8);
    } else {
        for c in chunks.by_ref() {
            buf.extend_from_byte_slice(c);
            buf.push_byte(FIX_SEG_FLAG);
        }
        buf.extend_from_byte_slice(chunks.remainder());
        buf.extend_repeat_n(0x00, SEG_LEN - chunks.remainder().len());
        buf.push_byte(chunks.remainder().len() as u8);
    }
}

/// Returns encoded length of the segmented bytes at head of input.
/// If `inverted` is true, the encoding is expected to be bitwise inverted.
#[inline]
pub fn segmented_len(input: &[u8], inverted: bool) -> Result<usize> {
    let mut offset = 0;
    loop {
        if input.len() < offset + SEG_LEN + 1 {
            return Err(Error::UnexpectedEnd);
        }
        let mut flag = input[offset + SEG_LEN];
        if inverted {
            flag = !flag;
        }
        offset += SEG_LEN + 1;
        if flag != FIX_SEG_FLAG {
            return Ok(offset);
        }
    }
}

/// Invert all bits so that byte order of the encoding is reversed.
#[inline]
pub fn invert_bytes(bs: &mut [u8]) {
    bs.iter_mut().for_each(|b| *b = !*b);
}

pub const MEM_CMP_KEY_INLINE: usize = 24;

/// MemCmpKey is a key which can be directly memory compared.
/// Short keys are kept inline, long keys spill to heap.
///
/// The restriction of comparision is two keys must be of same source type.
/// e.g. Key::from(u32) can not be compared to Key::from(u64).
#[derive(Clone, Default)]
pub struct MemCmpKey(SmallVec<[u8; MEM_CMP_KEY_INLINE]>);

impl MemCmpKey {
    /// Get byte slice of the key.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Create a empty key.
    #[inline]
    pub fn empty() -> Self {
        MemCmpKey(SmallVec::new())
    }

    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        MemCmpKey(SmallVec::with_capacity(cap))
    }

    /// Returns mutable bytes of the key.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Shorten the key to given length.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

impl From<&[u8]> for MemCmpKey {
    #[inline]
    fn from(value: &[u8]) -> Self {
        MemCmpKey(SmallVec::from_slice(value))
    }
}

impl<const LEN: usize> From<&[u8; LEN]> for MemCmpKey {
    #[inline]
    fn from(value: &[u8; LEN]) -> Self {
        MemCmpKey(SmallVec::from_slice(value))
    }
}

impl From<Vec<u8>> for MemCmpKey {
    #[inline]
    fn from(value: Vec<u8>) -> Self {
        MemCmpKey(SmallVec::from_vec(value))
    }
}

impl From<Null> for MemCmpKey {
    #[inline]
    fn from(_: Null) -> Self {
        MemCmpKey::from(&[NULL_FLAG])
    }
}

macro_rules! impl_mem_cmp_key_from_non_nullable {
    ($ty:ty) => {
        impl From<$ty> for MemCmpKey {
            #[inline]
            fn from(value: $ty) -> Self {
                let mut key = MemCmpKey::with_capacity(size_of::<$ty>());
                value.extend_mcf_to(&mut key);
                key
            }
        }
    };
}

impl_mem_cmp_key_from_non_nullable!(i8);
impl_mem_cmp_key_from_non_nullable!(i16);
impl_mem_cmp_key_from_non_nullable!(i32);
impl_mem_cmp_key_from_non_nullable!(i64);
impl_mem_cmp_key_from_non_nullable!(u8);
impl_mem_cmp_key_from_non_nullable!(u16);
impl_mem_cmp_key_from_non_nullable!(u32);
impl_mem_cmp_key_from_non_nullable!(u64);
impl_mem_cmp_key_from_non_nullable!(f32);
impl_mem_cmp_key_from_non_nullable!(f64);

impl Deref for MemCmpKey {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl Borrow<[u8]> for MemCmpKey {
    #[inline]
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Hash for MemCmpKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialEq for MemCmpKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes().eq(other.as_bytes())
    }
}

impl Eq for MemCmpKey {}

impl Ord for MemCmpKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for MemCmpKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl BytesExtendable for MemCmpKey {
    #[inline]
    fn push_byte(&mut self, value: u8) {
        self.0.push(value)
    }

    #[inline]
    fn extend_from_byte_slice(&mut self, values: &[u8]) {
        self.0.extend_from_slice(values);
    }

    #[inline]
    fn extend_repeat_n(&mut self, val: u8, n: usize) {
        self.0.extend(std::iter::repeat_n(val, n));
    }

    #[inline]
    fn update_last_byte(&mut self, value: u8) {
        if let Some(b) = self.0.last_mut() {
            *b = value;
        }
    }
}

impl fmt::Debug for MemCmpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_bytes().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::ThreadRng;
    use rand::Rng;
    use rand_distr::{Distribution, StandardUniform};

    use super::*;

    #[test]
    fn test_mcf_sized() {
        // int
        run_test_mcf::<u8>();
        run_test_mcf::<u16>();
        run_test_mcf::<u32>();
        run_test_mcf::<u64>();

        run_test_mcf::<i8>();
        run_test_mcf::<i16>();
        run_test_mcf::<i32>();
        run_test_mcf::<i64>();

        // int + int
        run_test_mcf2::<i32, i32>();
        run_test_mcf2::<u32, u32>();
        run_test_mcf2::<i64, u64>();
    }

    #[test]
    fn test_mcf_decode_sized() {
        let mut r = rand::rng();
        for _ in 0..256 {
            let v: i64 = r.random();
            let mut buf = vec![];
            v.extend_mcf_to(&mut buf);
            assert_eq!(i64::decode_mcf(&buf).unwrap(), (8, v));
            let u: u16 = r.random();
            let mut buf = vec![];
            u.extend_mcf_to(&mut buf);
            assert_eq!(u16::decode_mcf(&buf).unwrap(), (2, u));
        }
        assert_eq!(i32::decode_mcf(&[0x80]), Err(Error::UnexpectedEnd));
    }

    #[test]
    fn test_mcf_float() {
        let mut buf0 = vec![];
        (-1.0f64).extend_mcf_to(&mut buf0);
        assert_eq!(buf0.len(), 8);
        assert!(buf0[0] & 0x80 == 0);

        let mut buf1 = vec![];
        NullableMemCmpFormat::extend_nmcf_to(&-1.0f64, &mut buf1);
        assert_eq!(buf1.len(), 9);
        assert_eq!(buf1[0], NON_NULL_FLAG);
        assert!(buf1[1] & 0x80 == 0);

        let inputs = [-3.5f64, -1.0, -0.0, 0.0, 0.25, 1.0, 1e10];
        let encoded: Vec<Vec<u8>> = inputs
            .iter()
            .map(|f| {
                let mut buf = vec![];
                f.extend_mcf_to(&mut buf);
                buf
            })
            .collect();
        for w in encoded.windows(2) {
            assert!(w[0] <= w[1]);
        }
        // negative zero collapses to zero
        assert_eq!(encoded[2], encoded[3]);
        for (f, e) in inputs.iter().zip(&encoded) {
            let (n, d) = f64::decode_mcf(e).unwrap();
            assert_eq!(n, 8);
            assert_eq!(d, *f);
        }
    }

    #[test]
    fn test_mcf_varlen() {
        run_test_mcf_varlen(gen_rand_bytes);
    }

    #[test]
    fn test_mcf_varlen_decode() {
        for len in [0usize, 1, 14, 15, 16, 30, 31, 100] {
            let input: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut buf = vec![];
            SegmentedBytes(&input).extend_mcf_to(&mut buf);
            assert_eq!(buf.len(), SegmentedBytes(&input).enc_mcf_len());
            assert_eq!(segmented_len(&buf, false).unwrap(), buf.len());
            let (n, decoded) = Vec::<u8>::decode_mcf(&buf).unwrap();
            assert_eq!(n, buf.len());
            assert_eq!(decoded, input);
            invert_bytes(&mut buf);
            assert_eq!(segmented_len(&buf, true).unwrap(), buf.len());
        }
    }

    #[test]
    fn test_mcf_inverted_order() {
        let mut a = vec![];
        SegmentedBytes(b"apple").extend_mcf_to(&mut a);
        let mut b = vec![];
        SegmentedBytes(b"apples").extend_mcf_to(&mut b);
        assert!(a < b);
        invert_bytes(&mut a);
        invert_bytes(&mut b);
        assert!(a > b);
    }

    #[test]
    fn test_mem_cmp_key() {
        let k1 = MemCmpKey::from(1u32);
        let k2 = MemCmpKey::from(2u32);
        assert!(k1 < k2);
        let mut long = MemCmpKey::empty();
        SegmentedBytes(&[7u8; 100]).extend_mcf_to(&mut long);
        assert_eq!(long.len(), 7 * 16);
        long.truncate(3);
        assert_eq!(long.as_bytes(), &[7, 7, 7]);
        assert_eq!(MemCmpKey::from(Null).as_bytes(), &[NULL_FLAG]);
    }

    fn run_test_mcf<T>()
    where
        T: MemCmpFormat + NullableMemCmpFormat + Ord,
        StandardUniform: Distribution<T>,
    {
        let mut r = rand::rng();
        let mut input1: Vec<T> = (0..1024).map(|_| r.sample(StandardUniform)).collect();
        if let Some(el) = T::est_mcf_len() {
            assert_eq!(el, input1[0].enc_mcf_len());
        }
        let mut input2: Vec<Vec<u8>> = input1
            .iter()
            .map(|v| {
                let mut buf = vec![];
                v.extend_mcf_to(&mut buf);
                buf
            })
            .collect();
        input1.sort();
        input2.sort();
        for (v, a) in input1.iter().zip(input2) {
            let mut buf = vec![];
            v.extend_mcf_to(&mut buf);
            assert_eq!(buf, a);
        }
    }

    fn run_test_mcf2<T, U>()
    where
        T: MemCmpFormat + NullableMemCmpFormat + Ord,
        U: MemCmpFormat + NullableMemCmpFormat + Ord,
        StandardUniform: Distribution<T> + Distribution<U>,
    {
        let mut r = rand::rng();
        let mut input1 = Vec::<(T, U)>::with_capacity(1024);
        for _ in 0..1024 {
            input1.push(r.sample(StandardUniform));
        }
        let mut input2 = Vec::with_capacity(1024);
        for (t, u) in &input1 {
            let mut buf = Vec::with_capacity(T::enc_nmcf_len(t) + U::enc_nmcf_len(u));
            T::extend_nmcf_to(t, &mut buf);
            U::extend_nmcf_to(u, &mut buf);
            input2.push(buf);
        }
        input1.sort();
        input2.sort();

        for ((t, u), a) in input1.iter().zip(input2) {
            let mut buf = Vec::with_capacity(T::enc_nmcf_len(t) + U::enc_nmcf_len(u));
            T::extend_nmcf_to(t, &mut buf);
            U::extend_nmcf_to(u, &mut buf);
            assert_eq!(buf, a);
        }
    }

    fn run_test_mcf_varlen<F>(f: F)
    where
        F: Fn(&mut ThreadRng) -> Vec<u8>,
    {
        let mut r = rand::rng();
        let mut input1: Vec<Vec<u8>> = (0..1024).map(|_| f(&mut r)).collect();
        let mut input2: Vec<Vec<u8>> = input1
            .iter()
            .map(|v| {
                let mut buf = vec![];
                SegmentedBytes(v).extend_mcf_to(&mut buf);
                buf
            })
            .collect();
        input1.sort();
        input2.sort();
        for (v, a) in input1.iter().zip(input2) {
            let (_, decoded) = Vec::<u8>::decode_mcf(&a).unwrap();
            assert_eq!(&decoded, v);
        }
    }

    fn gen_rand_bytes(r: &mut ThreadRng) -> Vec<u8> {
        let len = r.random_range(0..60);
        (0..len).map(|_| r.random()).collect()
    }
}
