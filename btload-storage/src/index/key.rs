//! Index key extraction.
//!
//! A key is the concatenation of per-column nullable memcmp encodings.
//! Descending columns have every byte of their component inverted, so
//! the whole key always compares as plain bytes in ascending order.
use crate::catalog::{ColumnAttributes, ColumnSpec, IndexOrder, IndexSpec};
use crate::error::{Error, Result};
use crate::serde::{Deser, Ser, Serde};
use crate::value::{Val, ValKind};
use btload_datatype::memcmp::{invert_bytes, MemCmpKey};
use std::fmt::Write;
use std::mem;

/// Upper bound of key columns, so that the key descriptor always fits
/// into the reserved area of the root page.
pub const MAX_KEY_COLUMNS: usize = 64;

/// Type, order and prefix of one key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub kind: ValKind,
    pub order: IndexOrder,
    /// Prefix length of variable-length column, 0 means full value.
    pub prefix_len: u16,
}

impl KeyColumn {
    #[inline]
    pub fn new(kind: ValKind) -> Self {
        KeyColumn {
            kind,
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

    #[inline]
    fn inverted(&self) -> bool {
        self.order == IndexOrder::Desc
    }
}

impl Ser<'_> for KeyColumn {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<u8>() * 2 + mem::size_of::<u16>()
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let idx = out.ser_u8(start_idx, self.kind as u8);
        let idx = out.ser_u8(idx, self.order as u8);
        out.ser_u16(idx, self.prefix_len)
    }
}

impl Deser for KeyColumn {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (idx, kind) = input.deser_u8(start_idx)?;
        let (idx, order) = input.deser_u8(idx)?;
        let (idx, prefix_len) = input.deser_u16(idx)?;
        Ok((
            idx,
            KeyColumn {
                kind: ValKind::try_from(kind)?,
                order: IndexOrder::try_from(order)?,
                prefix_len,
            },
        ))
    }
}

/// Key domain describes how keys of one index are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDomain {
    cols: Vec<KeyColumn>,
}

impl KeyDomain {
    #[inline]
    pub fn new(cols: Vec<KeyColumn>) -> Result<Self> {
        if cols.is_empty() || cols.len() > MAX_KEY_COLUMNS {
            return Err(Error::InvalidArgument);
        }
        Ok(KeyDomain { cols })
    }

    /// Build domain of an index over table columns.
    #[inline]
    pub fn from_index(columns: &[ColumnSpec], index: &IndexSpec) -> Result<Self> {
        let mut cols = Vec::with_capacity(index.index_cols.len());
        for ik in &index.index_cols {
            let col = columns
                .get(ik.col_no as usize)
                .ok_or(Error::InvalidArgument)?;
            cols.push(KeyColumn {
                kind: col.column_type,
                order: ik.order,
                prefix_len: ik.prefix_len,
            });
        }
        Self::new(cols)
    }

    #[inline]
    pub fn cols(&self) -> &[KeyColumn] {
        &self.cols
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Whether keys of this domain may differ in length.
    /// Separators of such domain can be shortened.
    #[inline]
    pub fn is_variable(&self) -> bool {
        self.cols.iter().any(|c| !c.kind.is_fixed())
    }

    /// Encode key values. Returns the key and whether any component is null.
    pub fn encode(&self, vals: &[Val]) -> Result<(MemCmpKey, bool)> {
        if vals.len() != self.cols.len() {
            return Err(Error::InvalidArgument);
        }
        let mut key = MemCmpKey::with_capacity(self.cols.len() * 9);
        let mut has_null = false;
        for (col, val) in self.cols.iter().zip(vals) {
            let start = key.len();
            has_null |= val.is_null();
            let truncate = col.prefix_len > 0
                && val.as_bytes().is_some_and(|b| b.len() > col.prefix_len as usize);
            if truncate {
                let mut v = val.clone();
                v.truncate_prefix(col.prefix_len as usize);
                v.encode_memcmp(col.kind, &mut key)?;
            } else {
                val.encode_memcmp(col.kind, &mut key)?;
            }
            if col.inverted() {
                invert_bytes(&mut key.as_bytes_mut()[start..]);
            }
        }
        Ok((key, has_null))
    }

    /// Decode key into column values.
    pub fn decode(&self, key: &[u8]) -> Result<Vec<Val>> {
        let mut vals = Vec::with_capacity(self.cols.len());
        let mut idx = 0;
        let mut comp = vec![];
        for col in &self.cols {
            let input = key.get(idx..).ok_or(Error::InvalidFormat)?;
            let len = Val::memcmp_len(col.kind, input, col.inverted())?;
            comp.clear();
            comp.extend_from_slice(input.get(..len).ok_or(Error::InvalidFormat)?);
            if col.inverted() {
                invert_bytes(&mut comp);
            }
            let (n, val) = Val::decode_memcmp(col.kind, &comp)?;
            if n != len {
                return Err(Error::InvalidFormat);
            }
            vals.push(val);
            idx += len;
        }
        if idx != key.len() {
            return Err(Error::InvalidFormat);
        }
        Ok(vals)
    }

    /// Human readable key, e.g. `('apple', 3)`.
    /// Falls back to hex if key cannot be decoded.
    pub fn display(&self, key: &[u8]) -> String {
        let mut s = String::from("(");
        match self.decode(key) {
            Ok(vals) => {
                for (i, (val, col)) in vals.iter().zip(&self.cols).enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    let _ = write!(s, "{}", val.display(col.kind));
                }
            }
            Err(_) => {
                for b in key {
                    let _ = write!(s, "{:02x}", b);
                }
            }
        }
        s.push(')');
        s
    }
}

impl Ser<'_> for KeyDomain {
    #[inline]
    fn ser_len(&self) -> usize {
        mem::size_of::<u16>() + self.cols.iter().map(|c| c.ser_len()).sum::<usize>()
    }

    #[inline]
    fn ser<S: Serde + ?Sized>(&self, out: &mut S, start_idx: usize) -> usize {
        let mut idx = out.ser_u16(start_idx, self.cols.len() as u16);
        for col in &self.cols {
            idx = col.ser(out, idx);
        }
        idx
    }
}

impl Deser for KeyDomain {
    #[inline]
    fn deser<S: Serde + ?Sized>(input: &S, start_idx: usize) -> Result<(usize, Self)> {
        let (mut idx, n) = input.deser_u16(start_idx)?;
        let mut cols = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (next, col) = KeyColumn::deser(input, idx)?;
            cols.push(col);
            idx = next;
        }
        Ok((idx, KeyDomain::new(cols)?))
    }
}

/// Predicate of a filtered index.
pub trait RowFilter: Send + Sync {
    fn evaluate(&self, row: &[Val]) -> Result<bool>;
}

/// Evaluator of a function-based index.
pub trait FunctionIndex: Send + Sync {
    /// Type and order of generated key columns.
    fn key_columns(&self) -> Vec<KeyColumn>;

    fn generate_key(&self, row: &[Val]) -> Result<Vec<Val>>;
}

/// Key extracted from one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedKey {
    pub key: MemCmpKey,
    pub has_null: bool,
    /// All components are null, such key is not stored.
    pub all_null: bool,
}

/// Builds index key from row values.
///
/// Null is rejected in any key column when the index is not-null, and
/// in key columns not declared nullable otherwise.
pub struct KeyExtractor<'a> {
    domain: &'a KeyDomain,
    col_nos: Vec<usize>,
    // key columns not declared nullable.
    required: Vec<bool>,
    function: Option<&'a dyn FunctionIndex>,
    not_null: bool,
}

impl<'a> KeyExtractor<'a> {
    #[inline]
    pub fn new(
        domain: &'a KeyDomain,
        columns: &[ColumnSpec],
        index: &IndexSpec,
        not_null: bool,
    ) -> Self {
        let required = index
            .index_cols
            .iter()
            .map(|k| {
                columns.get(k.col_no as usize).is_some_and(|c| {
                    !c.column_attributes.contains(ColumnAttributes::NULLABLE)
                })
            })
            .collect();
        KeyExtractor {
            domain,
            col_nos: index.index_cols.iter().map(|k| k.col_no as usize).collect(),
            required,
            function: None,
            not_null,
        }
    }

    #[inline]
    pub fn with_function(mut self, function: &'a dyn FunctionIndex) -> Self {
        self.function = Some(function);
        self
    }

    pub fn extract(&self, row: &[Val]) -> Result<ExtractedKey> {
        let generated;
        let vals: Vec<&Val> = match self.function {
            Some(f) => {
                generated = f.generate_key(row)?;
                generated.iter().collect()
            }
            None => {
                let mut vals = Vec::with_capacity(self.col_nos.len());
                for (col_no, required) in self.col_nos.iter().zip(&self.required) {
                    let val = row.get(*col_no).ok_or(Error::InvalidArgument)?;
                    if *required && val.is_null() {
                        return Err(Error::NotNullViolation);
                    }
                    vals.push(val);
                }
                vals
            }
        };
        let all_null = vals.iter().all(|v| v.is_null());
        let owned: Vec<Val> = vals.into_iter().cloned().collect();
        let (key, has_null) = self.domain.encode(&owned)?;
        if has_null && self.not_null {
            return Err(Error::NotNullViolation);
        }
        Ok(ExtractedKey {
            key,
            has_null,
            all_null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnAttributes, IndexAttributes, IndexKey};

    fn table_cols() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("id", ValKind::I64, ColumnAttributes::empty()),
            ColumnSpec::new("name", ValKind::VarByte, ColumnAttributes::NULLABLE),
            ColumnSpec::new("score", ValKind::I32, ColumnAttributes::NULLABLE),
        ]
    }

    #[test]
    fn test_key_domain_encode_decode() {
        let domain = KeyDomain::new(vec![
            KeyColumn::new(ValKind::VarByte),
            KeyColumn::new(ValKind::I32).desc(),
        ])
        .unwrap();
        assert!(domain.is_variable());
        let vals = vec![Val::from("apple"), Val::from(-7i32)];
        let (key, has_null) = domain.encode(&vals).unwrap();
        assert!(!has_null);
        assert_eq!(domain.decode(&key).unwrap(), vals);
        assert_eq!(domain.display(&key), "('apple', -7)");

        // descending component reverses order within equal prefix.
        let (k1, _) = domain.encode(&[Val::from("a"), Val::from(1i32)]).unwrap();
        let (k2, _) = domain.encode(&[Val::from("a"), Val::from(2i32)]).unwrap();
        assert!(k1 > k2);
        // null sorts last for descending column.
        let (kn, has_null) = domain.encode(&[Val::from("a"), Val::Null]).unwrap();
        assert!(has_null);
        assert!(kn > k1);
        assert_eq!(domain.decode(&kn).unwrap()[1], Val::Null);
    }

    #[test]
    fn test_key_domain_serde() {
        let domain = KeyDomain::new(vec![
            KeyColumn::new(ValKind::U64),
            KeyColumn::new(ValKind::VarByte).prefix(4).desc(),
        ])
        .unwrap();
        let bytes = domain.ser_to_vec();
        let (idx, decoded) = KeyDomain::deser(&bytes[..], 0).unwrap();
        assert_eq!(idx, bytes.len());
        assert_eq!(decoded, domain);
        assert!(KeyDomain::new(vec![]).is_err());
    }

    #[test]
    fn test_key_extractor_prefix_and_null() {
        let cols = table_cols();
        let index = IndexSpec::new(
            "idx_name_score",
            vec![IndexKey::new(1).prefix(3), IndexKey::new(2)],
            IndexAttributes::empty(),
        );
        let domain = KeyDomain::from_index(&cols, &index).unwrap();
        let extractor = KeyExtractor::new(&domain, &cols, &index, false);
        let k = extractor
            .extract(&[Val::from(1i64), Val::from("banana"), Val::from(5i32)])
            .unwrap();
        assert!(!k.has_null);
        assert_eq!(
            domain.decode(&k.key).unwrap(),
            vec![Val::from("ban"), Val::from(5i32)]
        );

        let k = extractor
            .extract(&[Val::from(1i64), Val::Null, Val::from(5i32)])
            .unwrap();
        assert!(k.has_null && !k.all_null);
        let k = extractor
            .extract(&[Val::from(1i64), Val::Null, Val::Null])
            .unwrap();
        assert!(k.all_null);

        let strict = KeyExtractor::new(&domain, &cols, &index, true);
        assert!(matches!(
            strict.extract(&[Val::from(1i64), Val::Null, Val::from(5i32)]),
            Err(Error::NotNullViolation)
        ));
        // kind mismatch of row value.
        assert!(extractor
            .extract(&[Val::from(1i64), Val::from(3i32), Val::from(5i32)])
            .is_err());
    }

    #[test]
    fn test_key_extractor_column_not_nullable() {
        let cols = table_cols();
        let index = IndexSpec::new(
            "idx_score_id",
            vec![IndexKey::new(2), IndexKey::new(0)],
            IndexAttributes::empty(),
        );
        let domain = KeyDomain::from_index(&cols, &index).unwrap();
        let extractor = KeyExtractor::new(&domain, &cols, &index, false);
        let k = extractor
            .extract(&[Val::from(1i64), Val::from("kiwi"), Val::Null])
            .unwrap();
        assert!(k.has_null && !k.all_null);
        // id is not declared nullable.
        assert!(matches!(
            extractor.extract(&[Val::Null, Val::from("kiwi"), Val::from(5i32)]),
            Err(Error::NotNullViolation)
        ));
    }

    struct Doubled;

    impl FunctionIndex for Doubled {
        fn key_columns(&self) -> Vec<KeyColumn> {
            vec![KeyColumn::new(ValKind::I64)]
        }

        fn generate_key(&self, row: &[Val]) -> Result<Vec<Val>> {
            match &row[0] {
                Val::Byte8(v) => Ok(vec![Val::from((*v as i64) * 2)]),
                _ => Err(Error::InvalidDatatype),
            }
        }
    }

    #[test]
    fn test_key_extractor_function() {
        let f = Doubled;
        let domain = KeyDomain::new(f.key_columns()).unwrap();
        let index = IndexSpec::new("idx_fn", vec![IndexKey::new(0)], IndexAttributes::empty());
        let extractor = KeyExtractor::new(&domain, &[], &index, false).with_function(&f);
        let k = extractor.extract(&[Val::from(21i64)]).unwrap();
        assert_eq!(domain.decode(&k.key).unwrap(), vec![Val::from(42i64)]);
    }
}
