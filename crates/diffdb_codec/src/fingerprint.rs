//! Structural fingerprints.
//!
//! A fingerprint is an 8-byte digest of everything a value's `Serialize` impl
//! emits. Each serde data-model node is written as a tagged, length-framed
//! token into a SHA-256 stream:
//!
//! - scalars, strings and byte strings hash their exact contents
//! - sequences, tuples and struct fields hash in order
//! - map entries are hashed one by one and folded with wrapping addition, so
//!   iteration order of a `HashMap` never changes the result
//! - integers are widened before hashing, so `1u8` and `1u64` agree
//!
//! Sequences that are semantically sets (for example a `HashSet`) look like
//! any other sequence to serde. Mark them with [`Unordered`] or
//! `#[serde(with = "diffdb_codec::unordered")]` to fold their elements the
//! same way map entries are folded. The marker applies to the outermost
//! sequence, looking through `Option` and newtypes; marking anything else
//! is an error.
//!
//! Fingerprints are not cryptographic. They are the first 8 bytes of the
//! digest, which makes collisions unlikely but possible.

use crate::error::{CodecError, CodecResult};
use serde::ser::{self, Serialize};
use serde::{Deserialize, Deserializer, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Newtype name that switches the next sequence to order-insensitive hashing.
const UNORDERED_TOKEN: &str = "$diffdb::unordered";

/// An 8-byte structural digest.
///
/// Persisted as the little-endian bytes of the inner `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Width of a stored fingerprint in bytes.
    pub const LEN: usize = 8;

    /// Wraps a raw digest value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw digest value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Stored form: 8 bytes, little-endian.
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Parses the stored form. Returns `None` unless `bytes` is exactly
    /// [`Self::LEN`] long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_le_bytes(raw)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes the structural fingerprint of `value`.
///
/// # Errors
///
/// Returns [`CodecError::Unsupported`] if the value's `Serialize` impl
/// reports an error.
///
/// # Example
///
/// ```
/// use diffdb_codec::fingerprint;
/// use std::collections::HashMap;
///
/// let a: HashMap<_, _> = [("k1", 1), ("k2", 2)].into_iter().collect();
/// let b: HashMap<_, _> = [("k2", 2), ("k1", 1)].into_iter().collect();
/// assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
/// assert_ne!(fingerprint(&[1, 2]).unwrap(), fingerprint(&[2, 1]).unwrap());
/// ```
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> CodecResult<Fingerprint> {
    let mut hasher = StructuralHasher::default();
    value.serialize(&mut hasher)?;
    Ok(Fingerprint(hasher.finish()))
}

/// Marks a sequence as a set for fingerprinting.
///
/// Encoding and decoding are transparent: `Unordered<T>` reads and writes
/// exactly like `T`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unordered<T>(pub T);

impl<T: Serialize> Serialize for Unordered<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        unordered::serialize(&self.0, serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Unordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Unordered)
    }
}

/// `#[serde(with = "diffdb_codec::unordered")]` for set-like fields.
pub mod unordered {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serializes `value` marked as order-insensitive.
    ///
    /// # Errors
    ///
    /// Propagates the inner serializer's error.
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize + ?Sized,
        S: Serializer,
    {
        serializer.serialize_newtype_struct(super::UNORDERED_TOKEN, value)
    }

    /// Deserializes the field as plain `T`.
    ///
    /// # Errors
    ///
    /// Propagates the inner deserializer's error.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer)
    }
}

mod tag {
    pub const BOOL: u8 = b'b';
    pub const INT: u8 = b'i';
    pub const UINT: u8 = b'u';
    pub const FLOAT: u8 = b'f';
    pub const CHAR: u8 = b'c';
    pub const STR: u8 = b's';
    pub const BYTES: u8 = b'y';
    pub const NONE: u8 = b'n';
    pub const SOME: u8 = b'o';
    pub const UNIT: u8 = b'z';
    pub const UNIT_STRUCT: u8 = b'U';
    pub const VARIANT: u8 = b'e';
    pub const NEWTYPE: u8 = b'N';
    pub const SEQ: u8 = b'q';
    pub const SET: u8 = b'x';
    pub const TUPLE: u8 = b't';
    pub const MAP: u8 = b'm';
    pub const STRUCT: u8 = b'r';
    pub const END: u8 = b';';
}

#[derive(Default)]
struct StructuralHasher {
    digest: Sha256,
    unordered_next: bool,
}

impl StructuralHasher {
    fn finish(self) -> u64 {
        let out = self.digest.finalize();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&out[..8]);
        u64::from_le_bytes(raw)
    }

    fn tag(&mut self, tag: u8) {
        self.digest.update([tag]);
    }

    fn len(&mut self, len: usize) {
        self.digest.update((len as u64).to_le_bytes());
    }

    fn text(&mut self, tag: u8, bytes: &[u8]) {
        self.tag(tag);
        self.len(bytes.len());
        self.digest.update(bytes);
    }

    fn variant(&mut self, name: &str, index: u32, variant: &str) {
        self.text(tag::VARIANT, name.as_bytes());
        self.digest.update(index.to_le_bytes());
        self.text(tag::STR, variant.as_bytes());
    }

    /// Fails if an [`Unordered`] marker is pending: only sequences, or
    /// options and newtypes around them, can be marked.
    fn plain(&mut self) -> CodecResult<()> {
        if std::mem::take(&mut self.unordered_next) {
            return Err(CodecError::unsupported("Unordered must wrap a sequence"));
        }
        Ok(())
    }

    fn digest_of<T: Serialize + ?Sized>(value: &T) -> CodecResult<u64> {
        let mut sub = Self::default();
        value.serialize(&mut sub)?;
        Ok(sub.finish())
    }
}

/// Ordered compound: elements stream straight into the parent digest.
/// Unordered compound: elements are digested alone and summed.
struct Compound<'a> {
    out: &'a mut StructuralHasher,
    count: usize,
    folded: Option<u64>,
}

impl<'a> Compound<'a> {
    fn ordered(out: &'a mut StructuralHasher) -> Self {
        Self {
            out,
            count: 0,
            folded: None,
        }
    }

    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.count += 1;
        match self.folded.as_mut() {
            Some(sum) => {
                *sum = sum.wrapping_add(StructuralHasher::digest_of(value)?);
                Ok(())
            }
            None => value.serialize(&mut *self.out),
        }
    }

    fn field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> CodecResult<()> {
        self.out.text(tag::STR, name.as_bytes());
        self.element(value)
    }

    fn close(self) -> CodecResult<()> {
        if let Some(sum) = self.folded {
            self.out.digest.update(sum.to_le_bytes());
        }
        self.out.tag(tag::END);
        self.out.len(self.count);
        Ok(())
    }
}

struct MapFold<'a> {
    out: &'a mut StructuralHasher,
    count: usize,
    sum: u64,
    entry: Option<StructuralHasher>,
}

impl<'a> Serializer for &'a mut StructuralHasher {
    type Ok = ();
    type Error = CodecError;
    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = MapFold<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    fn serialize_bool(self, v: bool) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::BOOL);
        self.digest.update([u8::from(v)]);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> CodecResult<()> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i16(self, v: i16) -> CodecResult<()> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i32(self, v: i32) -> CodecResult<()> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i64(self, v: i64) -> CodecResult<()> {
        self.serialize_i128(i128::from(v))
    }

    fn serialize_i128(self, v: i128) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::INT);
        self.digest.update(v.to_le_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> CodecResult<()> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u16(self, v: u16) -> CodecResult<()> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u32(self, v: u32) -> CodecResult<()> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u64(self, v: u64) -> CodecResult<()> {
        self.serialize_u128(u128::from(v))
    }

    fn serialize_u128(self, v: u128) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::UINT);
        self.digest.update(v.to_le_bytes());
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> CodecResult<()> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::FLOAT);
        self.digest.update(v.to_bits().to_le_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::CHAR);
        self.digest.update(u32::from(v).to_le_bytes());
        Ok(())
    }

    fn serialize_str(self, v: &str) -> CodecResult<()> {
        self.plain()?;
        self.text(tag::STR, v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> CodecResult<()> {
        self.plain()?;
        self.text(tag::BYTES, v);
        Ok(())
    }

    fn serialize_none(self) -> CodecResult<()> {
        self.unordered_next = false;
        self.tag(tag::NONE);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> CodecResult<()> {
        self.tag(tag::SOME);
        value.serialize(self)
    }

    fn serialize_unit(self) -> CodecResult<()> {
        self.plain()?;
        self.tag(tag::UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, name: &'static str) -> CodecResult<()> {
        self.plain()?;
        self.text(tag::UNIT_STRUCT, name.as_bytes());
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> CodecResult<()> {
        self.plain()?;
        self.variant(name, variant_index, variant);
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        if name == UNORDERED_TOKEN {
            self.unordered_next = true;
            let result = value.serialize(&mut *self);
            self.unordered_next = false;
            return result;
        }
        self.text(tag::NEWTYPE, name.as_bytes());
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        self.plain()?;
        self.variant(name, variant_index, variant);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> CodecResult<Compound<'a>> {
        if std::mem::take(&mut self.unordered_next) {
            self.tag(tag::SET);
            return Ok(Compound {
                out: self,
                count: 0,
                folded: Some(0),
            });
        }
        self.tag(tag::SEQ);
        Ok(Compound::ordered(self))
    }

    fn serialize_tuple(self, _len: usize) -> CodecResult<Compound<'a>> {
        self.plain()?;
        self.tag(tag::TUPLE);
        Ok(Compound::ordered(self))
    }

    fn serialize_tuple_struct(self, name: &'static str, _len: usize) -> CodecResult<Compound<'a>> {
        self.plain()?;
        self.text(tag::TUPLE, name.as_bytes());
        Ok(Compound::ordered(self))
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> CodecResult<Compound<'a>> {
        self.plain()?;
        self.variant(name, variant_index, variant);
        self.tag(tag::TUPLE);
        Ok(Compound::ordered(self))
    }

    fn serialize_map(self, _len: Option<usize>) -> CodecResult<MapFold<'a>> {
        self.plain()?;
        self.tag(tag::MAP);
        Ok(MapFold {
            out: self,
            count: 0,
            sum: 0,
            entry: None,
        })
    }

    fn serialize_struct(self, name: &'static str, _len: usize) -> CodecResult<Compound<'a>> {
        self.plain()?;
        self.text(tag::STRUCT, name.as_bytes());
        Ok(Compound::ordered(self))
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> CodecResult<Compound<'a>> {
        self.plain()?;
        self.variant(name, variant_index, variant);
        self.tag(tag::STRUCT);
        Ok(Compound::ordered(self))
    }
}

impl ser::SerializeSeq for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.element(value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeTuple for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.element(value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeTupleStruct for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.element(value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeTupleVariant for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        self.element(value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeStruct for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        self.field(key, value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeStructVariant for Compound<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> CodecResult<()> {
        self.field(key, value)
    }

    fn end(self) -> CodecResult<()> {
        self.close()
    }
}

impl ser::SerializeMap for MapFold<'_> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> CodecResult<()> {
        let mut entry = StructuralHasher::default();
        key.serialize(&mut entry)?;
        self.entry = Some(entry);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> CodecResult<()> {
        let mut entry = self
            .entry
            .take()
            .ok_or_else(|| CodecError::unsupported("map value serialized before its key"))?;
        value.serialize(&mut entry)?;
        self.sum = self.sum.wrapping_add(entry.finish());
        self.count += 1;
        Ok(())
    }

    fn end(self) -> CodecResult<()> {
        self.out.digest.update(self.sum.to_le_bytes());
        self.out.tag(tag::END);
        self.out.len(self.count);
        Ok(())
    }
}
