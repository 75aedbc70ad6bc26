//! CBOR payload encoding.
//!
//! Payloads are whatever `serde` produces for the caller's type, written with
//! `ciborium`. No schema is stored: the caller decodes into the same shape it
//! added.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes `value` to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the value's `Serialize` impl
/// fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes CBOR bytes into `T`.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not valid CBOR or
/// do not match the shape of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Decodes one pending payload into a caller-chosen type.
///
/// Handed to apply callbacks. The target type should be the type that was
/// added; a mismatch is reported as [`CodecError::DecodingFailed`].
///
/// ```
/// use diffdb_codec::{encode, Decoder};
///
/// let bytes = encode(&("row", 7u32)).unwrap();
/// let decoder = Decoder::new(&bytes);
/// let row: (String, u32) = decoder.decode().unwrap();
/// assert_eq!(row, ("row".to_string(), 7));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Binds a decoder to encoded payload bytes.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Decodes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DecodingFailed`] on a shape mismatch.
    pub fn decode<T: DeserializeOwned>(&self) -> CodecResult<T> {
        decode(self.data)
    }

    /// The raw encoded payload.
    #[must_use]
    pub const fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}
