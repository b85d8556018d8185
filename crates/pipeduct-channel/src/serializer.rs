use serde::de::DeserializeOwned;
use serde::Serialize;

use pipeduct_codec::CodecError;

/// Pluggable payload serializer.
///
/// The channel core transports opaque bytes; this seam lets callers
/// move typed values without the core taking a position on the format.
/// Implementations must satisfy `from_bytes(to_bytes(v)) == v`.
pub trait Serializer<T> {
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn from_bytes(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON serializer over serde.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl<T: Serialize + DeserializeOwned> Serializer<T> for JsonSerializer {
    fn to_bytes(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|err| CodecError::Serialize(err.to_string()))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|err| CodecError::Serialize(err.to_string()))
    }
}
