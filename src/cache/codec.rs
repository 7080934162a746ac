//! Value codecs used by typed cache services.

use serde::{Serialize, de::DeserializeOwned};

use super::error::CacheError;

/// Serialization strategy carried by a typed cache service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// `serde_json`; readable in `redis-cli`.
    #[default]
    Json,
    /// MessagePack via `rmp-serde`, structs encoded as field-name maps.
    MessagePack,
}

impl Codec {
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
        match self {
            Self::Json => serde_json::to_vec(value)
                .map_err(|err| CacheError::serialization(format!("json encode: {err}"))),
            Self::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|err| CacheError::serialization(format!("msgpack encode: {err}"))),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
        match self {
            Self::Json => serde_json::from_slice(bytes)
                .map_err(|err| CacheError::serialization(format!("json decode: {err}"))),
            Self::MessagePack => rmp_serde::from_slice(bytes)
                .map_err(|err| CacheError::serialization(format!("msgpack decode: {err}"))),
        }
    }
}
