//! Value serialization and compression
//!
//! Every partition fixes its codec at creation time. Values are
//! serialized with the partition's encoding and then, optionally,
//! compressed as a size-prepended LZ4 block.

use crate::{Result, TideError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Value serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    /// serde_json text
    Json,
    /// bincode binary (not self-describing)
    Bincode,
}

impl Default for ValueEncoding {
    fn default() -> Self {
        ValueEncoding::Json
    }
}

/// Value compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Lz4,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::None
    }
}

/// Encoder/decoder for a partition's values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueCodec {
    pub encoding: ValueEncoding,
    pub compression: Compression,
}

impl ValueCodec {
    /// Create a codec
    pub fn new(encoding: ValueEncoding, compression: Compression) -> Self {
        Self {
            encoding,
            compression,
        }
    }

    /// Serialize (and compress) a value
    pub fn encode<V: Serialize + ?Sized>(&self, value: &V) -> Result<Vec<u8>> {
        let raw = match self.encoding {
            ValueEncoding::Json => {
                serde_json::to_vec(value).map_err(|e| TideError::Encoding(e.to_string()))?
            }
            ValueEncoding::Bincode => {
                bincode::serialize(value).map_err(|e| TideError::Encoding(e.to_string()))?
            }
        };

        Ok(match self.compression {
            Compression::None => raw,
            Compression::Lz4 => lz4_flex::compress_prepend_size(&raw),
        })
    }

    /// Decompress (and deserialize) a value
    pub fn decode<V: DeserializeOwned>(&self, data: &[u8]) -> Result<V> {
        let decompressed;
        let raw = match self.compression {
            Compression::None => data,
            Compression::Lz4 => {
                decompressed = lz4_flex::decompress_size_prepended(data)
                    .map_err(|e| TideError::Compression(e.to_string()))?;
                &decompressed[..]
            }
        };

        match self.encoding {
            ValueEncoding::Json => {
                serde_json::from_slice(raw).map_err(|e| TideError::Encoding(e.to_string()))
            }
            ValueEncoding::Bincode => {
                bincode::deserialize(raw).map_err(|e| TideError::Encoding(e.to_string()))
            }
        }
    }
}
