//! Byte contract for values that leave the process.
//!
//! In-process tiers keep the typed value; the distributed and compressed
//! tiers only ever see the bytes produced here.

use crate::error::CacheError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait CacheValue: Clone + Send + Sync + 'static {
    fn to_bytes(&self) -> Result<Bytes, CacheError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError>;
}

impl<T> CacheValue for T
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn to_bytes(&self) -> Result<Bytes, CacheError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_struct_value_bytes() {
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        struct ToolResult {
            tool: String,
            output: Vec<u32>,
        }

        let value = ToolResult {
            tool: "search".to_string(),
            output: vec![1, 2, 3],
        };
        let bytes = value.to_bytes().unwrap();
        assert_eq!(ToolResult::from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn test_unserializable_value_reports_serialization_error() {
        // JSON object keys must be strings
        let mut value: HashMap<(u8, u8), u8> = HashMap::new();
        value.insert((1, 2), 3);
        assert!(matches!(value.to_bytes(), Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            String::from_bytes(b"\x00\x01not json"),
            Err(CacheError::Serialization(_))
        ));
    }
}
