//! PayloadCodec - Event と outbox payload の相互変換
//!
//! serde_json を使う。Event は所有権ツリーなので循環は起きず、
//! encode が循環で失敗することはない。

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{CourierError, CourierResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> CourierResult<String> {
        // Serialization failure means the event itself cannot be stored.
        serde_json::to_string(value)
            .map_err(|e| CourierError::Storage(format!("payload encode: {e}")))
    }

    pub fn decode<T: DeserializeOwned>(&self, payload: &str) -> CourierResult<T> {
        serde_json::from_str(payload).map_err(|e| CourierError::Deserialization(e.to_string()))
    }
}
