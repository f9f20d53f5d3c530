// Copyright 2020 Joyent, Inc.

use serde_json::Value;

use crate::error::Error;

/// Encodes request bodies and decodes response bodies.
///
/// Implementations must round-trip: `deserialize(serialize(x))` yields `x`
/// for every supported body. Serialization failures are never retried by the
/// transport; they propagate straight to the caller.
pub trait Serializer: Send + Sync {
    /// Encode a request body into bytes for the wire.
    fn serialize(&self, body: &Value) -> Result<Vec<u8>, Error>;
    /// Decode a response body from bytes.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, Error>;
}

/// The default serializer. Encodes bodies as compact JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, body: &Value) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(body)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
