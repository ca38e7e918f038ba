//! Payload envelope codec.
//!
//! Every cached value is stored as the JSON encoding of an envelope
//! `{"Time": <RFC3339 timestamp>, "CachedObject": <caller value>}`,
//! optionally zlib-compressed. The timestamp is captured at write time and
//! is the ground truth for soft-TTL staleness, independent of which layer
//! the envelope is later read from.
//!
//! Compression is a per-layer property, so it is applied at the layer edge:
//! [`encode`]/[`decode`] handle the JSON envelope, [`seal`]/[`open`] handle
//! the zlib step, and [`wrap`]/[`unwrap`] are the one-shot compositions.
//! The object portion decodes deferred as [`RawValue`] so the coordinator
//! never needs to know user types.

use crate::core::error::{StrataError, StrataResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Envelope as written: borrowed, pre-serialized object portion.
#[derive(Serialize)]
struct EnvelopeOut<'a> {
    #[serde(rename = "Time")]
    time: DateTime<Utc>,
    #[serde(rename = "CachedObject")]
    cached_object: &'a RawValue,
}

/// Envelope as read: the object portion is left as raw JSON for the caller
/// to decode into its own destination type.
#[derive(Debug, Deserialize)]
pub struct DecodedEnvelope {
    /// Wall-clock instant captured when the value was written.
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,

    /// Deferred caller value; `None` when the stored object was null or
    /// missing.
    #[serde(rename = "CachedObject", default)]
    pub cached_object: Option<Box<RawValue>>,
}

impl DecodedEnvelope {
    /// Age of the envelope relative to now, saturating at zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.time).to_std().unwrap_or(Duration::ZERO)
    }

    /// Decode the deferred object portion into the caller's type.
    pub fn decode_object<T: serde::de::DeserializeOwned>(&self) -> StrataResult<T> {
        let raw = self.cached_object.as_deref().ok_or(StrataError::NilCache)?;
        serde_json::from_str(raw.get()).map_err(|err| StrataError::Decode(err.to_string()))
    }
}

/// Encode a value into envelope bytes with `Time = now`.
///
/// A value that serializes to JSON `null` is rejected before any layer can
/// see it. A panic inside the serializer is caught and converted to an
/// error; serialization of hostile values must not crash the process.
pub fn encode<T: Serialize>(value: &T) -> StrataResult<Bytes> {
    let object = catch_unwind(AssertUnwindSafe(|| serde_json::value::to_raw_value(value)))
        .map_err(|panic| StrataError::Encode(format!("panic in serializer: {}", panic_text(panic))))?
        .map_err(|err| StrataError::Encode(err.to_string()))?;

    if object.get() == "null" {
        return Err(StrataError::NilValue);
    }

    let envelope = EnvelopeOut {
        time: Utc::now(),
        cached_object: &object,
    };
    let bytes =
        serde_json::to_vec(&envelope).map_err(|err| StrataError::Encode(err.to_string()))?;
    Ok(Bytes::from(bytes))
}

/// Decode envelope bytes, leaving the object portion raw.
pub fn decode(bytes: &[u8]) -> StrataResult<DecodedEnvelope> {
    serde_json::from_slice(bytes).map_err(|err| StrataError::Decode(err.to_string()))
}

/// Apply the layer's compression step to envelope bytes.
pub fn seal(bytes: Bytes, compress: bool) -> StrataResult<Bytes> {
    if !compress {
        return Ok(bytes);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&bytes)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|err| StrataError::Encode(format!("zlib: {}", err)))
}

/// Reverse the layer's compression step.
pub fn open(bytes: &[u8], compress: bool) -> StrataResult<Bytes> {
    if !compress {
        return Ok(Bytes::copy_from_slice(bytes));
    }
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map(|_| Bytes::from(out))
        .map_err(|err| StrataError::Decode(format!("zlib: {}", err)))
}

/// One-shot: encode and seal, as stored by a layer with the given flag.
pub fn wrap<T: Serialize>(value: &T, compress: bool) -> StrataResult<Bytes> {
    seal(encode(value)?, compress)
}

/// One-shot: open and decode bytes stored by a layer with the given flag.
pub fn unwrap(bytes: &[u8], compress: bool) -> StrataResult<DecodedEnvelope> {
    decode(&open(bytes, compress)?)
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
