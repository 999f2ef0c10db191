//! Identifier wire codec
//!
//! An identifier travels as exactly four bytes of service data: a 32-bit
//! value in big-endian order. Both ends of the protocol depend on this
//! layout, so it is fixed here rather than left to the radio layer.
//!
//! The sender's creation time is not part of the payload. A decoded
//! identifier is stamped with the receiver's clock, so `created_at` on a
//! remote identifier means "first decoded here", not "generated there".

use super::Identifier;
use crate::clock::Millis;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use thiserror::Error;

/// Length of the broadcast payload in bytes
pub const PAYLOAD_LEN: usize = 4;

/// Broadcast payload carrying one identifier
pub type Payload = [u8; PAYLOAD_LEN];

/// Errors for payload decoding
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Insufficient payload length: got {len} bytes, need 4")]
    InsufficientLength { len: usize },
}

/// Serialize a 32-bit identifier value into its wire payload
pub fn encode_value(value: u32) -> Payload {
    value.to_be_bytes()
}

/// Read the identifier value from the first four bytes of a payload.
/// Trailing bytes are ignored.
pub fn decode_value(bytes: &[u8]) -> Result<u32, DecodeError> {
    let head: Payload = bytes
        .get(..PAYLOAD_LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(DecodeError::InsufficientLength { len: bytes.len() })?;
    Ok(u32::from_be_bytes(head))
}

/// Decode a remote payload into an identifier stamped with `now`
pub fn decode(bytes: &[u8], now: Millis) -> Result<Identifier, DecodeError> {
    let value = decode_value(bytes)?;
    Ok(Identifier::from_value(value, now))
}

/// Generates identifier payloads and caches the current one.
///
/// `encode()` produces a fresh random value only when nothing is cached, so
/// a broadcast restarted without a rotation presents the same payload.
/// `reset()` drops the cache; the next `encode()` draws a new value.
pub struct IdentifierCodec<R = StdRng> {
    rng: R,
    cached: Option<u32>,
}

impl IdentifierCodec<StdRng> {
    /// Codec seeded from the operating system's entropy source
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for IdentifierCodec<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> IdentifierCodec<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng, cached: None }
    }

    /// Return the cached payload, generating one if the cache is empty
    pub fn encode(&mut self) -> Payload {
        let value = match self.cached {
            Some(value) => value,
            None => {
                let value = self.rng.next_u32();
                tracing::debug!("Generated identifier payload {}", hex::encode(encode_value(value)));
                self.cached = Some(value);
                value
            }
        };
        encode_value(value)
    }

    /// Discard the cached value
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// Cache an existing value, e.g. one restored from storage
    pub fn adopt(&mut self, value: u32) {
        self.cached = Some(value);
    }

    pub fn cached_value(&self) -> Option<u32> {
        self.cached
    }
}
