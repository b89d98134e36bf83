//! Session data codecs
//!
//! Persistent stores hold session data as bytes. The codec decides the byte
//! format; stores never look inside.

use crate::error::CodecError;
use crate::session::SessionData;

/// Converts session data to and from its stored representation
pub trait Codec: Send + Sync + 'static {
    /// Encode session data to bytes
    fn encode(&self, data: &SessionData) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes produced by [`Codec::encode`].
    ///
    /// Malformed input must be an error, never an empty map.
    fn decode(&self, bytes: &[u8]) -> Result<SessionData, CodecError>;
}

/// JSON codec, the default for every store
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, data: &SessionData) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(data)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<SessionData, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
