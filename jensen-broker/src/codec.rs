//! Turning text into JSON and responses back into text.
//!
//! The broker only ever talks to the JSON engine through [`Codec`], so hosts with particular
//! encoding needs can swap it out.  [`JsonCodec`] is the `serde_json` implementation used by
//! default.
use crate::types::{JsonValue, Response};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed JSON")]
    Decode { source: serde_json::Error },

    #[error("Request is not valid UTF-8")]
    Utf8 { source: std::str::Utf8Error },

    #[error("Error serializing response to JSON")]
    Encode { source: serde_json::Error },

    #[error("{message}")]
    Custom { message: String },
}

pub trait Codec: Send + Sync + 'static {
    /// Decode raw request text into a JSON value.
    fn decode(&self, text: &str) -> Result<JsonValue, CodecError>;

    /// Encode a response, optionally pretty-printed for human readers.
    fn encode(&self, response: &Response, pretty: bool) -> Result<String, CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, text: &str) -> Result<JsonValue, CodecError> {
        serde_json::from_str(text).map_err(|source| CodecError::Decode { source })
    }

    fn encode(&self, response: &Response, pretty: bool) -> Result<String, CodecError> {
        if pretty {
            serde_json::to_string_pretty(response)
        } else {
            serde_json::to_string(response)
        }
        .map_err(|source| CodecError::Encode { source })
    }
}
