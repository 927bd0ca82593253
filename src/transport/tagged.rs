//! Discriminator-driven JSON codec for closed message families.
//!
//! A family is a serde enum with `#[serde(tag = "type")]`. Serde alone reports
//! every decoding problem as one opaque error; [`TaggedUnion::decode`] checks
//! the discriminator first so callers can tell a missing tag, an unknown
//! variant and bad variant fields apart.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Why a JSON value could not be decoded into a message family.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no `{0}` field")]
    MissingDiscriminator(&'static str),

    #[error("unknown message type `{0}`")]
    UnknownVariant(String),

    #[error("invalid fields for message type `{variant}`: {source}")]
    MalformedFields {
        variant: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A closed set of message variants selected by a string discriminator.
pub trait TaggedUnion: Serialize + DeserializeOwned {
    /// Discriminator field name. Must match the enum's `#[serde(tag)]`.
    const TAG: &'static str = "type";

    /// Every discriminator value the family accepts.
    const VARIANTS: &'static [&'static str];

    /// Canonical discriminator value of this message.
    fn variant(&self) -> &'static str;

    /// Serialize into a JSON object carrying the discriminator.
    fn encode(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Decode a JSON object into exactly one variant, or fail without
    /// producing a partial value.
    fn decode(value: Value) -> Result<Self, DecodeError> {
        let Value::Object(fields) = &value else {
            return Err(DecodeError::NotAnObject);
        };

        let variant = match fields.get(Self::TAG) {
            None => return Err(DecodeError::MissingDiscriminator(Self::TAG)),
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(DecodeError::UnknownVariant(other.to_string())),
        };

        if !Self::VARIANTS.contains(&variant.as_str()) {
            return Err(DecodeError::UnknownVariant(variant));
        }

        serde_json::from_value(value)
            .map_err(|source| DecodeError::MalformedFields { variant, source })
    }
}
