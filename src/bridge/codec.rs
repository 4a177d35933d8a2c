use serde_json::error::Category;
use thiserror::Error;

use crate::db::Reading;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not well-formed JSON: {0}")]
    Malformed(serde_json::Error),
    #[error("payload does not describe a reading: {0}")]
    Invalid(serde_json::Error),
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("timestamp is empty")]
    EmptyTimestamp,
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Data => DecodeError::Invalid(err),
            Category::Io | Category::Syntax | Category::Eof => DecodeError::Malformed(err),
        }
    }
}

/// Decodes one transport payload and checks the reading invariants.
pub fn decode_payload(payload: &[u8]) -> Result<Reading, DecodeError> {
    let reading: Reading = serde_json::from_slice(payload)?;

    if reading.timestamp.trim().is_empty() {
        return Err(DecodeError::EmptyTimestamp);
    }
    if let Some(field) = reading.non_finite_field() {
        return Err(DecodeError::NonFinite(field));
    }

    Ok(reading)
}
