/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Message bodies and their byte encoding.
//!
//! A body is either a structured parameter tree or an opaque byte buffer.
//! Parameter trees travel as JSON; raw buffers pass through untouched.

use serde_json::Value;

use crate::message::BrokerError;

/// Payload of a request or reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Structured parameter tree.
    Params(Value),
    /// Opaque bytes, delivered as-is.
    Raw(Vec<u8>),
}

impl Default for Body {
    fn default() -> Self {
        Self::Params(Value::Null)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Params(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl Body {
    /// Encodes the body for [`Transport::post`](crate::traits::Transport::post).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Codec`] if the parameter tree cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        match self {
            Self::Params(value) => Ok(serde_json::to_vec(value)?),
            Self::Raw(bytes) => Ok(bytes.clone()),
        }
    }

    /// Decodes received bytes according to the delivery mode.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Codec`] if `raw` is `false` and the bytes are
    /// not a valid parameter tree.
    pub fn decode(bytes: Vec<u8>, raw: bool) -> Result<Self, BrokerError> {
        if raw {
            return Ok(Self::Raw(bytes));
        }
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self::Params(serde_json::from_slice(&bytes)?))
    }

    /// Body used to carry a rejection reason.
    #[must_use]
    pub fn reason(reason: impl Into<String>) -> Self {
        Self::Params(Value::String(reason.into()))
    }

    /// Best-effort text extraction, used for rejection reasons.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Params(Value::String(s)) => s.clone(),
            Self::Params(other) => other.to_string(),
            Self::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Returns the parameter tree, if this body is one.
    #[must_use]
    pub const fn as_params(&self) -> Option<&Value> {
        match self {
            Self::Params(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Returns the raw buffer, if this body is one.
    #[must_use]
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            Self::Params(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_decode_as_raw_when_requested() {
        let bytes = Body::Params(json!({"a": 1})).encode().unwrap();
        let raw = Body::decode(bytes.clone(), true).unwrap();
        assert_eq!(raw, Body::Raw(bytes));
    }

    #[test]
    fn test_invalid_params_fail_to_decode() {
        let result = Body::decode(b"not json".to_vec(), false);
        assert!(matches!(result, Err(BrokerError::Codec(_))));
    }

    #[test]
    fn test_empty_bytes_decode_to_null_params() {
        assert_eq!(Body::decode(Vec::new(), false).unwrap(), Body::default());
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(Body::reason("no such object").to_text(), "no such object");
        assert_eq!(Body::Raw(b"boom".to_vec()).to_text(), "boom");
    }
}
