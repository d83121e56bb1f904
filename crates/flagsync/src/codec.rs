//! Encoding of feature states to log payloads.
//!
//! [`StateCodec`] converts a [`FeatureState`] to and from the bytes carried
//! by a log record. [`JsonCodec`] is the default wire format:
//!
//! ```json
//! {"feature":"FEATURE_A","enabled":true,"strategyId":"username","parameters":{"users":"u1"}}
//! ```
//!
//! `strategyId` is omitted when no strategy is set and `parameters` defaults
//! to an empty object when absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::state::FeatureState;

/// Converts feature states to and from log payloads.
pub trait StateCodec: Send + Sync {
    /// Returns the codec name, used in log output.
    fn name(&self) -> &'static str;

    /// Encodes a state, including its key, into a payload.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the state cannot be encoded.
    fn encode(&self, state: &FeatureState) -> Result<Vec<u8>, CodecError>;

    /// Decodes a payload into a state.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> Result<FeatureState, CodecError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireState {
    feature: String,
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    strategy_id: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates a new JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StateCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, state: &FeatureState) -> Result<Vec<u8>, CodecError> {
        let wire = WireState {
            feature: state.key().as_str().to_string(),
            enabled: state.is_enabled(),
            strategy_id: state.strategy_id().map(String::from),
            parameters: state.parameters().clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<FeatureState, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::MalformedInput("empty payload".into()));
        }
        let wire: WireState = serde_json::from_slice(payload)?;
        if wire.feature.trim().is_empty() {
            return Err(CodecError::MissingField("feature".into()));
        }

        let mut state = FeatureState::new(wire.feature)
            .with_enabled(wire.enabled)
            .with_parameters(wire.parameters);
        if let Some(strategy) = wire.strategy_id {
            state = state.with_strategy(strategy);
        }
        Ok(state)
    }
}
