//! Feature identity and state values.
//!
//! A [`FeatureState`] is immutable once built: every write produces a new
//! value that fully replaces the previous one for the same [`FeatureKey`].

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier of a feature.
///
/// The string form is also the partition key on the log, so every write for
/// one feature lands on the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey(String);

impl FeatureKey {
    /// Creates a feature key.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the bytes used to route this feature to a partition.
    #[must_use]
    pub fn partition_key(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FeatureKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FeatureKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FeatureKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FeatureKey {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Enabled flag plus optional activation strategy for one feature.
///
/// A state with no strategy is a plain on/off switch. Parameter order is
/// irrelevant; two states compare equal when all fields match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureState {
    key: FeatureKey,
    enabled: bool,
    strategy_id: Option<String>,
    parameters: BTreeMap<String, String>,
}

impl FeatureState {
    /// Creates a disabled state with no activation strategy.
    #[must_use]
    pub fn new(key: impl Into<FeatureKey>) -> Self {
        Self {
            key: key.into(),
            enabled: false,
            strategy_id: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Returns a copy with the enabled flag set.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Returns a copy with the activation strategy set.
    #[must_use]
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// Returns a copy with one strategy parameter set.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Returns a copy with all strategy parameters replaced.
    #[must_use]
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    /// The feature this state belongs to.
    #[must_use]
    pub fn key(&self) -> &FeatureKey {
        &self.key
    }

    /// Whether the feature is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The activation strategy id, if any.
    #[must_use]
    pub fn strategy_id(&self) -> Option<&str> {
        self.strategy_id.as_deref()
    }

    /// A single strategy parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// All strategy parameters.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_disabled() {
        let state = FeatureState::new("FEATURE_A");
        assert_eq!(state.key().as_str(), "FEATURE_A");
        assert!(!state.is_enabled());
        assert!(state.strategy_id().is_none());
        assert!(state.parameters().is_empty());
    }

    #[test]
    fn test_with_strategy_and_parameters() {
        let state = FeatureState::new("FEATURE_A")
            .with_enabled(true)
            .with_strategy("username")
            .with_parameter("users", "user1, user2, user3");

        assert!(state.is_enabled());
        assert_eq!(state.strategy_id(), Some("username"));
        assert_eq!(state.parameter("users"), Some("user1, user2, user3"));
        assert_eq!(state.parameter("missing"), None);
    }

    #[test]
    fn test_parameter_order_irrelevant() {
        let a = FeatureState::new("F")
            .with_parameter("x", "1")
            .with_parameter("y", "2");
        let b = FeatureState::new("F")
            .with_parameter("y", "2")
            .with_parameter("x", "1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_borrows_as_str() {
        let mut map = std::collections::HashMap::new();
        map.insert(FeatureKey::new("FEATURE_B"), 1);
        assert_eq!(map.get("FEATURE_B"), Some(&1));
        assert_eq!(FeatureKey::from("FEATURE_B").partition_key(), b"FEATURE_B");
    }
}
