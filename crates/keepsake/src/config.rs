//! Engine limits, read from TOML.
//!
//! ```toml
//! max_depth = 400
//! max_pointer_hops = 10
//! keep_propagation_levels = 8
//! unbounded_propagation = false
//! recycle_frames = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_DEPTH: usize = 400;
pub const DEFAULT_MAX_POINTER_HOPS: usize = 10;
pub const DEFAULT_PROPAGATION_LEVELS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pushing beyond this depth is treated as runaway recursion.
    pub max_depth: usize,
    /// Bound on pointer chains and on definition dereferencing.
    pub max_pointer_hops: usize,
    /// Frames searched when mirroring a write into a container's keep.
    pub keep_propagation_levels: usize,
    /// Ignore `keep_propagation_levels` and search the whole stack.
    pub unbounded_propagation: bool,
    /// Reuse freed frame slots.
    pub recycle_frames: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_pointer_hops: DEFAULT_MAX_POINTER_HOPS,
            keep_propagation_levels: DEFAULT_PROPAGATION_LEVELS,
            unbounded_propagation: false,
            recycle_frames: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_depth", self.max_depth),
            ("max_pointer_hops", self.max_pointer_hops),
            ("keep_propagation_levels", self.keep_propagation_levels),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Propagation bound for `put`, `None` when unbounded.
    pub fn propagation_levels(&self) -> Option<usize> {
        if self.unbounded_propagation {
            None
        } else {
            Some(self.keep_propagation_levels)
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_recycling(mut self, recycle_frames: bool) -> Self {
        self.recycle_frames = recycle_frames;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_keys_default() {
        let config = EngineConfig::from_toml_str("max_depth = 50").unwrap();
        assert_eq!(config.max_depth, 50);
        assert_eq!(config.max_pointer_hops, DEFAULT_MAX_POINTER_HOPS);
        assert_eq!(config.propagation_levels(), Some(DEFAULT_PROPAGATION_LEVELS));
        assert!(config.recycle_frames);
    }

    #[test]
    fn unbounded_propagation() {
        let config = EngineConfig::from_toml_str("unbounded_propagation = true").unwrap();
        assert_eq!(config.propagation_levels(), None);
    }

    #[test]
    fn zero_limits_are_rejected() {
        let error = EngineConfig::from_toml_str("max_pointer_hops = 0").unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { key: "max_pointer_hops", .. }));
    }

    #[test]
    fn malformed_toml_is_reported() {
        let error = EngineConfig::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(error, ConfigError::Toml(_)));
    }
}
