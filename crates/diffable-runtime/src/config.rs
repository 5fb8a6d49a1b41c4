#![forbid(unsafe_code)]

//! Controller configuration.
//!
//! [`ControllerConfig`] holds the tunables of an [`ApplyController`]: the
//! default animation flag and the policy that decides when an edit script is
//! forwarded as a full reload instead. With the `controller-config` feature
//! it can be loaded from TOML or JSON.
//!
//! ```toml
//! # diffable.toml
//! animate_by_default = false
//! full_reload_threshold = 500
//! full_reload_ratio = 0.5
//! ```
//!
//! ```rust,ignore
//! let config = ControllerConfig::from_toml_file("diffable.toml")?.with_env_overrides();
//! ```
//!
//! [`ApplyController`]: crate::ApplyController

#[cfg(feature = "controller-config")]
use std::path::Path;

#[cfg(feature = "controller-config")]
use serde::{Deserialize, Serialize};

/// Environment variable that forces every apply into a full reload.
pub const FULL_RELOAD_ENV: &str = "DIFFABLE_FULL_RELOAD";

/// Tunables for an apply controller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "controller-config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "controller-config", serde(default))]
pub struct ControllerConfig {
    /// Animation flag for requests that leave
    /// [`ApplyOptions::animated`](crate::ApplyOptions::animated) unset.
    pub animate_by_default: bool,

    /// Forward as a full reload when the edit script has more than this many
    /// changes.
    pub full_reload_threshold: Option<usize>,

    /// Forward as a full reload when changes exceed this fraction of the
    /// larger of the old and new item counts. Must be in `(0, 1]`.
    pub full_reload_ratio: Option<f64>,

    /// Skip the diff entirely and always forward a full reload.
    /// Env: `DIFFABLE_FULL_RELOAD=1`
    pub force_full_reload: bool,

    /// Buffered notices per subscriber before slow receivers start lagging.
    pub notice_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            animate_by_default: true,
            full_reload_threshold: None,
            full_reload_ratio: None,
            force_full_reload: false,
            notice_capacity: 64,
        }
    }
}

impl ControllerConfig {
    /// Load from a TOML string.
    #[cfg(feature = "controller-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validated()
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "controller-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "controller-config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validated()
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "controller-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    #[cfg(feature = "controller-config")]
    fn validated(self) -> Result<Self, ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(problems))
        }
    }

    /// Validate all parameters are within acceptable ranges.
    ///
    /// Returns a list of validation errors. An empty list means the config
    /// is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.full_reload_threshold == Some(0) {
            errors.push("full_reload_threshold must be > 0 (use None to disable)".into());
        }
        if let Some(ratio) = self.full_reload_ratio
            && !(ratio > 0.0 && ratio <= 1.0)
        {
            errors.push(format!("full_reload_ratio must be in (0, 1], got {ratio}"));
        }
        if self.notice_capacity == 0 {
            errors.push("notice_capacity must be > 0".into());
        }
        errors
    }

    /// Apply overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var(FULL_RELOAD_ENV).is_ok_and(|v| is_truthy(&v)) {
            self.force_full_reload = true;
        }
        self
    }

    /// Whether an edit script of `changes` operations over snapshots holding
    /// at most `items` items should be forwarded as a full reload.
    #[must_use]
    pub fn prefers_full_reload(&self, changes: usize, items: usize) -> bool {
        if self.force_full_reload {
            return true;
        }
        if self.full_reload_threshold.is_some_and(|limit| changes > limit) {
            return true;
        }
        match self.full_reload_ratio {
            Some(ratio) if items > 0 => changes as f64 / items as f64 > ratio,
            _ => false,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Errors that can occur when loading a controller configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "controller-config")]
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "controller-config")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_validates_clean() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_empty());
        assert!(config.animate_by_default);
        assert!(!config.prefers_full_reload(10_000, 10));
    }

    #[test]
    fn validate_collects_every_problem() {
        let config = ControllerConfig {
            full_reload_threshold: Some(0),
            full_reload_ratio: Some(1.5),
            notice_capacity: 0,
            ..Default::default()
        };
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors[1].contains("1.5"));
    }

    #[test]
    fn nan_ratio_is_rejected() {
        let config = ControllerConfig {
            full_reload_ratio: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn threshold_is_exclusive() {
        let config = ControllerConfig {
            full_reload_threshold: Some(5),
            ..Default::default()
        };
        assert!(!config.prefers_full_reload(5, 100));
        assert!(config.prefers_full_reload(6, 100));
    }

    #[test]
    fn ratio_ignores_empty_snapshots() {
        let config = ControllerConfig {
            full_reload_ratio: Some(0.5),
            ..Default::default()
        };
        assert!(!config.prefers_full_reload(3, 0));
        assert!(!config.prefers_full_reload(5, 10));
        assert!(config.prefers_full_reload(6, 10));
    }

    #[test]
    fn force_overrides_everything() {
        let config = ControllerConfig {
            force_full_reload: true,
            ..Default::default()
        };
        assert!(config.prefers_full_reload(0, 0));
    }

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", "True"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["", "0", "no", "off"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn validation_error_lists_problems() {
        let err = ConfigError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "invalid configuration: a; b");
    }
}
