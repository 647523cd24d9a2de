//! Global `[ALGORITHM]` defaults, loaded once at process start-up and
//! merged into a control's `rule_config` field-by-field.
//!
//! A small best-effort loader, infallible on a missing file, in the spirit
//! of the env-var bootstrap in `main.rs`.

use std::path::Path;

use serde::Deserialize;

use crate::error::RapoError;
use crate::model::NormalizationType;

#[derive(Debug, Clone, Deserialize)]
struct RawAlgorithmSection {
    fuzzy_optimization: Option<bool>,
    normalization_type: Option<String>,
    discrepancy_matching: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawGlobalConfig {
    #[serde(rename = "ALGORITHM")]
    algorithm: Option<RawAlgorithmSection>,
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub fuzzy_optimization_default: bool,
    pub normalization_type_default: NormalizationType,
    pub discrepancy_matching_default: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            fuzzy_optimization_default: true,
            normalization_type_default: NormalizationType::None,
            discrepancy_matching_default: false,
        }
    }
}

impl GlobalConfig {
    /// Loads `[ALGORITHM]` defaults from a TOML file. A missing file is not
    /// an error — it just yields the built-in defaults. A present-but-
    /// malformed file is `RapoError::ConfigInvalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RapoError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| RapoError::ConfigInvalid(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, RapoError> {
        let raw: RawGlobalConfig =
            toml::from_str(text).map_err(|e| RapoError::ConfigInvalid(e.to_string()))?;
        let mut cfg = Self::default();
        if let Some(algo) = raw.algorithm {
            if let Some(v) = algo.fuzzy_optimization {
                cfg.fuzzy_optimization_default = v;
            }
            if let Some(v) = algo.discrepancy_matching {
                cfg.discrepancy_matching_default = v;
            }
            if let Some(v) = algo.normalization_type {
                cfg.normalization_type_default = NormalizationType::parse(&v).ok_or_else(|| {
                    RapoError::ConfigInvalid(format!("unknown normalization_type '{}'", v))
                })?;
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = GlobalConfig::load("/nonexistent/path/rapo.toml").unwrap();
        assert!(cfg.fuzzy_optimization_default);
    }

    #[test]
    fn overrides_apply() {
        let cfg = GlobalConfig::parse(
            r#"
            [ALGORITHM]
            fuzzy_optimization = false
            normalization_type = "z_norm"
            "#,
        )
        .unwrap();
        assert!(!cfg.fuzzy_optimization_default);
        assert_eq!(cfg.normalization_type_default, NormalizationType::ZNorm);
    }

    #[test]
    fn unknown_normalization_is_config_invalid() {
        let err = GlobalConfig::parse("[ALGORITHM]\nnormalization_type = \"bogus\"\n").unwrap_err();
        assert!(matches!(err, RapoError::ConfigInvalid(_)));
    }
}
