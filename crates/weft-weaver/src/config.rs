//! Weaver configuration (`[weaving]` table of weft.toml)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding [`WeaverConfig::verify`]
pub const VERIFY_ENV: &str = "WEFT_WEAVING_VERIFY";

/// Weaver settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeaverConfig {
    /// Verify original and woven units after each rewrite, logging failures
    pub verify: bool,

    /// Move timed method bodies into named wrapper methods, and run the
    /// weaver itself through a marker function
    pub timer_wrapper_methods: bool,

    /// Add mixin interfaces to matching interfaces, not only to classes
    pub weave_interfaces_for_mixins: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    weaving: WeaverConfig,
}

impl WeaverConfig {
    /// Parse the `[weaving]` table from TOML text; other tables are ignored
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.weaving)
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Apply environment overrides from the process environment
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_value(std::env::var(VERIFY_ENV).ok().as_deref())
    }

    /// Apply an explicit value of [`VERIFY_ENV`]
    pub fn with_env_value(mut self, verify: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(value) = verify {
            self.verify = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: VERIFY_ENV,
                        value: value.to_string(),
                    })
                }
            };
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WeaverConfig::from_str("").unwrap();
        assert_eq!(config, WeaverConfig::default());
        assert!(!config.verify);
    }

    #[test]
    fn test_parse_weaving_table() {
        let toml = r#"
[catalog]
path = "rules.json"

[weaving]
verify = true
timer_wrapper_methods = true
"#;
        let config = WeaverConfig::from_str(toml).unwrap();
        assert!(config.verify);
        assert!(config.timer_wrapper_methods);
        assert!(!config.weave_interfaces_for_mixins);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = WeaverConfig::from_str("[weaving]\nverfy = true\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_override() {
        let config = WeaverConfig::default().with_env_value(Some("true")).unwrap();
        assert!(config.verify);
        let config = config.with_env_value(Some("0")).unwrap();
        assert!(!config.verify);
        let config = config.with_env_value(None).unwrap();
        assert!(!config.verify);
        assert!(matches!(
            WeaverConfig::default().with_env_value(Some("maybe")),
            Err(ConfigError::InvalidEnv { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(&path, "[weaving]\nweave_interfaces_for_mixins = true\n").unwrap();
        let config = WeaverConfig::from_file(&path).unwrap();
        assert!(config.weave_interfaces_for_mixins);
    }
}
