//! Configuration module for ferrous-lua
//!
//! Provides the VM configuration, loadable from a Redis-style
//! `key value` configuration file.

mod parser;

pub use parser::{parse_config_file, parse_config_str, ConfigParseError};

use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for a [`LuaVM`](crate::lua::LuaVM)
#[derive(Debug, Clone)]
pub struct VMConfig {
    /// Chunk name used by `eval` in error positions
    pub chunk_name: String,

    /// Log the full report, traceback included, of each failed chunk
    pub debug: bool,

    /// Open the standard libraries when the VM is created
    pub open_stdlib: bool,

    /// Resource limits
    pub limits: LuaLimits,
}

/// Resource limits for script execution
#[derive(Debug, Clone)]
pub struct LuaLimits {
    /// Maximum nesting of function calls
    pub call_depth_limit: usize,

    /// Wall-clock budget for one top-level execution (None = unlimited)
    pub timeout: Option<Duration>,
}

impl Default for VMConfig {
    fn default() -> Self {
        VMConfig {
            chunk_name: "main".to_string(),
            debug: false,
            open_stdlib: true,
            limits: LuaLimits::default(),
        }
    }
}

impl Default for LuaLimits {
    fn default() -> Self {
        LuaLimits {
            call_depth_limit: 200,
            timeout: None,
        }
    }
}

impl VMConfig {
    /// Load configuration from a file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigParseError> {
        let path = path.into();
        parse_config_file(&path)
    }

    /// Get a configuration parameter by name
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "chunk-name" => Some(self.chunk_name.clone()),
            "debug" => Some(yes_no(self.debug)),
            "stdlib" => Some(yes_no(self.open_stdlib)),
            "call-depth-limit" => Some(self.limits.call_depth_limit.to_string()),
            "timeout-ms" => Some(self.timeout_millis().to_string()),
            _ => None,
        }
    }

    /// Get all configuration parameters
    pub fn get_all(&self) -> Vec<(String, String)> {
        ["chunk-name", "debug", "stdlib", "call-depth-limit", "timeout-ms"]
            .iter()
            .filter_map(|param| self.get(param).map(|value| (param.to_string(), value)))
            .collect()
    }

    fn timeout_millis(&self) -> u128 {
        self.limits.timeout.map_or(0, |timeout| timeout.as_millis())
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VMConfig::default();
        assert_eq!(config.chunk_name, "main");
        assert!(config.open_stdlib);
        assert!(!config.debug);
        assert_eq!(config.limits.call_depth_limit, 200);
        assert!(config.limits.timeout.is_none());
    }

    #[test]
    fn test_get_parameters() {
        let mut config = VMConfig::default();
        config.limits.timeout = Some(Duration::from_millis(1500));
        assert_eq!(config.get("timeout-ms").as_deref(), Some("1500"));
        assert_eq!(config.get("stdlib").as_deref(), Some("yes"));
        assert_eq!(config.get("nope"), None);
        assert_eq!(config.get_all().len(), 5);
    }
}
