//! Configuration file parser
//!
//! Parses Redis-style `key value` configuration files into a [`VMConfig`].

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use super::VMConfig;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid line format
    #[error("Invalid line format at line {0}: {1}")]
    Format(usize, String),

    /// Invalid parameter value
    #[error("Invalid value for parameter '{0}' at line {1}: {2}")]
    Value(String, usize, String),

    /// Unknown parameter
    #[error("Unknown parameter '{0}' at line {1}")]
    UnknownParam(String, usize),
}

/// Parse a configuration file
pub fn parse_config_file(path: &Path) -> Result<VMConfig, ConfigParseError> {
    let file = File::open(path).map_err(ConfigParseError::Io)?;
    parse_lines(BufReader::new(file))
}

/// Parse configuration text
pub fn parse_config_str(text: &str) -> Result<VMConfig, ConfigParseError> {
    parse_lines(text.as_bytes())
}

fn parse_lines(reader: impl BufRead) -> Result<VMConfig, ConfigParseError> {
    let mut config = VMConfig::default();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.splitn(2, char::is_whitespace).collect();
        if parts.len() != 2 {
            return Err(ConfigParseError::Format(line_num + 1, line.to_string()));
        }

        let param = parts[0].trim().to_lowercase();
        let value = parts[1].trim();
        apply_config_param(&mut config, &param, value, line_num + 1)?;
    }

    Ok(config)
}

/// Apply a configuration parameter to the config
fn apply_config_param(config: &mut VMConfig, param: &str, value: &str, line_num: usize) -> Result<(), ConfigParseError> {
    match param {
        "chunk-name" => {
            config.chunk_name = value.trim_matches('"').to_string();
        }
        "debug" => {
            config.debug = parse_yes_no(param, value, line_num)?;
        }
        "stdlib" => {
            config.open_stdlib = parse_yes_no(param, value, line_num)?;
        }
        "call-depth-limit" => {
            let limit: usize = parse_value(param, value, line_num)?;
            if limit == 0 {
                return Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string()));
            }
            config.limits.call_depth_limit = limit;
        }
        "timeout-ms" => {
            let millis: u64 = parse_value(param, value, line_num)?;
            config.limits.timeout = if millis == 0 {
                None
            } else {
                Some(Duration::from_millis(millis))
            };
        }
        _ => return Err(ConfigParseError::UnknownParam(param.to_string(), line_num)),
    }

    Ok(())
}

/// Parse a value that implements FromStr
fn parse_value<T: FromStr>(param: &str, value: &str, line_num: usize) -> Result<T, ConfigParseError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigParseError::Value(param.to_string(), line_num, value.to_string()))
}

/// Parse a yes/no value
fn parse_yes_no(param: &str, value: &str, line_num: usize) -> Result<bool, ConfigParseError> {
    match value.to_lowercase().as_str() {
        "yes" | "1" => Ok(true),
        "no" | "0" => Ok(false),
        _ => Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_basic_config() {
        let config_content = r#"
# Script engine settings
chunk-name "scripts/job.lua"
debug yes
stdlib no

# Limits
call-depth-limit 64
timeout-ms 250
"#;

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();
        write(path, config_content).unwrap();

        let config = parse_config_file(path).unwrap();

        assert_eq!(config.chunk_name, "scripts/job.lua");
        assert!(config.debug);
        assert!(!config.open_stdlib);
        assert_eq!(config.limits.call_depth_limit, 64);
        assert_eq!(config.limits.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let config = parse_config_str("timeout-ms 0").unwrap();
        assert!(config.limits.timeout.is_none());
    }

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("test", "yes", 1).unwrap(), true);
        assert_eq!(parse_yes_no("test", "no", 1).unwrap(), false);
        assert_eq!(parse_yes_no("test", "1", 1).unwrap(), true);
        assert_eq!(parse_yes_no("test", "0", 1).unwrap(), false);
        assert!(parse_yes_no("test", "invalid", 1).is_err());
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse_config_str("debug yes\nverbosity 3").unwrap_err();
        assert!(matches!(err, ConfigParseError::UnknownParam(ref p, 2) if p == "verbosity"));

        let err = parse_config_str("\n\ncall-depth-limit lots").unwrap_err();
        assert!(matches!(err, ConfigParseError::Value(_, 3, _)));

        let err = parse_config_str("stdlib").unwrap_err();
        assert!(matches!(err, ConfigParseError::Format(1, _)));
    }

    #[test]
    fn test_missing_file() {
        let err = parse_config_file(Path::new("/nonexistent/ferrous-lua.conf")).unwrap_err();
        assert!(matches!(err, ConfigParseError::Io(_)));
    }
}
