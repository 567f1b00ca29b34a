//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `CC_*`
//! environment variables, and merging them with proper precedence rules.

use crate::error::CertCheckError;
use crate::types::MAX_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Default values for probe settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Where the result files go
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Default probe settings that map to CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DefaultsConfig {
    /// Default concurrency limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Default client timeout (as string, e.g., "5s", "2m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Default port to probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Result file locations.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// File receiving domains with a valid certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_file: Option<String>,

    /// File receiving every other domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_file: Option<String>,
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load and validate configuration from a specific file.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, CertCheckError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CertCheckError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            CertCheckError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config is lowest, then the home directory, then the current
    /// directory. Files that fail to load are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, CertCheckError> {
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        if self.verbose {
            for path in &loaded_files {
                debug!(path = %path.display(), "Loaded config file");
            }
        }

        Ok(merged_config)
    }

    /// Looks for configuration files in the current directory.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./cert-check.toml", "./.cert-check.toml"]
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
    }

    /// Looks for configuration files in the user's home directory.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".cert-check.toml", "cert-check.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|p| p.exists())
    }

    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("cert-check").join("config.toml");
        path.exists().then_some(path)
    }

    /// Merge two configurations; values from `higher` win.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower_defaults), Some(higher_defaults)) => Some(DefaultsConfig {
                    concurrency: higher_defaults.concurrency.or(lower_defaults.concurrency),
                    timeout: higher_defaults.timeout.or(lower_defaults.timeout),
                    port: higher_defaults.port.or(lower_defaults.port),
                }),
                (lower_defaults, higher_defaults) => higher_defaults.or(lower_defaults),
            },
            output: match (lower.output, higher.output) {
                (Some(lower_output), Some(higher_output)) => Some(OutputConfig {
                    valid_file: higher_output.valid_file.or(lower_output.valid_file),
                    invalid_file: higher_output.invalid_file.or(lower_output.invalid_file),
                }),
                (lower_output, higher_output) => higher_output.or(lower_output),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), CertCheckError> {
        if let Some(defaults) = &config.defaults {
            if let Some(concurrency) = defaults.concurrency {
                validate_concurrency(concurrency)?;
            }

            if let Some(timeout_str) = &defaults.timeout {
                if !matches!(parse_timeout_string(timeout_str), Some(secs) if secs > 0) {
                    return Err(CertCheckError::config(format!(
                        "Invalid timeout format '{}'. Use format like '5s', '30s', '2m'",
                        timeout_str
                    )));
                }
            }

            if defaults.port == Some(0) {
                return Err(CertCheckError::config("Port must be between 1 and 65535"));
            }
        }

        if let Some(output) = &config.output {
            for (key, value) in [
                ("valid_file", &output.valid_file),
                ("invalid_file", &output.invalid_file),
            ] {
                if matches!(value, Some(name) if name.trim().is_empty()) {
                    return Err(CertCheckError::config(format!(
                        "Output setting '{}' cannot be empty",
                        key
                    )));
                }
            }

            if output.valid_file.is_some() && output.valid_file == output.invalid_file {
                return Err(CertCheckError::config(
                    "valid_file and invalid_file must be different files",
                ));
            }
        }

        Ok(())
    }
}

/// Check a concurrency limit: any positive value the limiter can hold.
pub fn validate_concurrency(concurrency: usize) -> Result<(), CertCheckError> {
    if concurrency == 0 {
        return Err(CertCheckError::config("Concurrency must be at least 1"));
    }
    if concurrency > MAX_CONCURRENCY {
        return Err(CertCheckError::config(format!(
            "Concurrency cannot exceed {}",
            MAX_CONCURRENCY
        )));
    }
    Ok(())
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via CC_* environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub concurrency: Option<usize>,
    pub timeout: Option<String>,
    pub port: Option<u16>,
    pub valid_file: Option<String>,
    pub invalid_file: Option<String>,
    pub config: Option<String>,
}

/// Load configuration from the process environment.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    env_config_from(|key| env::var(key).ok())
}

/// Build an [`EnvConfig`] from any variable lookup.
pub fn env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_config = EnvConfig::default();

    // CC_CONCURRENCY - concurrent probes
    if let Some(val) = lookup("CC_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(concurrency) if validate_concurrency(concurrency).is_ok() => {
                debug!(concurrency, "Using CC_CONCURRENCY");
                env_config.concurrency = Some(concurrency);
            }
            _ => warn!(
                value = %val,
                "Invalid CC_CONCURRENCY, must be a positive integer"
            ),
        }
    }

    // CC_TIMEOUT - per-probe client timeout
    if let Some(timeout_str) = lookup("CC_TIMEOUT") {
        if matches!(parse_timeout_string(&timeout_str), Some(secs) if secs > 0) {
            debug!(timeout = %timeout_str, "Using CC_TIMEOUT");
            env_config.timeout = Some(timeout_str);
        } else {
            warn!(value = %timeout_str, "Invalid CC_TIMEOUT, use format like '5s', '30s', '2m'");
        }
    }

    // CC_PORT - port to probe
    if let Some(val) = lookup("CC_PORT") {
        match val.trim().parse::<u16>() {
            Ok(port) if port > 0 => {
                debug!(port, "Using CC_PORT");
                env_config.port = Some(port);
            }
            _ => warn!(value = %val, "Invalid CC_PORT, must be 1-65535"),
        }
    }

    // CC_VALID_FILE / CC_INVALID_FILE - result file paths
    env_config.valid_file = non_empty(lookup("CC_VALID_FILE"));
    env_config.invalid_file = non_empty(lookup("CC_INVALID_FILE"));

    // CC_CONFIG - explicit config file
    env_config.config = non_empty(lookup("CC_CONFIG"));

    env_config
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a timeout string like "5s", "30s", "2m" into seconds.
///
/// A bare number is taken as seconds. Returns `None` if parsing fails.
pub fn parse_timeout_string(timeout_str: &str) -> Option<u64> {
    let timeout_str = timeout_str.trim().to_lowercase();

    if let Some(secs) = timeout_str.strip_suffix('s') {
        secs.parse::<u64>().ok()
    } else if let Some(mins) = timeout_str.strip_suffix('m') {
        mins.parse::<u64>().ok().and_then(|m| m.checked_mul(60))
    } else {
        timeout_str.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_parse_timeout_string() {
        assert_eq!(parse_timeout_string("5s"), Some(5));
        assert_eq!(parse_timeout_string("30s"), Some(30));
        assert_eq!(parse_timeout_string("2m"), Some(120));
        assert_eq!(parse_timeout_string("5"), Some(5));
        assert_eq!(parse_timeout_string(" 10S "), Some(10));
        assert_eq!(parse_timeout_string("invalid"), None);
        assert_eq!(parse_timeout_string("s"), None);
    }

    #[test]
    fn test_load_valid_config() {
        let temp_file = write_config(
            r#"
[defaults]
concurrency = 25
timeout = "30s"
port = 8443

[output]
valid_file = "ok.txt"
invalid_file = "bad.txt"
"#,
        );

        let manager = ConfigManager::new(false);
        let config = manager.load_file(temp_file.path()).unwrap();

        let defaults = config.defaults.unwrap();
        assert_eq!(defaults.concurrency, Some(25));
        assert_eq!(defaults.timeout, Some("30s".to_string()));
        assert_eq!(defaults.port, Some(8443));

        let output = config.output.unwrap();
        assert_eq!(output.valid_file, Some("ok.txt".to_string()));
        assert_eq!(output.invalid_file, Some("bad.txt".to_string()));
    }

    #[test]
    fn test_invalid_concurrency() {
        let manager = ConfigManager::new(false);

        let zero = write_config("[defaults]\nconcurrency = 0\n");
        assert!(manager.load_file(zero.path()).is_err());

        let above_max = write_config(&format!(
            "[defaults]\nconcurrency = {}\n",
            MAX_CONCURRENCY as u64 + 1
        ));
        assert!(manager.load_file(above_max.path()).is_err());
    }

    #[test]
    fn test_large_concurrency_accepted() {
        let manager = ConfigManager::new(false);
        let config = write_config("[defaults]\nconcurrency = 5000\n");
        let loaded = manager.load_file(config.path()).unwrap();
        assert_eq!(loaded.defaults.unwrap().concurrency, Some(5000));

        assert!(validate_concurrency(1).is_ok());
        assert!(validate_concurrency(1001).is_ok());
        assert!(validate_concurrency(0).is_err());
    }

    #[test]
    fn test_invalid_timeout_and_port() {
        let manager = ConfigManager::new(false);

        let timeout = write_config("[defaults]\ntimeout = \"soon\"\n");
        assert!(manager.load_file(timeout.path()).is_err());

        let zero_timeout = write_config("[defaults]\ntimeout = \"0s\"\n");
        assert!(manager.load_file(zero_timeout.path()).is_err());

        let port = write_config("[defaults]\nport = 0\n");
        assert!(manager.load_file(port.path()).is_err());
    }

    #[test]
    fn test_output_files_must_differ() {
        let manager = ConfigManager::new(false);
        let same = write_config("[output]\nvalid_file = \"out\"\ninvalid_file = \"out\"\n");
        assert!(manager.load_file(same.path()).is_err());

        let empty = write_config("[output]\nvalid_file = \"  \"\n");
        assert!(manager.load_file(empty.path()).is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let manager = ConfigManager::new(false);
        let broken = write_config("[defaults\nconcurrency = ");
        let err = manager.load_file(broken.path()).unwrap_err();
        assert!(matches!(err, CertCheckError::ConfigError { .. }));
    }

    #[test]
    fn test_missing_file_is_file_error() {
        let manager = ConfigManager::new(false);
        let err = manager
            .load_file("/definitely/not/here/cert-check.toml")
            .unwrap_err();
        assert!(matches!(err, CertCheckError::FileError { .. }));
    }

    #[test]
    fn test_merge_configs() {
        let manager = ConfigManager::new(false);

        let lower = FileConfig {
            defaults: Some(DefaultsConfig {
                concurrency: Some(10),
                timeout: Some("60s".to_string()),
                port: None,
            }),
            output: Some(OutputConfig {
                valid_file: Some("valid.txt".to_string()),
                invalid_file: Some("invalid.txt".to_string()),
            }),
        };

        let higher = FileConfig {
            defaults: Some(DefaultsConfig {
                concurrency: Some(25),
                port: Some(8443),
                ..Default::default()
            }),
            output: Some(OutputConfig {
                invalid_file: Some("broken.txt".to_string()),
                ..Default::default()
            }),
        };

        let merged = manager.merge_configs(lower, higher);
        let defaults = merged.defaults.unwrap();
        assert_eq!(defaults.concurrency, Some(25)); // Higher wins
        assert_eq!(defaults.timeout, Some("60s".to_string())); // Lower preserved
        assert_eq!(defaults.port, Some(8443));

        let output = merged.output.unwrap();
        assert_eq!(output.valid_file, Some("valid.txt".to_string()));
        assert_eq!(output.invalid_file, Some("broken.txt".to_string()));
    }

    #[test]
    fn test_merge_with_missing_sections() {
        let manager = ConfigManager::new(false);
        let lower = FileConfig {
            output: Some(OutputConfig {
                valid_file: Some("v".to_string()),
                invalid_file: None,
            }),
            ..Default::default()
        };

        let merged = manager.merge_configs(lower.clone(), FileConfig::default());
        assert_eq!(merged, lower);
    }

    #[test]
    fn test_env_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CC_CONCURRENCY", "12"),
            ("CC_TIMEOUT", "45s"),
            ("CC_PORT", "8443"),
            ("CC_VALID_FILE", "good.txt"),
            ("CC_INVALID_FILE", ""),
        ]
        .into_iter()
        .collect();

        let env_config = env_config_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(env_config.concurrency, Some(12));
        assert_eq!(env_config.timeout, Some("45s".to_string()));
        assert_eq!(env_config.port, Some(8443));
        assert_eq!(env_config.valid_file, Some("good.txt".to_string()));
        assert_eq!(env_config.invalid_file, None);
        assert_eq!(env_config.config, None);
    }

    #[test]
    fn test_env_config_ignores_invalid_values() {
        let vars: HashMap<&str, &str> = [
            ("CC_CONCURRENCY", "0"),
            ("CC_TIMEOUT", "whenever"),
            ("CC_PORT", "99999"),
        ]
        .into_iter()
        .collect();

        let env_config = env_config_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(env_config, EnvConfig::default());
    }
}
