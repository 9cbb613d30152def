//! Configuration module for rtxconf
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - User configuration (~/.config/rtxconf/config.toml)
//! - Project configuration (./rtxconf.toml)
//! - Environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::telemetry::config::{LogFormat, LogLevel, LoggingConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command catalog settings
    pub catalog: CatalogConfig,

    /// Line reconstruction settings
    pub preprocessor: PreprocessorConfig,

    /// Rule numbering defaults
    pub sequence: SequenceConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Command catalog settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// YAML catalog replacing the built-in one
    pub path: Option<PathBuf>,
}

/// Line reconstruction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    /// First words of device commands the catalog does not model.
    ///
    /// An indented line starting with one of these (or with any catalog
    /// command word) is a command of its own, never a wrapped continuation.
    pub extra_command_heads: Vec<String>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        let heads = [
            "administrator", "auth", "bgp", "bridge", "ccp", "console", "dhcp", "dns",
            "ethernet", "httpd", "ip", "ipcp", "ipsec", "ipv6", "l2tp", "lan", "lcp", "login",
            "mtu", "nat", "netvolante-dns", "ntp", "ospf", "pp", "ppp", "pppoe", "pptp",
            "provider", "queue", "rip", "schedule", "security", "sftpd", "snmp", "sshd",
            "statistics", "switch", "syslog", "system", "telnetd", "tftp", "timezone",
            "tunnel", "upnp", "url", "user", "vlan", "wins",
        ];
        Self {
            extra_command_heads: heads.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// Rule numbering defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// First number handed out by an automatic policy
    pub default_start: u32,

    /// Gap between automatically numbered rules
    pub default_step: u32,

    /// Highest number a rule list may use
    pub max: u32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            default_start: 10,
            default_step: 10,
            max: 65535,
        }
    }
}

impl EngineConfig {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = EngineConfig::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                config = config.merge_from_file(&path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // Explicit path takes priority
        if let Some(path) = explicit_path {
            paths.push(path.clone());
            return paths;
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("rtxconf/config.toml"));
        }
        paths.push(PathBuf::from("rtxconf.toml"));

        if let Ok(env_config) = std::env::var("RTXCONF_CONFIG") {
            paths.insert(0, PathBuf::from(env_config));
        }

        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: EngineConfig = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => toml::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one; the other side wins where it
    /// differs from the defaults
    fn merge(&self, other: EngineConfig) -> EngineConfig {
        let defaults = SequenceConfig::default();
        EngineConfig {
            catalog: CatalogConfig {
                path: other.catalog.path.or_else(|| self.catalog.path.clone()),
            },
            preprocessor: if other.preprocessor.extra_command_heads
                == PreprocessorConfig::default().extra_command_heads
            {
                self.preprocessor.clone()
            } else {
                other.preprocessor
            },
            sequence: SequenceConfig {
                default_start: if other.sequence.default_start != defaults.default_start {
                    other.sequence.default_start
                } else {
                    self.sequence.default_start
                },
                default_step: if other.sequence.default_step != defaults.default_step {
                    other.sequence.default_step
                } else {
                    self.sequence.default_step
                },
                max: if other.sequence.max != defaults.max {
                    other.sequence.max
                } else {
                    self.sequence.max
                },
            },
            logging: other.logging,
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // RTXCONF_CATALOG
        if let Ok(path) = std::env::var("RTXCONF_CATALOG") {
            self.catalog.path = Some(PathBuf::from(path));
        }

        // RTXCONF_SEQUENCE_START
        if let Ok(start) = std::env::var("RTXCONF_SEQUENCE_START") {
            if let Ok(n) = start.parse() {
                self.sequence.default_start = n;
            }
        }

        // RTXCONF_SEQUENCE_STEP
        if let Ok(step) = std::env::var("RTXCONF_SEQUENCE_STEP") {
            if let Ok(n) = step.parse() {
                self.sequence.default_step = n;
            }
        }

        // RTXCONF_LOG_LEVEL
        if let Ok(level) = std::env::var("RTXCONF_LOG_LEVEL") {
            if let Ok(level) = level.parse::<LogLevel>() {
                self.logging.level = level;
            }
        }

        // RTXCONF_LOG_FORMAT
        if let Ok(format) = std::env::var("RTXCONF_LOG_FORMAT") {
            if let Ok(format) = format.parse::<LogFormat>() {
                self.logging.format = format;
            }
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() {
            self.logging.ansi_colors = false;
        }
    }

    /// Load from a specific file, skipping the standard locations
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        EngineConfig::default().merge_from_file(path.as_ref())
    }
}
