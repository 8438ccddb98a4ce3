//! Provider configuration file.
//!
//! Capability profiles are declared once per provider at startup, either in
//! code or in a TOML file:
//!
//! ```toml
//! default_provider = "northwind"
//!
//! [providers.northwind]
//! preset = "sqlite"
//! database = "northwind.db"
//! busy_timeout_ms = 5000
//! supports_decimal_comparisons = true
//! ```
//!
//! Every key other than `preset`, `database` and `busy_timeout_ms` must be a
//! capability flag key.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use time::{macros::format_description, PrimitiveDateTime};

use crate::query::capability::{CapabilityFlag, CapabilityProfile, CapabilityValue};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "REFRACT_CONFIG";

/// One configured provider.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    /// Provider name (table key).
    pub name: String,
    /// Resolved capability profile.
    pub profile: CapabilityProfile,
    /// Database location, for providers that have one.
    pub database: Option<PathBuf>,
    /// Lock wait before a round-trip is reported as timed out.
    pub busy_timeout_ms: Option<u64>,
}

/// Loaded provider configuration.
#[derive(Debug, Default)]
pub struct ProviderConfig {
    path: Option<PathBuf>,
    default_provider: Option<String>,
    providers: HashMap<String, ProviderSettings>,
}

impl ProviderConfig {
    /// Loads from `explicit`, `$REFRACT_CONFIG`, or the user config directory.
    ///
    /// A missing file yields an empty configuration.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let mut config = match path.as_ref() {
            Some(config_path) if config_path.exists() => Self::from_raw(read_file(config_path)?)?,
            _ => Self::default(),
        };
        config.path = path;
        Ok(config)
    }

    /// Parses configuration text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut providers = HashMap::new();
        for (name, entry) in &raw.providers {
            providers.insert(name.clone(), convert_provider(name, entry)?);
        }
        if let Some(default_name) = raw.default_provider.as_ref() {
            if !providers.contains_key(default_name) {
                return Err(ConfigError::UnknownProvider {
                    name: default_name.clone(),
                });
            }
        }
        Ok(Self {
            path: None,
            default_provider: raw.default_provider,
            providers,
        })
    }

    /// Path the configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Settings for `name`.
    pub fn provider(&self, name: &str) -> Result<&ProviderSettings, ConfigError> {
        self.providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider {
                name: name.to_string(),
            })
    }

    /// Settings for the declared default provider.
    pub fn default_provider(&self) -> Option<&ProviderSettings> {
        self.default_provider
            .as_deref()
            .and_then(|name| self.providers.get(name))
    }

    /// All configured providers.
    pub fn providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.values()
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn convert_provider(name: &str, raw: &RawProvider) -> Result<ProviderSettings, ConfigError> {
    let mut builder = match raw.preset.as_deref() {
        None | Some("conservative") => CapabilityProfile::builder(name),
        Some("sqlite") => CapabilityProfile::sqlite().extend(name),
        Some("sql_server") => CapabilityProfile::sql_server().extend(name),
        Some("cosmos") => CapabilityProfile::cosmos().extend(name),
        Some(other) => {
            return Err(ConfigError::UnknownPreset {
                provider: name.to_string(),
                preset: other.to_string(),
            })
        }
    };
    for (key, value) in &raw.flags {
        let invalid = |reason: String| ConfigError::InvalidFlag {
            provider: name.to_string(),
            key: key.clone(),
            reason,
        };
        let flag = CapabilityFlag::from_str(key).map_err(invalid)?;
        let value = flag_value(flag, value).map_err(invalid)?;
        builder = builder.set(flag, value).map_err(invalid)?;
    }
    Ok(ProviderSettings {
        name: name.to_string(),
        profile: builder.build(),
        database: raw.database.clone(),
        busy_timeout_ms: raw.busy_timeout_ms,
    })
}

fn flag_value(flag: CapabilityFlag, value: &toml::Value) -> Result<CapabilityValue, String> {
    match (flag, value) {
        (CapabilityFlag::IntegerPrecision, toml::Value::Integer(bits)) => u8::try_from(*bits)
            .ok()
            .filter(|bits| (1..=64).contains(bits))
            .map(CapabilityValue::Int)
            .ok_or_else(|| format!("precision {bits} is outside 1..=64")),
        (CapabilityFlag::DefaultDateTime, toml::Value::String(text)) => parse_sentinel(text),
        (CapabilityFlag::DefaultDateTime, toml::Value::Datetime(stamp)) => {
            parse_sentinel(&stamp.to_string())
        }
        (_, toml::Value::Boolean(enabled)) => Ok(CapabilityValue::Bool(*enabled)),
        (_, other) => Err(format!("unexpected {} value", other.type_str())),
    }
}

fn parse_sentinel(text: &str) -> Result<CapabilityValue, String> {
    let normalized = text.replacen('T', " ", 1);
    PrimitiveDateTime::parse(
        &normalized,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .map(CapabilityValue::DateTime)
    .map_err(|err| format!("invalid date-time '{text}': {err}"))
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    providers: BTreeMap<String, RawProvider>,
    #[serde(default)]
    default_provider: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProvider {
    preset: Option<String>,
    database: Option<PathBuf>,
    busy_timeout_ms: Option<u64>,
    #[serde(flatten)]
    flags: BTreeMap<String, toml::Value>,
}

/// Errors raised while loading provider configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read provider config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse provider config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser failure.
        source: toml::de::Error,
    },
    /// No provider with this name is configured.
    #[error("provider '{name}' not found")]
    UnknownProvider {
        /// Requested provider.
        name: String,
    },
    /// The preset name is not recognised.
    #[error("provider '{provider}' uses unknown preset '{preset}'")]
    UnknownPreset {
        /// Provider table.
        provider: String,
        /// Preset name.
        preset: String,
    },
    /// A key is not a capability flag or carries the wrong kind of value.
    #[error("provider '{provider}' key '{key}' is invalid: {reason}")]
    InvalidFlag {
        /// Provider table.
        provider: String,
        /// Offending key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// `$REFRACT_CONFIG`, else `<config dir>/refract/providers.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|base| base.join("refract").join("providers.toml")))
}
