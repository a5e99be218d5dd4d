//! Session configuration.
//!
//! The native library accepts its configuration as YAML text. JSON is a
//! subset of YAML, so structured configuration is serialised with
//! `serde_json` and passed through unchanged.

use crate::error::{FdbError, FdbResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Location of the system configuration below an FDB home directory.
pub const HOME_CONFIG_PATH: &str = "etc/fdb/config.yaml";

/// Location of the optional user configuration below an FDB home directory.
pub const HOME_USER_CONFIG_PATH: &str = "etc/fdb/user_config.yaml";

/// A storage root inside a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    /// Root directory.
    pub path: PathBuf,
    /// Any further root options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Root {
    /// Creates a root at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            extra: Map::new(),
        }
    }
}

/// A named group of storage roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    /// Space handler name, e.g. `Default`.
    #[serde(default = "default_handler")]
    pub handler: String,
    /// Storage roots.
    pub roots: Vec<Root>,
    /// Any further space options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_handler() -> String {
    "Default".to_string()
}

/// Structured system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdbConfig {
    /// Configuration type, e.g. `local`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Catalogue engine, e.g. `toc`.
    pub engine: String,
    /// Schema file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<PathBuf>,
    /// Storage spaces.
    pub spaces: Vec<Space>,
    /// Any further options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FdbConfig {
    /// A local TOC configuration with one default space over `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: "local".to_string(),
            engine: "toc".to_string(),
            schema: None,
            spaces: vec![Space {
                handler: default_handler(),
                roots: vec![Root::new(root)],
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    /// Sets the schema file.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// A configuration payload in any accepted shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Typed configuration.
    Typed(FdbConfig),
    /// Arbitrary structured data.
    Value(Value),
    /// Pre-serialised text, passed verbatim.
    Text(String),
}

impl ConfigSource {
    /// Serialises the payload to the text handed to the library.
    pub fn to_text(&self) -> FdbResult<String> {
        match self {
            Self::Typed(config) => serde_json::to_string(config)
                .map_err(|e| FdbError::config(format!("failed to serialise configuration: {e}"))),
            Self::Value(value) => serde_json::to_string(value)
                .map_err(|e| FdbError::config(format!("failed to serialise configuration: {e}"))),
            Self::Text(text) => Ok(text.clone()),
        }
    }
}

impl From<FdbConfig> for ConfigSource {
    fn from(config: FdbConfig) -> Self {
        Self::Typed(config)
    }
}

impl From<Value> for ConfigSource {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for ConfigSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ConfigSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// How a session should be configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FdbOptions {
    /// System configuration.
    pub config: Option<ConfigSource>,
    /// User configuration.
    pub user_config: Option<ConfigSource>,
    /// FDB home directory to read configuration from.
    pub home: Option<PathBuf>,
}

/// The resolved way to construct a native session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleConfig {
    /// Let the library discover its configuration.
    Defaults,
    /// Configuration text for system and user parts. Empty means default.
    Yaml {
        /// System configuration text.
        config: String,
        /// User configuration text.
        user_config: String,
    },
}

impl FdbOptions {
    /// Options selecting default discovery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the system configuration.
    #[must_use]
    pub fn config(mut self, config: impl Into<ConfigSource>) -> Self {
        self.config = Some(config.into());
        self
    }

    /// Sets the user configuration.
    #[must_use]
    pub fn user_config(mut self, user_config: impl Into<ConfigSource>) -> Self {
        self.user_config = Some(user_config.into());
        self
    }

    /// Reads configuration from an FDB home directory.
    #[must_use]
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Validates the options and produces the text passed to the library.
    pub fn resolve(&self) -> FdbResult<HandleConfig> {
        if let Some(home) = &self.home {
            if self.config.is_some() {
                return Err(FdbError::ConfigurationConflict);
            }
            return self.resolve_home(home);
        }

        if self.config.is_none() && self.user_config.is_none() {
            return Ok(HandleConfig::Defaults);
        }

        Ok(HandleConfig::Yaml {
            config: text_or_empty(self.config.as_ref())?,
            user_config: text_or_empty(self.user_config.as_ref())?,
        })
    }

    fn resolve_home(&self, home: &Path) -> FdbResult<HandleConfig> {
        let config_path = home.join(HOME_CONFIG_PATH);
        let config = fs::read_to_string(&config_path).map_err(|e| {
            FdbError::config(format!(
                "cannot read configuration {}: {e}",
                config_path.display()
            ))
        })?;

        let user_config = match &self.user_config {
            Some(source) => source.to_text()?,
            None => {
                let user_path = home.join(HOME_USER_CONFIG_PATH);
                if user_path.is_file() {
                    fs::read_to_string(&user_path)?
                } else {
                    String::new()
                }
            }
        };

        Ok(HandleConfig::Yaml {
            config,
            user_config,
        })
    }
}

fn text_or_empty(source: Option<&ConfigSource>) -> FdbResult<String> {
    source.map_or(Ok(String::new()), ConfigSource::to_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_sources_uses_defaults() {
        assert_eq!(FdbOptions::new().resolve().unwrap(), HandleConfig::Defaults);
    }

    #[test]
    fn typed_config_serialises_with_type_key() {
        let config = FdbConfig::local("/data/fdb").with_schema("/etc/schema");
        let text = ConfigSource::from(config).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "local");
        assert_eq!(value["engine"], "toc");
        assert_eq!(value["schema"], "/etc/schema");
        assert_eq!(value["spaces"][0]["handler"], "Default");
        assert_eq!(value["spaces"][0]["roots"][0]["path"], "/data/fdb");
    }

    #[test]
    fn text_passes_through() {
        let options = FdbOptions::new().config("type: local\n");
        assert_eq!(
            options.resolve().unwrap(),
            HandleConfig::Yaml {
                config: "type: local\n".to_string(),
                user_config: String::new(),
            }
        );
    }

    #[test]
    fn user_config_alone_leaves_system_part_empty() {
        let options = FdbOptions::new().user_config(json!({"useSubToc": true}));
        match options.resolve().unwrap() {
            HandleConfig::Yaml {
                config,
                user_config,
            } => {
                assert!(config.is_empty());
                assert_eq!(user_config, r#"{"useSubToc":true}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn home_and_config_conflict() {
        let options = FdbOptions::new().home("/somewhere").config(json!({}));
        assert!(matches!(
            options.resolve(),
            Err(FdbError::ConfigurationConflict)
        ));
    }

    #[test]
    fn home_reads_config_files() {
        let home = tempfile::tempdir().unwrap();
        let etc = home.path().join("etc/fdb");
        fs::create_dir_all(&etc).unwrap();
        fs::write(etc.join("config.yaml"), "type: local\n").unwrap();
        fs::write(etc.join("user_config.yaml"), "useSubToc: true\n").unwrap();

        let resolved = FdbOptions::new().home(home.path()).resolve().unwrap();
        assert_eq!(
            resolved,
            HandleConfig::Yaml {
                config: "type: local\n".to_string(),
                user_config: "useSubToc: true\n".to_string(),
            }
        );
    }

    #[test]
    fn home_without_config_file_fails() {
        let home = tempfile::tempdir().unwrap();
        let err = FdbOptions::new().home(home.path()).resolve().unwrap_err();
        assert!(matches!(err, FdbError::Config { .. }));
    }

    #[test]
    fn extra_keys_are_preserved() {
        let value = json!({
            "type": "local",
            "engine": "toc",
            "spaces": [{"roots": [{"path": "/r", "wipe": true}]}],
            "fdbHome": "/opt"
        });
        let config: FdbConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config.extra["fdbHome"], "/opt");
        assert_eq!(config.spaces[0].handler, "Default");
        assert_eq!(config.spaces[0].roots[0].extra["wipe"], true);
    }
}
