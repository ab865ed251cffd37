//! Configuration loading: `config.json` plus environment overrides

use super::schema::Config;
use super::validate::validate_config;
use crate::Error;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_FILE: &str = "config.json";
const ENV_PREFIX: &str = "SPARK_RELAY__";

/// Short variable names for the upstream endpoint and credentials, all under `spark`
const SPARK_ALIASES: [(&str, &str); 5] = [
    ("SPARK_HOST_URL", "host_url"),
    ("SPARK_DOMAIN", "domain"),
    ("SPARK_APP_ID", "app_id"),
    ("SPARK_API_KEY", "api_key"),
    ("SPARK_API_SECRET", "api_secret"),
];

/// Reads and writes `config.json` in a config directory
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader for `~/.spark-relay`
    pub fn new() -> Self {
        let config_dir = dirs::home_dir()
            .map(|h| h.join(".spark-relay"))
            .unwrap_or_else(|| PathBuf::from(".spark-relay"));
        Self { config_dir }
    }

    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Build the effective configuration.
    ///
    /// Fields missing from the file keep their defaults. `SPARK_*` aliases are
    /// applied next, and `SPARK_RELAY__<SECTION>__<FIELD>` variables last, so
    /// they win over both.
    pub fn load(&self) -> crate::Result<Config> {
        let mut sections = self.read_sections()?;

        for (var, field) in SPARK_ALIASES {
            if let Ok(value) = std::env::var(var) {
                set_field(&mut sections, "spark", field, Value::String(value));
            }
        }

        for (var, raw) in std::env::vars() {
            let Some(path) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match section_and_field(path) {
                Some((section, field)) => set_field(&mut sections, &section, &field, env_value(&raw)),
                None => warn!(%var, "Ignoring override that does not name <SECTION>__<FIELD>"),
            }
        }

        let config: Config = serde_json::from_value(Value::Object(sections))?;
        validate_config(&config)?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::write(self.config_path(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    fn read_sections(&self) -> crate::Result<Map<String, Value>> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&std::fs::read_to_string(&path)?)? {
            Value::Object(sections) => Ok(sections),
            _ => Err(Error::Config(format!(
                "{} must hold a JSON object",
                path.display()
            ))),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `GATEWAY__PORT` -> (`gateway`, `port`)
fn section_and_field(path: &str) -> Option<(String, String)> {
    let (section, field) = path.split_once("__")?;
    if section.is_empty() || field.is_empty() || field.contains("__") {
        return None;
    }
    Some((section.to_ascii_lowercase(), field.to_ascii_lowercase()))
}

fn set_field(sections: &mut Map<String, Value>, section: &str, field: &str, value: Value) {
    let entry = sections
        .entry(section.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(fields) = entry {
        fields.insert(field.to_string(), value);
    }
}

/// JSON literals keep their type, anything else is a plain string
fn env_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
