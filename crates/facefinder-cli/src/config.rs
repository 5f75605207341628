use std::path::{Path, PathBuf};
use std::time::Duration;

use facefinder_cloud::{AccessToken, DEFAULT_FACE_ENDPOINT, DEFAULT_GRAPH_ENDPOINT};
use facefinder_core::workflow::{
    WorkflowConfig, DEFAULT_GROUP_NAME, DEFAULT_GROUP_USER_DATA, DEFAULT_PERSON_GROUP_ID,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} is not set; add it to the config file or export {1}")]
    Missing(&'static str, &'static str),
}

/// CLI configuration: defaults, then the TOML config file, then `FACEFINDER_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Face API base URL, including the `/face/v1.0` path.
    pub face_endpoint: String,
    pub subscription_key: Option<String>,
    /// Microsoft Graph base URL.
    pub graph_endpoint: String,
    /// Bearer token for Graph, acquired out of band.
    pub access_token: Option<String>,
    pub person_group: String,
    pub group_name: String,
    pub group_user_data: Option<String>,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub max_candidates: u32,
    pub confidence_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            face_endpoint: DEFAULT_FACE_ENDPOINT.to_string(),
            subscription_key: None,
            graph_endpoint: DEFAULT_GRAPH_ENDPOINT.to_string(),
            access_token: None,
            person_group: DEFAULT_PERSON_GROUP_ID.to_string(),
            group_name: DEFAULT_GROUP_NAME.to_string(),
            group_user_data: Some(DEFAULT_GROUP_USER_DATA.to_string()),
            poll_interval_ms: 1000,
            max_polls: 120,
            max_candidates: 1,
            confidence_threshold: 0.7,
        }
    }
}

impl Config {
    /// Load from `explicit` (or the default config path when it exists),
    /// then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEFINDER_*` variables. Unparsable numbers are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEFINDER_FACE_ENDPOINT") {
            self.face_endpoint = v;
        }
        if let Some(v) = lookup("FACEFINDER_SUBSCRIPTION_KEY") {
            self.subscription_key = Some(v);
        }
        if let Some(v) = lookup("FACEFINDER_GRAPH_ENDPOINT") {
            self.graph_endpoint = v;
        }
        if let Some(v) = lookup("FACEFINDER_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = lookup("FACEFINDER_PERSON_GROUP") {
            self.person_group = v;
        }
        parse_into(&lookup, "FACEFINDER_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        parse_into(&lookup, "FACEFINDER_MAX_POLLS", &mut self.max_polls);
        parse_into(
            &lookup,
            "FACEFINDER_CONFIDENCE_THRESHOLD",
            &mut self.confidence_threshold,
        );
    }

    pub fn subscription_key(&self) -> Result<&str, ConfigError> {
        self.subscription_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing(
                "subscription_key",
                "FACEFINDER_SUBSCRIPTION_KEY",
            ))
    }

    pub fn access_token(&self) -> Result<AccessToken, ConfigError> {
        self.access_token
            .as_deref()
            .map(AccessToken::new)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("access_token", "FACEFINDER_ACCESS_TOKEN"))
    }

    pub fn workflow(&self) -> WorkflowConfig {
        WorkflowConfig {
            person_group_id: self.person_group.clone(),
            group_name: self.group_name.clone(),
            group_user_data: self.group_user_data.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_polls: self.max_polls,
            max_candidates: self.max_candidates,
            confidence_threshold: self.confidence_threshold,
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &Option<String>| s.as_ref().map(|_| "<redacted>".to_string());
        Self {
            subscription_key: mask(&self.subscription_key),
            access_token: mask(&self.access_token),
            ..self.clone()
        }
    }
}

/// `$FACEFINDER_CONFIG`, else `$XDG_CONFIG_HOME/facefinder/config.toml`,
/// else `~/.config/facefinder/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FACEFINDER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("facefinder").join("config.toml"))
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable value"),
        }
    }
}
