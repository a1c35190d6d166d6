// src/config.rs

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_FILE: &str = "grading-config.yaml";

/// Top-level `grading-config.yaml`.
#[derive(Debug, Default, Deserialize)]
pub struct GradingConfig {
    #[serde(default)]
    pub google_auth: AuthConfig,
    #[serde(default)]
    pub google_sheets: SheetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Service-account key file; takes precedence over the user token flow.
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default = "default_token_file")]
    pub token: String,
    #[serde(default = "default_credentials_file")]
    pub credentials: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_account: None,
            token: default_token_file(),
            credentials: default_credentials_file(),
        }
    }
}

/// One pattern or a list of alternatives for a named column.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternSpec {
    One(String),
    Many(Vec<String>),
}

impl PatternSpec {
    pub fn patterns(&self) -> &[String] {
        match self {
            PatternSpec::One(p) => std::slice::from_ref(p),
            PatternSpec::Many(ps) => ps,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub sheet_ranges: Vec<String>,
    #[serde(default = "default_cache_file")]
    pub cache: String,
    #[serde(default)]
    pub column_patterns: IndexMap<String, PatternSpec>,
    #[serde(default = "default_list_format")]
    pub list_format: String,
    #[serde(default = "default_info_format")]
    pub info_format: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            sheet_ranges: Vec::new(),
            cache: default_cache_file(),
            column_patterns: IndexMap::new(),
            list_format: default_list_format(),
            info_format: default_info_format(),
        }
    }
}

impl SheetsConfig {
    pub fn cache_path(&self) -> PathBuf {
        expand_path(&self.cache)
    }
}

fn default_token_file() -> String {
    ".token.json".to_string()
}

fn default_credentials_file() -> String {
    "credentials.json".to_string()
}

fn default_cache_file() -> String {
    ".cache.json".to_string()
}

fn default_list_format() -> String {
    "{a1_str} | {obj_str}".to_string()
}

fn default_info_format() -> String {
    "{a1_str}: {username}: {obj_str}".to_string()
}

impl GradingConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_path(path.as_ref());
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document deserializes to unit, not a mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
