//! Configuration for the cmsync binary.
//!
//! A TOML file layered with `CMSYNC_*` environment variables, validated
//! as a whole at load time and translated to `cmsync_core::SyncConfig`.
//! Secrets stay plain strings only until translation, where they become
//! `SecretString`s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use cmsync_api::RetryPolicy;
use cmsync_core::{
    CatalogDatasetConfig, CatalogSettings, DailySchedule, ModelConfig, SourceSettings, SyncConfig,
};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CMSYNC_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid configuration:\n  - {}", problems.join("\n  - "))]
    Invalid { problems: Vec<String> },

    #[error("no token configured for [{section}] (set `token` or `token_env`)")]
    NoCredentials { section: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub source: SourceSection,

    #[serde(default)]
    pub catalog: CatalogSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub webhook: WebhookSection,

    #[serde(default)]
    pub schedule: ScheduleSection,

    /// Directory holding sync history and saved jobs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Default tracing filter when neither `RUST_LOG` nor `-v` is given.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Models to sync, keyed by model id.
    #[serde(default)]
    pub models: IndexMap<String, ModelSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceSection::default(),
            catalog: CatalogSection::default(),
            server: ServerSection::default(),
            webhook: WebhookSection::default(),
            schedule: ScheduleSection::default(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            models: IndexMap::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    /// Project-scoped content API base, e.g. `https://cms.example/api/p/ws/proj`.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the token.
    pub token_env: Option<String>,

    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            token_env: None,
            timeout_secs: default_source_timeout(),
            per_page: default_per_page(),
        }
    }
}

fn default_source_timeout() -> u64 {
    30
}
fn default_per_page() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogSection {
    #[serde(default)]
    pub url: String,

    /// API token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the token.
    pub token_env: Option<String>,

    /// Owner organization for created datasets.
    #[serde(default)]
    pub organization: String,

    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            token_env: None,
            organization: String::new(),
            timeout_secs: default_catalog_timeout(),
        }
    }
}

fn default_catalog_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_auth_username")]
    pub auth_username: String,

    /// Without a password every `/api` route is refused.
    pub auth_password: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_username: default_auth_username(),
            auth_password: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_auth_username() -> String {
    "admin".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookSection {
    /// Shared HMAC secret. Unset means signatures are not checked.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_hour")]
    pub hour: u32,

    #[serde(default)]
    pub minute: u32,

    /// Offset of the schedule's wall clock; also used for timestamps in
    /// resource descriptions.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_hour(),
            minute: 0,
            utc_offset_hours: default_utc_offset(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_hour() -> u32 {
    2
}
fn default_utc_offset() -> i32 {
    9
}

/// One `[models.<key>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSection {
    /// CMS model id; defaults to the table key.
    pub cms_model_id: Option<String>,

    #[serde(default)]
    pub dataset: DatasetSection,

    /// Source field -> catalog column.
    #[serde(default)]
    pub field_mappings: IndexMap<String, String>,

    pub geometry_field: Option<String>,

    #[serde(default)]
    pub exclude_fields: Vec<String>,

    /// Extra keys a webhook may use to name this model.
    #[serde(default)]
    pub webhook_model_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSection {
    pub name: Option<String>,
    pub title: Option<String>,

    #[serde(default)]
    pub notes: String,

    #[serde(default = "default_license")]
    pub license_id: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for DatasetSection {
    fn default() -> Self {
        Self {
            name: None,
            title: None,
            notes: String::new(),
            license_id: default_license(),
            tags: Vec::new(),
        }
    }
}

fn default_license() -> String {
    "cc-by".into()
}

impl ModelSection {
    /// Runtime model config for the table at `key`.
    pub fn to_model_config(&self, key: &str) -> ModelConfig {
        let name = non_empty(self.dataset.name.as_deref()).unwrap_or(key);
        let title = non_empty(self.dataset.title.as_deref()).unwrap_or(key);
        ModelConfig {
            cms_model_id: non_empty(self.cms_model_id.as_deref())
                .unwrap_or(key)
                .to_owned(),
            dataset: CatalogDatasetConfig {
                name: name.to_owned(),
                title: title.to_owned(),
                notes: self.dataset.notes.clone(),
                license_id: self.dataset.license_id.clone(),
                tags: self.dataset.tags.clone(),
            },
            field_mappings: self.field_mappings.clone(),
            geometry_field: self.geometry_field.clone(),
            exclude_fields: self.exclude_fields.clone(),
            webhook_model_keys: self.webhook_model_keys.clone(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the default config file path via platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "cmsync", "cmsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("cmsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from file + environment.
///
/// An explicit path must exist; the platform default may be absent, in
/// which case only environment variables and defaults apply. Nothing is
/// validated here, see [`Config::validate`].
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) if !p.exists() => {
            return Err(ConfigError::NotFound {
                path: p.to_path_buf(),
            });
        }
        Some(p) => p.to_path_buf(),
        None => config_path(),
    };

    let figment = Figment::new()
        .merge(Toml::file(&path))
        .merge(Env::prefixed("CMSYNC_").ignore(&["config"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

impl Config {
    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(Figment::from(Toml::string(toml)).extract()?)
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(reason) = check_url(&self.source.base_url) {
            problems.push(format!("source.base_url: {reason}"));
        }
        if self.source.per_page == 0 {
            problems.push("source.per_page: must be at least 1".into());
        }

        if let Err(reason) = check_url(&self.catalog.url) {
            problems.push(format!("catalog.url: {reason}"));
        }
        if resolve_secret(
            self.catalog.token_env.as_deref(),
            self.catalog.token.as_deref(),
        )
        .is_none()
        {
            problems.push(match self.catalog.token_env.as_deref() {
                Some(var) => format!("catalog.token: environment variable {var} is not set"),
                None => "catalog.token: required (set `token` or `token_env`)".into(),
            });
        }
        if self.catalog.organization.trim().is_empty() {
            problems.push("catalog.organization: required".into());
        }

        if self.models.is_empty() {
            problems.push("models: at least one [models.<key>] table is required".into());
        }
        for (key, model) in &self.models {
            if model
                .cms_model_id
                .as_deref()
                .is_some_and(|id| id.trim().is_empty())
            {
                problems.push(format!("models.{key}.cms_model_id: must not be empty"));
            }
        }

        if self.schedule.hour >= 24 {
            problems.push(format!(
                "schedule.hour: {} is out of range (0-23)",
                self.schedule.hour
            ));
        }
        if self.schedule.minute >= 60 {
            problems.push(format!(
                "schedule.minute: {} is out of range (0-59)",
                self.schedule.minute
            ));
        }
        if !(-14..=14).contains(&self.schedule.utc_offset_hours) {
            problems.push(format!(
                "schedule.utc_offset_hours: {} is out of range (-14 to 14)",
                self.schedule.utc_offset_hours
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }

    /// Validate and build the engine's runtime config.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        self.validate()?;

        let base_url = parse_url("source.base_url", &self.source.base_url)?;
        let catalog_url = parse_url("catalog.url", &self.catalog.url)?;
        let catalog_token = resolve_secret(
            self.catalog.token_env.as_deref(),
            self.catalog.token.as_deref(),
        )
        .ok_or_else(|| ConfigError::NoCredentials {
            section: "catalog".into(),
        })?;
        let local_offset = FixedOffset::east_opt(self.schedule.utc_offset_hours * 3600)
            .ok_or_else(|| ConfigError::Validation {
                field: "schedule.utc_offset_hours".into(),
                reason: "out of range".into(),
            })?;

        Ok(SyncConfig {
            source: SourceSettings {
                base_url,
                token: resolve_secret(
                    self.source.token_env.as_deref(),
                    self.source.token.as_deref(),
                ),
                timeout: Duration::from_secs(self.source.timeout_secs),
                per_page: self.source.per_page,
            },
            catalog: CatalogSettings {
                url: catalog_url,
                token: catalog_token,
                organization: self.catalog.organization.trim().to_owned(),
                timeout: Duration::from_secs(self.catalog.timeout_secs),
            },
            models: self
                .models
                .iter()
                .map(|(key, model)| (key.clone(), model.to_model_config(key)))
                .collect(),
            data_dir: self.data_dir.clone(),
            retry: RetryPolicy::default(),
            local_offset,
        })
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            host: self.server.host.clone(),
            port: self.server.port,
            auth_username: self.server.auth_username.clone(),
            auth_password: non_empty(self.server.auth_password.as_deref())
                .map(|p| SecretString::from(p.to_owned())),
        }
    }

    pub fn webhook_secret(&self) -> Option<SecretString> {
        non_empty(self.webhook.secret.as_deref()).map(|s| SecretString::from(s.to_owned()))
    }

    /// The daily trigger, or `None` when disabled.
    pub fn daily_schedule(&self) -> Result<Option<DailySchedule>, ConfigError> {
        if !self.schedule.enabled {
            return Ok(None);
        }
        DailySchedule::new(
            self.schedule.hour,
            self.schedule.minute,
            self.schedule.utc_offset_hours,
        )
        .map(Some)
        .map_err(|e| ConfigError::Validation {
            field: "schedule".into(),
            reason: e.to_string(),
        })
    }
}

/// HTTP listener and Basic-auth credentials.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub auth_username: String,
    pub auth_password: Option<SecretString>,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a secret: the named environment variable first, then the
/// plaintext value. Empty values count as unset.
pub fn resolve_secret(env_name: Option<&str>, plaintext: Option<&str>) -> Option<SecretString> {
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            if !val.trim().is_empty() {
                return Some(SecretString::from(val));
            }
        }
    }
    non_empty(plaintext).map(|s| SecretString::from(s.to_owned()))
}

fn check_url(raw: &str) -> Result<(), String> {
    if raw.trim().is_empty() {
        return Err("required".into());
    }
    match Url::parse(raw.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(url) => Err(format!("unsupported scheme '{}'", url.scheme())),
        Err(e) => Err(format!("invalid URL '{raw}': {e}")),
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}
