//! Configuration types for the tutoring service.
//!
//! Tunables live in `tutor.json` (camelCase, every field optional). Secrets
//! never do: [`Credentials`] are read from the environment so that a config
//! file can be committed safely.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tutor_sandbox::{Resources, SandboxSpec};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default HTTP port.
const fn default_port() -> u16 {
    8000
}

/// Default subject area for generated questions.
fn default_topic() -> String {
    "Long Division".to_string()
}

/// Default model for the fast tier.
fn default_fast_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

/// Default model for the capable tier.
fn default_capable_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

/// Default pre-baked render image.
fn default_image() -> String {
    "tutor-manim:latest".to_string()
}

const fn default_cpus() -> f64 {
    2.0
}

const fn default_memory_mb() -> u64 {
    4096
}

fn default_workdir() -> String {
    "/home/tutor".to_string()
}

/// Default storage bucket for rendered videos.
fn default_bucket() -> String {
    "videos".to_string()
}

/// Default retention window for published videos.
const fn default_retention_hours() -> u32 {
    24
}

/// Main configuration for the tutoring service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Topic used for question generation when the model omits one.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Model id for question, validation, hint, explanation, and chat calls.
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// Model id for animation program generation.
    #[serde(default = "default_capable_model")]
    pub capable_model: String,

    /// Sandbox provisioning settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Published video storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Which backend serves the relational store and object storage.
    #[serde(default)]
    pub store: StoreBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            topic: default_topic(),
            fast_model: default_fast_model(),
            capable_model: default_capable_model(),
            sandbox: SandboxConfig::default(),
            storage: StorageConfig::default(),
            store: StoreBackend::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `tutor.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. The loaded configuration is always
    /// validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file cannot be read or
    /// parsed, and `TutorError::ConfigValidationError` if a value is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TutorError::config_validation(
                "port must be greater than 0",
                "Set port to a free TCP port (e.g. 8000) in your tutor.json",
            ));
        }

        if self.topic.trim().is_empty() {
            return Err(TutorError::config_validation(
                "topic must not be empty",
                "Set topic (e.g. \"Long Division\") in your tutor.json",
            ));
        }

        if self.fast_model.trim().is_empty() || self.capable_model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "fastModel and capableModel must not be empty",
                "Remove the fields from tutor.json to use the default models",
            ));
        }

        if self.sandbox.image.trim().is_empty() {
            return Err(TutorError::config_validation(
                "sandbox.image must not be empty",
                "Point sandbox.image at the pre-baked render image in your tutor.json",
            ));
        }

        if !self.sandbox.cpus.is_finite() || self.sandbox.cpus <= 0.0 {
            return Err(TutorError::config_validation(
                "sandbox.cpus must be a positive number",
                "Set sandbox.cpus to at least 1 in your tutor.json",
            ));
        }

        if self.sandbox.memory_mb == 0 {
            return Err(TutorError::config_validation(
                "sandbox.memoryMb must be greater than 0",
                "Set sandbox.memoryMb to at least 1024 in your tutor.json",
            ));
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(TutorError::config_validation(
                "storage.bucket must not be empty",
                "Set storage.bucket (e.g. \"videos\") in your tutor.json",
            ));
        }

        if self.storage.retention_hours == 0 {
            return Err(TutorError::config_validation(
                "storage.retentionHours must be greater than 0",
                "Set storage.retentionHours to at least 1 in your tutor.json",
            ));
        }

        Ok(())
    }

    /// Retention window as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.storage.retention_hours))
    }
}

/// Sandbox provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Pre-baked image containing the render toolchain.
    #[serde(default = "default_image")]
    pub image: String,

    /// Virtual CPUs per sandbox.
    #[serde(default = "default_cpus")]
    pub cpus: f64,

    /// Memory limit per sandbox in mebibytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// Working directory for render commands.
    #[serde(default = "default_workdir")]
    pub workdir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            cpus: default_cpus(),
            memory_mb: default_memory_mb(),
            workdir: default_workdir(),
        }
    }
}

impl SandboxConfig {
    /// Builds the provisioning spec for one render.
    pub fn spec(&self) -> SandboxSpec {
        SandboxSpec::new(&self.image)
            .with_resources(Resources {
                cpus: self.cpus,
                memory_mb: self.memory_mb,
            })
            .with_workdir(&self.workdir)
    }
}

/// Object storage configuration for published videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Bucket receiving rendered videos.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Videos older than this are removed by the cleanup sweep.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// Backend serving the store and object storage collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; data is lost on restart.
    #[default]
    Memory,
    /// Supabase `PostgREST` and Storage over HTTP.
    Supabase,
}

impl StoreBackend {
    /// Parses a string into a `StoreBackend`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "supabase" => Some(Self::Supabase),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for StoreBackend {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid store backend '{s}': expected one of 'memory', 'supabase'"
            ))
        })
    }
}

impl Serialize for StoreBackend {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(match self {
            Self::Memory => "memory",
            Self::Supabase => "supabase",
        })
    }
}

/// Secrets read from the environment at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Completion service API key.
    pub anthropic_api_key: String,
    /// Supabase project URL.
    pub supabase_url: Option<String>,
    /// Supabase anon key.
    pub supabase_key: Option<String>,
    /// Supabase service-role key; preferred over the anon key for admin calls.
    pub supabase_service_role_key: Option<String>,
    /// Svix signing secret for user webhooks.
    pub clerk_webhook_secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("anthropic_api_key", &"<redacted>")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "<redacted>"))
            .field(
                "supabase_service_role_key",
                &self.supabase_service_role_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "clerk_webhook_secret",
                &self.clerk_webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    /// Reads credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::MissingCredential` for the first required
    /// variable that is unset or blank.
    pub fn from_env(backend: StoreBackend) -> Result<Self> {
        Self::from_lookup(backend, |name| std::env::var(name).ok())
    }

    /// Reads credentials through `lookup`; blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::MissingCredential` for the first required
    /// variable that is unset or blank.
    pub fn from_lookup<F>(backend: StoreBackend, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| get(name).ok_or_else(|| TutorError::missing_credential(name));

        let credentials = Self {
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            supabase_url: get("SUPABASE_URL"),
            supabase_key: get("SUPABASE_KEY"),
            supabase_service_role_key: get("SUPABASE_SERVICE_ROLE_KEY"),
            clerk_webhook_secret: get("CLERK_WEBHOOK_SECRET"),
        };

        if backend == StoreBackend::Supabase {
            if credentials.supabase_url.is_none() {
                return Err(TutorError::missing_credential("SUPABASE_URL"));
            }
            if credentials.supabase_key.is_none() {
                return Err(TutorError::missing_credential("SUPABASE_KEY"));
            }
        }

        Ok(credentials)
    }

    /// Key used for Supabase calls: the service-role key when present.
    pub fn supabase_admin_key(&self) -> Option<&str> {
        self.supabase_service_role_key
            .as_deref()
            .or(self.supabase_key.as_deref())
    }
}
