//! Application configuration module
//!
//! Loads `dbl.yaml` from the project root, layered with `DBL_*` environment
//! overrides (an optional `.env` file is read first).

use crate::engine::EngineKind;
use crate::error::{config_error, DblResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default configuration written by `dbl init`
pub const DEFAULT_CONFIG_YAML: &str = r#"engine: postgres
container_name: ""
host: localhost
port: 5432
db_name: myapp
user: postgres
password: password
track_tables: []
ignore_tables:
  - migrations
  - failed_jobs
  - sessions
max_workers: 8
command_timeout_secs: 300
validate:
  strict: false
  allow_orphaned: false
  require_comments: false
  detect_type_changes: true
"#;

/// Validation engine switches (`validate:` section)
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidateConfig {
    /// Escalate sequencing warnings to blocking errors
    pub strict: bool,
    /// Allow backfill layers without a prior expand
    pub allow_orphaned: bool,
    /// Treat uncommented DROP statements as errors under strict mode
    pub require_comments: bool,
    pub detect_type_changes: bool,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            strict: false,
            allow_orphaned: false,
            require_comments: false,
            detect_type_changes: true,
        }
    }
}

/// Complete project settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    /// Run client tools inside this docker container when set
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub track_tables: Vec<String>,
    #[serde(default)]
    pub ignore_tables: Vec<String>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub validate: ValidateConfig,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_max_workers() -> usize {
    8
}

fn default_command_timeout() -> u64 {
    300
}

impl Settings {
    /// Load settings from `dbl.yaml` plus `DBL_*` environment overrides
    pub fn load(path: &Path) -> DblResult<Self> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        if !path.exists() {
            return Err(config_error(format!(
                "{} not found. Run 'dbl init'.",
                path.display()
            )));
        }

        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("DBL")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("track_tables")
                    .with_list_parse_key("ignore_tables"),
            )
            .build()?;

        let mut settings: Settings = raw.try_deserialize()?;

        if let Ok(database_url) = std::env::var("DBL_DATABASE_URL") {
            settings.apply_database_url(&database_url)?;
        }

        settings.normalize();
        settings.check()?;
        Ok(settings)
    }

    /// Parse a connection URL (postgresql://... or mysql://...) over the file values
    fn apply_database_url(&mut self, url: &str) -> DblResult<()> {
        let parsed = url::Url::parse(url)
            .map_err(|e| config_error(format!("Invalid DBL_DATABASE_URL: {}", e)))?;

        self.engine = match parsed.scheme() {
            "postgres" | "postgresql" => EngineKind::Postgres,
            "mysql" => EngineKind::Mysql,
            other => {
                return Err(config_error(format!(
                    "Unsupported scheme '{}' in DBL_DATABASE_URL",
                    other
                )))
            }
        };
        self.host = parsed
            .host_str()
            .ok_or_else(|| config_error("Missing host in DBL_DATABASE_URL"))?
            .to_string();
        self.port = parsed.port().unwrap_or(self.engine.default_port());
        if !parsed.username().is_empty() {
            self.user = parsed.username().to_string();
        }
        if let Some(password) = parsed.password() {
            self.password = password.to_string();
        }
        let database = parsed.path().trim_start_matches('/');
        if !database.is_empty() {
            self.db_name = database.to_string();
        }
        Ok(())
    }

    fn normalize(&mut self) {
        if self
            .container_name
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            self.container_name = None;
        }
        if self.max_workers == 0 {
            self.max_workers = 1;
        }
    }

    fn check(&self) -> DblResult<()> {
        if self.db_name.trim().is_empty() {
            return Err(config_error("db_name must not be empty"));
        }
        if !self
            .db_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(config_error(format!(
                "db_name '{}' may only contain letters, digits and '_'",
                self.db_name
            )));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load only the validation section; a missing or broken config falls back to defaults
pub fn load_validate_config(path: &Path) -> ValidateConfig {
    Settings::load(path)
        .map(|s| s.validate)
        .unwrap_or_default()
}
