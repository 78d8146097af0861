use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{EtlError, Result};

/// Config file read when no `--config` is given, if present
pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";

/// Service-account key picked up from the working directory when no other
/// Sheets credential is configured
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "service_account.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
    pub export: ExportConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl FromStr for DbBackend {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(DbBackend::Sqlite),
            "postgres" | "postgresql" => Ok(DbBackend::Postgres),
            other => Err(EtlError::Config(format!("unknown DB_BACKEND '{}'", other))),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DbBackend,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DbBackend::Sqlite,
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "etl_project".to_string(),
            path: PathBuf::from("data/etl.db"),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Google spreadsheet id
    pub spreadsheet_id: Option<String>,
    /// Google service-account JSON key file
    pub service_account_key: Option<PathBuf>,
    /// OAuth bearer token for private spreadsheets
    pub access_token: Option<String>,
    /// Sheets API key for spreadsheets shared by link
    pub api_key: Option<String>,
    /// Directory of `<sheet>.csv` files; takes precedence over `spreadsheet_id`
    pub csv_dir: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            service_account_key: None,
            access_token: None,
            api_key: None,
            csv_dir: None,
            timeout_seconds: 30,
        }
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SourceConfig")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("service_account_key", &self.service_account_key)
            .field("access_token", &redact(&self.access_token))
            .field("api_key", &redact(&self.api_key))
            .field("csv_dir", &self.csv_dir)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// How Sheets API requests are authorized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsCredentials {
    ServiceAccount(PathBuf),
    AccessToken(String),
    ApiKey(String),
}

/// Which spreadsheet source a run reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    CsvDirectory(PathBuf),
    GoogleSheets { spreadsheet_id: String },
}

impl SourceConfig {
    pub fn kind(&self) -> Result<SourceKind> {
        if let Some(dir) = &self.csv_dir {
            return Ok(SourceKind::CsvDirectory(dir.clone()));
        }
        match &self.spreadsheet_id {
            Some(id) if !id.trim().is_empty() => Ok(SourceKind::GoogleSheets {
                spreadsheet_id: id.trim().to_string(),
            }),
            _ => Err(EtlError::Config(
                "no spreadsheet source configured: set ETL_SHEET_ID or ETL_SOURCE_DIR".to_string(),
            )),
        }
    }

    /// Service-account key, then access token, then API key, then
    /// `service_account.json` in the working directory.
    pub fn credentials(&self) -> Result<SheetsCredentials> {
        if let Some(path) = &self.service_account_key {
            return Ok(SheetsCredentials::ServiceAccount(path.clone()));
        }
        if let Some(token) = &self.access_token {
            return Ok(SheetsCredentials::AccessToken(token.clone()));
        }
        if let Some(key) = &self.api_key {
            return Ok(SheetsCredentials::ApiKey(key.clone()));
        }
        if Path::new(DEFAULT_SERVICE_ACCOUNT_FILE).exists() {
            return Ok(SheetsCredentials::ServiceAccount(PathBuf::from(
                DEFAULT_SERVICE_ACCOUNT_FILE,
            )));
        }
        Err(EtlError::Config(
            "no Google Sheets credentials: set GOOGLE_APPLICATION_CREDENTIALS, \
             ETL_SHEETS_TOKEN or ETL_SHEETS_API_KEY"
                .to_string(),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file_name: "etl.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus Pushgateway base URL; metrics are pushed after each run
    pub pushgateway_url: Option<String>,
    pub job: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: None,
            job: "sheets_etl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Gold CSV export directory; `all` exports only when this is set
    pub dir: Option<PathBuf>,
}

impl EtlConfig {
    /// Defaults, then the TOML file, then environment variables.
    ///
    /// An explicit `path` must exist; otherwise `etl.toml` is read only if
    /// present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: EtlConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`. Empty values
    /// are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DB_BACKEND") {
            self.database.backend = v.parse()?;
        }
        if let Some(v) = get("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = get("DB_PORT") {
            self.database.port = v
                .trim()
                .parse()
                .map_err(|_| EtlError::Config(format!("DB_PORT '{}' is not a port number", v)))?;
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = get("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = get("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = get("DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = get("ETL_SHEET_ID") {
            self.source.spreadsheet_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            self.source.service_account_key = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ETL_SHEETS_TOKEN") {
            self.source.access_token = Some(v);
        }
        if let Some(v) = get("ETL_SHEETS_API_KEY") {
            self.source.api_key = Some(v);
        }
        if let Some(v) = get("ETL_SOURCE_DIR") {
            self.source.csv_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ETL_EXPORT_DIR") {
            self.export.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ETL_LOG_DIR") {
            self.logging.dir = PathBuf::from(v);
        }
        if let Some(v) = get("ETL_PUSHGATEWAY_URL") {
            self.metrics.pushgateway_url = Some(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut config = EtlConfig::default();
        config
            .apply_env(lookup(&[
                ("DB_BACKEND", "postgres"),
                ("DB_HOST", "db.internal"),
                ("DB_PORT", "6543"),
                ("DB_USER", "etl"),
                ("DB_PASSWORD", "secret"),
                ("DB_NAME", "warehouse"),
                ("ETL_SHEET_ID", "sheet-1"),
                ("ETL_LOG_DIR", ""),
            ]))
            .unwrap();

        assert_eq!(config.database.backend, DbBackend::Postgres);
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.name, "warehouse");
        // empty values are ignored
        assert_eq!(config.logging.dir, PathBuf::from("logs"));
        assert!(!format!("{:?}", config.database).contains("secret"));
        assert_eq!(
            config.source.kind().unwrap(),
            SourceKind::GoogleSheets {
                spreadsheet_id: "sheet-1".to_string()
            }
        );
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let mut config = EtlConfig::default();
        let err = config.apply_env(lookup(&[("DB_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_toml_file_and_source_precedence() {
        let config: EtlConfig = toml::from_str(
            r#"
            [database]
            backend = "sqlite"
            path = "/tmp/etl-test.db"

            [source]
            spreadsheet_id = "abc"
            csv_dir = "fixtures"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/etl-test.db"));
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.source.timeout_seconds, 30);
        assert_eq!(
            config.source.kind().unwrap(),
            SourceKind::CsvDirectory(PathBuf::from("fixtures"))
        );
    }

    #[test]
    fn test_credentials_precedence() {
        let mut config = EtlConfig::default();
        config
            .apply_env(lookup(&[
                ("ETL_SHEETS_TOKEN", "ya29.secret"),
                ("ETL_SHEETS_API_KEY", "key"),
                ("ETL_PUSHGATEWAY_URL", "http://localhost:9091"),
            ]))
            .unwrap();
        assert_eq!(
            config.source.credentials().unwrap(),
            SheetsCredentials::AccessToken("ya29.secret".to_string())
        );
        assert!(!format!("{:?}", config.source).contains("ya29.secret"));
        assert_eq!(config.metrics.pushgateway_url.as_deref(), Some("http://localhost:9091"));

        config
            .apply_env(lookup(&[("GOOGLE_APPLICATION_CREDENTIALS", "/secrets/sa.json")]))
            .unwrap();
        assert_eq!(
            config.source.credentials().unwrap(),
            SheetsCredentials::ServiceAccount(PathBuf::from("/secrets/sa.json"))
        );
    }

    #[test]
    fn test_missing_source_is_config_error() {
        assert!(matches!(
            EtlConfig::default().source.kind(),
            Err(EtlError::Config(_))
        ));
    }
}
