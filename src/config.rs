use std::path::PathBuf;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::constants::DEFAULT_PORT;

/// Database backends recognised in `DATABASE_URL`. Only SQLite is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
    MySql,
    Unknown,
}

impl DatabaseKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseKind::Sqlite => "SQLite",
            DatabaseKind::Postgres => "PostgreSQL",
            DatabaseKind::MySql => "MySQL",
            DatabaseKind::Unknown => "Unknown",
        }
    }
}

/// Process configuration, read once at start-up from the environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub app_version: String,
    pub port: u16,
    pub database_url: String,
    pub data_dir: PathBuf,
    pub secret_key: String,
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
    pub default_storage_limit_mb: i64,
    pub session_timeout: i64,
    pub max_login_attempts: i64,
    pub lockout_duration: i64,
    pub enable_registration: bool,
    pub force_https: bool,
    pub custom_domain: String,
    pub update_check_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub cors_allowed_methods: Vec<String>,
    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Image Scale Hub".to_owned(),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            port: DEFAULT_PORT,
            database_url: "sqlite://data/imagehub.db".to_owned(),
            data_dir: PathBuf::from("data"),
            secret_key: "dev-secret-key-change-in-production".to_owned(),
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: ["jpg", "jpeg", "png", "webp", "gif", "bmp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            default_storage_limit_mb: 100,
            session_timeout: 1800,
            max_login_attempts: 5,
            lockout_duration: 900,
            enable_registration: false,
            force_https: false,
            custom_domain: String::new(),
            update_check_url: String::new(),
            cors_allowed_origins: Vec::new(),
            cors_allowed_methods: vec!["GET".to_owned()],
            admin_username: "admin".to_owned(),
            admin_email: "admin@localhost".to_owned(),
            admin_password: "admin123".to_owned(),
        }
    }
}

impl AppConfig {
    /// Reads the configuration from environment variables (case-insensitive keys).
    pub fn load() -> Result<Self, ConfigError> {
        let environment = Environment::default()
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("allowed_extensions")
            .with_list_parse_key("cors_allowed_origins")
            .with_list_parse_key("cors_allowed_methods");

        let config = Config::builder().add_source(environment).build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mut app_config: AppConfig = config.try_deserialize()?;
        app_config.database_url = normalize_database_url(&app_config.database_url);
        app_config.allowed_extensions = app_config
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Ok(app_config)
    }

    pub fn database_kind(&self) -> DatabaseKind {
        database_kind(&self.database_url)
    }

    /// Filesystem path of the SQLite database, if it is file-backed.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        sqlite_path(&self.database_url)
    }

    pub fn default_storage_limit_bytes(&self) -> i64 {
        self.default_storage_limit_mb * 1024 * 1024
    }
}

/// Heroku-style `postgres://` URLs are rewritten to `postgresql://`.
pub fn normalize_database_url(url: &str) -> String {
    match url.strip_prefix("postgres://") {
        Some(rest) => format!("postgresql://{}", rest),
        None => url.to_owned(),
    }
}

pub fn database_kind(url: &str) -> DatabaseKind {
    if url.starts_with("sqlite:") {
        DatabaseKind::Sqlite
    } else if url.starts_with("postgresql://") || url.starts_with("postgres://") {
        DatabaseKind::Postgres
    } else if url.starts_with("mysql") {
        DatabaseKind::MySql
    } else {
        DatabaseKind::Unknown
    }
}

pub fn sqlite_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_urls_are_normalized() {
        assert_eq!(
            normalize_database_url("postgres://u:p@db:5432/app"),
            "postgresql://u:p@db:5432/app"
        );
        assert_eq!(
            normalize_database_url("sqlite://data/imagehub.db"),
            "sqlite://data/imagehub.db"
        );
    }

    #[test]
    fn database_kinds_are_detected() {
        assert_eq!(database_kind("sqlite::memory:"), DatabaseKind::Sqlite);
        assert_eq!(database_kind("postgresql://x/y"), DatabaseKind::Postgres);
        assert_eq!(database_kind("mysql+pymysql://x/y"), DatabaseKind::MySql);
        assert_eq!(database_kind("redis://x"), DatabaseKind::Unknown);
    }

    #[test]
    fn sqlite_paths_are_extracted() {
        assert_eq!(
            sqlite_path("sqlite:///app/data/users.db"),
            Some(PathBuf::from("/app/data/users.db"))
        );
        assert_eq!(
            sqlite_path("sqlite://data/imagehub.db?mode=rwc"),
            Some(PathBuf::from("data/imagehub.db"))
        );
        assert_eq!(sqlite_path("sqlite::memory:"), None);
        assert_eq!(sqlite_path("postgresql://x/y"), None);
    }

    #[test]
    fn overrides_replace_defaults() {
        let config = Config::builder()
            .set_override("port", 8080)
            .unwrap()
            .set_override("database_url", "postgres://db/app")
            .unwrap()
            .set_override("allowed_extensions", vec![".PNG", " jpg"])
            .unwrap()
            .build()
            .unwrap();

        let app_config = AppConfig::from_config(config).unwrap();
        assert_eq!(app_config.port, 8080);
        assert_eq!(app_config.database_url, "postgresql://db/app");
        assert_eq!(app_config.allowed_extensions, vec!["png", "jpg"]);
        assert_eq!(app_config.session_timeout, 1800);
        assert_eq!(app_config.database_kind(), DatabaseKind::Postgres);
    }
}
