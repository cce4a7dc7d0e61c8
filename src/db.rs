use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::{
    config::AppConfig,
    models::{preset, setting, user},
    util::auth::hash_password,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT UNIQUE,
    password_hash TEXT NOT NULL,
    is_admin BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_login TEXT,
    failed_login_attempts INTEGER NOT NULL DEFAULT 0,
    locked_until TEXT,
    storage_limit INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS packs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    icon TEXT NOT NULL DEFAULT '📦',
    is_active BOOLEAN NOT NULL DEFAULT 1,
    config TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    pack_id INTEGER REFERENCES packs(id) ON DELETE SET NULL,
    original_filename TEXT NOT NULL,
    saved_filename TEXT NOT NULL,
    tool_used TEXT NOT NULL,
    width INTEGER,
    height INTEGER,
    file_size INTEGER,
    image_data BLOB NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_images_user_created ON images(user_id, created_at);

CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS size_presets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    icon TEXT NOT NULL DEFAULT '📐',
    is_active BOOLEAN NOT NULL DEFAULT 1,
    order_num INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    username TEXT,
    action TEXT NOT NULL,
    details TEXT,
    ip_address TEXT,
    user_agent TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log(created_at);

CREATE TABLE IF NOT EXISTS password_resets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    used BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    remember BOOLEAN NOT NULL DEFAULT 0,
    expires_at TEXT NOT NULL,
    pending_upload TEXT,
    pending_filename TEXT,
    created_at TEXT NOT NULL
);
"#;

/// Opens the SQLite database behind `database_url`, creating the file if needed.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(path) = crate::config::sqlite_path(database_url) {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// Creates missing tables and seeds defaults. Safe to run on every start.
pub async fn init(pool: &SqlitePool, config: &AppConfig) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;

    setting::seed_defaults(pool).await?;
    let seeded = preset::seed_defaults(pool).await?;
    if seeded > 0 {
        log::info!("Seeded {} default size presets", seeded);
    }
    seed_admin(pool, config).await?;

    Ok(())
}

async fn seed_admin(pool: &SqlitePool, config: &AppConfig) -> Result<(), sqlx::Error> {
    if user::count_admins(pool).await? > 0 {
        return Ok(());
    }

    let password_hash = match hash_password(&config.admin_password) {
        Err(err) => {
            log::error!("Unable to hash default admin password: {}", err);
            return Err(sqlx::Error::Protocol(err.to_string()));
        }
        Ok(hash) => hash,
    };
    let email = Some(config.admin_email.as_str()).filter(|email| !email.is_empty());

    user::create(
        pool,
        user::NewUser {
            username: &config.admin_username,
            email,
            password_hash: &password_hash,
            is_admin: true,
        },
    )
    .await?;

    log::info!("Created default admin user '{}'", config.admin_username);
    if config.admin_password == AppConfig::default().admin_password {
        log::warn!("The default admin password is in use. Change it after the first login!");
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap()
}
