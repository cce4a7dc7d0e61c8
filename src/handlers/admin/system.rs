use std::collections::HashSet;

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    cleaner::prune_pending,
    constants::STORAGE_CAPACITY_BYTES,
    error::{AppError, AppResult},
    models::{audit, image, session, setting, user},
    server::ServerState,
    util::{
        audit as audit_log, auth::AdminUser, image::format_file_size, path::get_backup_path,
        security::ClientInfo,
    },
};

/// Hides the password part of a database URL.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => url.to_owned(),
    }
}

pub async fn system_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let database_size = match state.config.sqlite_path() {
        Some(path) => tokio::fs::metadata(path).await.map(|m| m.len()).ok(),
        None => None,
    };
    let totals = image::totals(&state.pool, None).await?;
    let used = totals.size.max(0);
    let percent = (used as f64 / STORAGE_CAPACITY_BYTES as f64 * 10000.0).round() / 100.0;

    Ok(Json(json!({
        "app_version": state.config.app_version,
        "database": {
            "type": state.config.database_kind().display_name(),
            "url": redact_url(&state.config.database_url),
            "size": database_size,
            "size_display": database_size.map(format_file_size),
        },
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "storage": {
            "used": used,
            "used_display": format_file_size(used as u64),
            "capacity": STORAGE_CAPACITY_BYTES,
            "capacity_display": format_file_size(STORAGE_CAPACITY_BYTES as u64),
            "percent": percent,
            "total_images": totals.count,
        },
    })))
}

pub async fn check_updates_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> Json<Value> {
    Json(json!({
        "success": true,
        "current_version": state.config.app_version,
        "latest_version": state.config.app_version,
        "update_available": false,
        "download_url": state.config.update_check_url,
    }))
}

pub async fn backup_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
) -> AppResult<Json<Value>> {
    let database = state
        .config
        .sqlite_path()
        .filter(|path| path.is_file())
        .ok_or_else(|| AppError::bad_request("Database file not found"))?;

    let directory = get_backup_path(&state.config.data_dir);
    tokio::fs::create_dir_all(&directory).await?;
    let filename = format!("backup_{}.db", Utc::now().format("%Y%m%d_%H%M%S"));
    let target = directory.join(&filename);
    if target.exists() {
        return Err(AppError::Conflict(
            "A backup was just created, try again in a second".to_owned(),
        ));
    }

    sqlx::query("VACUUM INTO ?")
        .bind(target.to_string_lossy().into_owned())
        .execute(&state.pool)
        .await?;
    let size = tokio::fs::metadata(&target).await?.len();
    log::info!("Backed up {:?} to {:?}", database, target);

    audit_log::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "DB_BACKUP",
        &format!("Created backup {}", filename),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Backup created: {}", filename),
        "filename": filename,
        "size": size,
    })))
}

pub async fn cleanup_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
) -> AppResult<Json<Value>> {
    let keep: HashSet<String> = session::referenced_uploads(&state.pool)
        .await?
        .into_iter()
        .collect();
    let data_dir = state.config.data_dir.clone();
    let deleted = tokio::task::spawn_blocking(move || prune_pending(&data_dir, None, &keep))
        .await
        .map_err(|err| AppError::Internal(err.to_string()))??;

    audit_log::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "CLEANUP_IMAGES",
        &format!("Removed {} orphaned uploads", deleted),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Cleaned up {} orphaned files", deleted),
        "deleted": deleted,
    })))
}

pub async fn reset_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
) -> AppResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    let images = image::delete_all(&mut *tx).await?;
    let users = user::delete_non_admins(&mut *tx).await?;
    setting::delete_all(&mut *tx).await?;
    audit::delete_all(&mut *tx).await?;
    setting::seed_defaults(&mut *tx).await?;
    tx.commit().await?;
    log::warn!(
        "Factory reset by {}: {} images and {} users removed",
        admin.user.username,
        images,
        users
    );

    audit_log::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "FACTORY_RESET",
        &format!("Removed {} images and {} users", images, users),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Factory reset completed",
    })))
}
