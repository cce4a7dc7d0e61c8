//! Administration endpoints. Every handler takes an [`AdminUser`], so non-admins
//! are rejected with 403 before any work is done.

mod packs;
mod presets;
mod settings;
mod system;
mod users;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::LOGS_PER_PAGE,
    error::AppResult,
    models::{audit, image, page_offset, user},
    server::ServerState,
    util::{auth::AdminUser, image::format_file_size},
};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/users", get(users::list_handler))
        .route("/users/create", post(users::create_handler))
        .route("/users/:id/update", post(users::update_handler))
        .route("/users/:id/reset-password", post(users::reset_password_handler))
        .route("/users/:id/delete", post(users::delete_handler))
        .route("/users/:id/toggle-admin", post(users::toggle_admin_handler))
        .route("/presets", get(presets::list_handler))
        .route("/presets/create", post(presets::create_handler))
        .route("/presets/:id/update", post(presets::update_handler))
        .route("/presets/:id/toggle", post(presets::toggle_handler))
        .route("/presets/:id/delete", post(presets::delete_handler))
        .route("/packs", get(packs::list_handler))
        .route("/packs/create", post(packs::create_handler))
        .route("/packs/:id/update", post(packs::update_handler))
        .route("/packs/:id/toggle", post(packs::toggle_handler))
        .route("/packs/:id/delete", post(packs::delete_handler))
        .route("/security", get(settings::security_handler))
        .route("/security/update", post(settings::update_security_handler))
        .route("/storage", get(settings::storage_handler))
        .route("/storage/settings", post(settings::update_storage_handler))
        .route("/storage/user", post(settings::user_storage_handler))
        .route("/settings", get(settings::site_handler))
        .route("/settings/update", post(settings::update_site_handler))
        .route("/branding", get(settings::branding_handler))
        .route("/branding/update", post(settings::update_branding_handler))
        .route("/logs", get(logs_handler))
        .route("/statistics", get(statistics_handler))
        .route("/system", get(system::system_handler))
        .route("/check-updates", get(system::check_updates_handler))
        .route("/backup-db", post(system::backup_handler))
        .route("/cleanup-images", post(system::cleanup_handler))
        .route("/reset-all", post(system::reset_handler))
}

#[derive(Deserialize)]
pub struct LogsQuery {
    page: Option<i64>,
    search: Option<String>,
    action: Option<String>,
}

async fn dashboard_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let totals = image::totals(&state.pool, None).await?;
    let new_users = user::count_since(&state.pool, Utc::now() - Duration::days(30)).await?;
    let avg_size_kb = if totals.count > 0 {
        (totals.size as f64 / totals.count as f64 / 1024.0 * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(Json(json!({
        "total_users": user::count(&state.pool).await?,
        "admin_users": user::count_admins(&state.pool).await?,
        "total_images": totals.count,
        "total_size": totals.size,
        "new_users": new_users,
        "recent_logs": audit::recent(&state.pool, 10).await?,
        "recent_users": user::recent(&state.pool, 5).await?,
        "storage_stats": {
            "total_images": totals.count,
            "total_size_mb": (totals.size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            "avg_size_kb": avg_size_kb,
        },
    })))
}

async fn logs_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<Value>> {
    let (page, _) = page_offset(query.page, LOGS_PER_PAGE);
    let search = query.search.as_deref().map(str::trim).unwrap_or_default();
    let action = query.action.as_deref().unwrap_or_default();

    let logs = audit::list(
        &state.pool,
        Some(search),
        Some(action),
        page,
        LOGS_PER_PAGE,
    )
    .await?;

    Ok(Json(json!({
        "logs": logs,
        "actions": audit::distinct_actions(&state.pool).await?,
        "search": search,
        "action_filter": action,
    })))
}

async fn statistics_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let totals = image::totals(&state.pool, None).await?;
    let since = Utc::now() - Duration::days(30);

    let mut user_activity: Vec<Value> = user::storage_overview(&state.pool)
        .await?
        .into_iter()
        .filter(|usage| usage.image_count > 0)
        .map(|usage| json!({ "username": usage.username, "image_count": usage.image_count }))
        .collect();
    user_activity.sort_by_key(|entry| std::cmp::Reverse(entry["image_count"].as_i64()));
    user_activity.truncate(10);

    Ok(Json(json!({
        "total_users": user::count(&state.pool).await?,
        "total_images": totals.count,
        "total_size": totals.size,
        "total_size_display": format_file_size(totals.size.max(0) as u64),
        "tool_stats": image::tool_usage(&state.pool, None).await?,
        "active_users": image::active_users_since(&state.pool, since).await?,
        "recent_logins": user::count_active_since(&state.pool, since).await?,
        "user_activity": user_activity,
        "pack_stats": image::pack_usage(&state.pool).await?,
    })))
}
