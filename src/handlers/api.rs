use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::{API_MAX_PER_PAGE, FILES_PER_PAGE},
    error::{AppError, AppResult},
    handlers::health::database_healthy,
    models::{image, pack, page_offset, preset, setting},
    server::ServerState,
    util::{audit, auth::CurrentUser, security::ClientInfo},
};

#[derive(Deserialize)]
pub struct ImagesQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    tool: Option<String>,
}

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/presets", get(presets_handler))
        .route("/packs", get(packs_handler))
        .route("/images", get(images_handler))
        .route("/images/:id", get(image_handler).delete(delete_image_handler))
        .route("/stats", get(stats_handler))
        .route("/settings", get(settings_handler))
        .route("/health", get(health_handler))
        .route("/upload-url", post(upload_url_handler))
}

async fn presets_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_presets", &client, 100).await?;
    let presets = preset::list_active(&state.pool).await?;
    Ok(Json(json!({ "success": true, "presets": presets })))
}

async fn packs_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_packs", &client, 100).await?;
    let packs = pack::list_active(&state.pool).await?;
    Ok(Json(json!({ "success": true, "packs": packs })))
}

async fn images_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Query(query): Query<ImagesQuery>,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_images", &client, 200).await?;

    let per_page = query
        .per_page
        .unwrap_or(FILES_PER_PAGE)
        .clamp(1, API_MAX_PER_PAGE);
    let (page, _) = page_offset(query.page, per_page);
    let tool = query
        .tool
        .as_deref()
        .filter(|tool| !tool.is_empty() && *tool != "all");

    let images =
        image::list_for_user(&state.pool, current.user.id, None, tool, page, per_page).await?;

    Ok(Json(json!({
        "success": true,
        "images": images.items,
        "pagination": {
            "page": images.page,
            "per_page": images.per_page,
            "total": images.total,
            "pages": images.pages,
            "has_next": images.has_next,
            "has_prev": images.has_prev,
        },
    })))
}

async fn image_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_image", &client, 200).await?;

    let image = image::find_summary(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    if image.user_id != current.user.id && !current.user.is_admin {
        return Err(AppError::forbidden("Permission denied"));
    }
    Ok(Json(json!({ "success": true, "image": image })))
}

async fn delete_image_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_delete_image", &client, 50).await?;

    let image = image::find_summary(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    if image.user_id != current.user.id && !current.user.is_admin {
        return Err(AppError::forbidden("Permission denied"));
    }

    image::delete(&state.pool, id).await?;
    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "IMAGE_DELETED",
        &format!("Deleted {} via API", image.saved_filename),
    )
    .await;
    Ok(Json(json!({
        "success": true,
        "message": "Image deleted successfully",
    })))
}

async fn stats_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_stats", &client, 50).await?;

    let user_id = Some(current.user.id);
    let totals = image::totals(&state.pool, user_id).await?;
    let recent = image::count_since(&state.pool, user_id, Utc::now() - Duration::days(7)).await?;
    let breakdown: BTreeMap<String, i64> = image::tool_usage(&state.pool, user_id)
        .await?
        .into_iter()
        .map(|usage| (usage.tool_used, usage.count))
        .collect();

    Ok(Json(json!({
        "success": true,
        "stats": {
            "total_images": totals.count,
            "total_size": totals.size,
            "recent_images": recent,
            "tool_breakdown": breakdown,
        },
    })))
}

async fn settings_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_settings", &client, 50).await?;

    let effective = state.settings().await?;
    let mut settings = serde_json::Map::new();
    for key in setting::PUBLIC_KEYS {
        let value = match (key, setting::get(&state.pool, key).await?) {
            (_, Some(value)) => Value::String(value),
            ("app_name", None) => Value::String(state.config.app_name.clone()),
            (_, None) => Value::Null,
        };
        settings.insert(key.to_owned(), value);
    }
    settings.insert("max_file_size".to_owned(), json!(effective.max_file_size));
    settings.insert(
        "allowed_extensions".to_owned(),
        json!(effective.allowed_extensions),
    );
    settings.insert("version".to_owned(), json!(state.config.app_version));

    Ok(Json(json!({ "success": true, "settings": settings })))
}

async fn health_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
) -> AppResult<(StatusCode, Json<Value>)> {
    state.rate_limit("api_health", &client, 1000).await?;

    let healthy = database_healthy(&state.pool).await;
    let status = if healthy { "healthy" } else { "unhealthy" };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((
        code,
        Json(json!({
            "status": status,
            "timestamp": Utc::now().to_rfc3339(),
            "version": state.config.app_version,
            "database": status,
        })),
    ))
}

async fn upload_url_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    _current: CurrentUser,
) -> AppResult<Json<Value>> {
    state.rate_limit("api_upload_url", &client, 50).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Direct upload is not available, post the file to /upload",
        "upload_method": "form_post",
    })))
}
