use std::collections::HashMap;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, AppResult},
    handlers::{checkbox, number_field},
    models::{
        setting,
        user::{self, STORAGE_LIMIT_DEFAULT, STORAGE_LIMIT_UNLIMITED},
    },
    server::ServerState,
    util::{
        audit,
        auth::AdminUser,
        path::get_uploads_path,
        security::{sanitize_filename, split_extension, ClientInfo},
    },
};

const SECURITY_NUMBERS: [&str; 4] = [
    "max_login_attempts",
    "lockout_duration",
    "session_timeout",
    "max_file_size",
];

const SITE_TEXT_FIELDS: [&str; 6] = [
    "custom_domain",
    "default_role",
    "max_images_per_user",
    "session_timeout",
    "max_login_attempts",
    "lockout_duration",
];

const SITE_CHECKBOXES: [&str; 5] = [
    "ssl_redirect",
    "ssl_enabled",
    "allow_registration",
    "allow_password_reset",
    "require_strong_password",
];

const BRANDING_TEXT_FIELDS: [&str; 13] = [
    "app_name",
    "app_tagline",
    "copyright_text",
    "primary_color",
    "secondary_color",
    "accent_color",
    "bg_color",
    "login_title",
    "login_subtitle",
    "login_message",
    "twitter_url",
    "instagram_url",
    "github_url",
];

const BRANDING_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "ico"];

const DEFAULT_CUSTOM_LIMIT_MB: i64 = 100;

async fn settings_map(state: &ServerState) -> AppResult<Map<String, Value>> {
    Ok(setting::all(&state.pool)
        .await?
        .into_iter()
        .map(|entry| {
            let value = entry.value.map(Value::String).unwrap_or(Value::Null);
            (entry.key, value)
        })
        .collect())
}

fn mb(bytes: i64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

pub async fn security_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let effective = state.settings().await?;
    Ok(Json(json!({
        "settings": {
            "max_login_attempts": effective.max_login_attempts,
            "lockout_duration": effective.lockout_duration,
            "session_timeout": effective.session_timeout,
            "max_file_size": effective.max_file_size,
            "allowed_extensions": effective.allowed_extensions.join(","),
        },
    })))
}

pub async fn update_security_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<HashMap<String, String>>,
) -> AppResult<Json<Value>> {
    let mut updates = Vec::new();
    for key in SECURITY_NUMBERS {
        let Some(raw) = form.get(key).map(|value| value.trim()) else {
            continue;
        };
        match raw.parse::<i64>() {
            Ok(value) if value > 0 => updates.push((key, value.to_string())),
            _ => {
                return Err(AppError::bad_request(format!(
                    "{} must be a valid number",
                    key
                )))
            }
        }
    }
    if let Some(extensions) = form.get("allowed_extensions") {
        let normalized = extensions
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        if normalized.is_empty() {
            return Err(AppError::bad_request(
                "allowed_extensions must list at least one extension",
            ));
        }
        updates.push(("allowed_extensions", normalized));
    }

    for (key, value) in &updates {
        setting::set(&state.pool, key, value).await?;
    }

    let changed = updates
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ");
    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "SECURITY_UPDATED",
        &format!("Updated security settings: {}", changed),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Security settings updated successfully",
    })))
}

pub async fn storage_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let effective = state.settings().await?;
    let default_bytes = effective.default_storage_limit_bytes;

    let overview = user::storage_overview(&state.pool).await?;
    let total_used: i64 = overview.iter().map(|usage| usage.used).sum();
    let total_images: i64 = overview.iter().map(|usage| usage.image_count).sum();

    let users: Vec<Value> = overview
        .iter()
        .map(|usage| {
            let limit = match usage.storage_limit {
                STORAGE_LIMIT_UNLIMITED => None,
                STORAGE_LIMIT_DEFAULT => Some(default_bytes),
                bytes => Some(bytes),
            };
            let percent = limit
                .filter(|limit| *limit > 0)
                .map(|limit| (usage.used as f64 / limit as f64 * 1000.0).round() / 10.0);
            let limit_type = match usage.storage_limit {
                STORAGE_LIMIT_UNLIMITED => "unlimited",
                STORAGE_LIMIT_DEFAULT => "default",
                _ => "custom",
            };
            json!({
                "id": usage.id,
                "username": usage.username,
                "is_admin": usage.is_admin,
                "image_count": usage.image_count,
                "used": usage.used,
                "used_mb": mb(usage.used),
                "limit_type": limit_type,
                "limit_mb": limit.map(mb),
                "percent": percent,
            })
        })
        .collect();

    Ok(Json(json!({
        "total_used": total_used,
        "total_used_mb": mb(total_used),
        "total_images": total_images,
        "users": users,
        "settings": {
            "default_storage_limit_mb": default_bytes / (1024 * 1024),
            "max_upload_mb": effective.max_file_size / (1024 * 1024),
            "auto_delete_days": effective.auto_delete_days,
        },
    })))
}

#[derive(Deserialize)]
pub struct StorageSettingsForm {
    default_storage_limit_mb: Option<String>,
    max_upload_mb: Option<String>,
    auto_delete_days: Option<String>,
}

pub async fn update_storage_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<StorageSettingsForm>,
) -> AppResult<Json<Value>> {
    let effective = state.settings().await?;
    let default_mb: i64 = number_field(
        "default_storage_limit_mb",
        form.default_storage_limit_mb.as_deref(),
        effective.default_storage_limit_bytes / (1024 * 1024),
    )?;
    let upload_mb: i64 = number_field(
        "max_upload_mb",
        form.max_upload_mb.as_deref(),
        (effective.max_file_size / (1024 * 1024)) as i64,
    )?;
    let auto_delete_days: i64 = number_field(
        "auto_delete_days",
        form.auto_delete_days.as_deref(),
        effective.auto_delete_days,
    )?;
    if default_mb < 1 || upload_mb < 1 || auto_delete_days < 0 {
        return Err(AppError::bad_request("Storage values must be positive"));
    }

    setting::set(&state.pool, "default_storage_limit_mb", &default_mb.to_string()).await?;
    setting::set(
        &state.pool,
        "max_file_size",
        &(upload_mb * 1024 * 1024).to_string(),
    )
    .await?;
    setting::set(&state.pool, "auto_delete_days", &auto_delete_days.to_string()).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "STORAGE_SETTINGS_UPDATED",
        &format!(
            "Default limit {}MB, max upload {}MB, auto delete after {} days",
            default_mb, upload_mb, auto_delete_days
        ),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Storage settings updated successfully",
    })))
}

#[derive(Deserialize)]
pub struct UserStorageForm {
    user_id: Option<String>,
    limit_type: Option<String>,
    custom_limit_mb: Option<String>,
}

pub async fn user_storage_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<UserStorageForm>,
) -> AppResult<Json<Value>> {
    let user_id: i64 = number_field("user_id", form.user_id.as_deref(), 0)?;
    let target = user::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let (limit, description) = match form.limit_type.as_deref().unwrap_or("default") {
        "default" => (STORAGE_LIMIT_DEFAULT, "default".to_owned()),
        "unlimited" => (STORAGE_LIMIT_UNLIMITED, "unlimited".to_owned()),
        "custom" => {
            let custom_mb: i64 = number_field(
                "custom_limit_mb",
                form.custom_limit_mb.as_deref(),
                DEFAULT_CUSTOM_LIMIT_MB,
            )?;
            if custom_mb < 1 {
                return Err(AppError::bad_request("Custom limit must be at least 1 MB"));
            }
            (custom_mb * 1024 * 1024, format!("{}MB", custom_mb))
        }
        other => {
            return Err(AppError::bad_request(format!(
                "Unknown limit type '{}'",
                other
            )))
        }
    };

    user::set_storage_limit(&state.pool, target.id, limit).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_STORAGE_UPDATED",
        &format!("Storage limit for '{}' set to {}", target.username, description),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Storage limit updated for {}", target.username),
    })))
}

pub async fn site_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    Ok(Json(json!({ "settings": settings_map(&state).await? })))
}

pub async fn update_site_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<HashMap<String, String>>,
) -> AppResult<Json<Value>> {
    for key in SITE_TEXT_FIELDS {
        if let Some(value) = form.get(key) {
            setting::set(&state.pool, key, value.trim()).await?;
        }
    }
    // Unchecked boxes are absent from the form and must be cleared
    for key in SITE_CHECKBOXES {
        let value = if checkbox(form.get(key).map(String::as_str)) {
            "on"
        } else {
            ""
        };
        setting::set(&state.pool, key, value).await?;
    }

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "SETTINGS_UPDATED",
        "Updated site settings",
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Settings updated successfully",
    })))
}

pub async fn branding_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let mut settings = settings_map(&state).await?;
    if !settings.contains_key("app_name") {
        settings.insert("app_name".to_owned(), json!(state.config.app_name));
    }
    Ok(Json(json!({ "settings": settings })))
}

/// Branding asset read from the form, keyed by the setting it replaces.
struct BrandingAsset {
    key: &'static str,
    extension: String,
    data: Vec<u8>,
}

pub async fn update_branding_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let max_file_size = state.settings().await?.max_file_size;
    let mut texts = HashMap::new();
    let mut assets = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Err(err) => {
                log::error!("{}", err.body_text());
                return Err(match err.status() {
                    StatusCode::PAYLOAD_TOO_LARGE => {
                        AppError::PayloadTooLarge("File too large".to_owned())
                    }
                    _ => AppError::bad_request("Invalid form data"),
                });
            }
            Ok(None) => break,
            Ok(Some(field)) => field,
        };
        let name = field.name().unwrap_or_default().to_owned();
        let key = match name.as_str() {
            "logo" => "logo_url",
            "favicon" => "favicon_url",
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::bad_request("Invalid form data"))?;
                texts.insert(name, value);
                continue;
            }
        };

        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        let data = field
            .bytes()
            .await
            .map_err(|_| AppError::bad_request("Invalid form data"))?;
        if filename.is_empty() || data.is_empty() {
            continue;
        }
        let extension = split_extension(&filename)
            .1
            .trim_start_matches('.')
            .to_lowercase();
        if !BRANDING_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::bad_request(format!(
                "Invalid {} file type. Allowed: {}",
                name,
                BRANDING_EXTENSIONS.join(", ")
            )));
        }
        if data.len() > max_file_size {
            return Err(AppError::PayloadTooLarge(format!("The {} file is too large", name)));
        }
        assets.push(BrandingAsset {
            key,
            extension,
            data: data.to_vec(),
        });
    }

    for key in BRANDING_TEXT_FIELDS {
        if let Some(value) = texts.get(key) {
            setting::set(&state.pool, key, value.trim()).await?;
        }
    }

    let uploads = get_uploads_path(&state.config.data_dir);
    for (flag, key) in [("remove_logo", "logo_url"), ("remove_favicon", "favicon_url")] {
        if checkbox(texts.get(flag).map(String::as_str)) {
            setting::set(&state.pool, key, "").await?;
        }
    }
    if !assets.is_empty() {
        tokio::fs::create_dir_all(&uploads).await?;
    }
    for asset in &assets {
        let stem = asset.key.trim_end_matches("_url");
        let filename = format!("{}.{}", stem, asset.extension);
        tokio::fs::write(uploads.join(&filename), &asset.data).await?;
        setting::set(&state.pool, asset.key, &format!("/uploads/{}", filename)).await?;
        log::info!("Stored branding asset {}", filename);
    }

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "BRANDING_UPDATED",
        &format!("Updated branding ({} files)", assets.len()),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Branding updated successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::image::{self, NewImage, Tool},
        test_support::{
            create_user, get, login_cookie, multipart, png_bytes, post_form, send, test_state,
        },
    };

    #[tokio::test]
    async fn security_settings_are_validated() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let invalid = send(
            &state,
            post_form(
                "/admin/security/update",
                Some(&cookie),
                "max_login_attempts=many",
            ),
        )
        .await;
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            invalid.json()["error"],
            "max_login_attempts must be a valid number"
        );

        let updated = send(
            &state,
            post_form(
                "/admin/security/update",
                Some(&cookie),
                "max_login_attempts=3&lockout_duration=600&allowed_extensions=.PNG%2C+jpg",
            ),
        )
        .await;
        assert_eq!(updated.status, StatusCode::OK);

        let effective = state.settings().await.unwrap();
        assert_eq!(effective.max_login_attempts, 3);
        assert_eq!(effective.lockout_duration, 600);
        assert_eq!(effective.allowed_extensions, vec!["png", "jpg"]);

        let shown = send(&state, get("/admin/security", Some(&cookie))).await.json();
        assert_eq!(shown["settings"]["allowed_extensions"], "png,jpg");
    }

    #[tokio::test]
    async fn storage_overview_reports_usage_against_quota() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        let cookie = login_cookie(&state, &boss).await;
        let data = vec![0u8; 1024 * 1024];
        image::insert(
            &state.pool,
            &NewImage {
                user_id: jane.id,
                pack_id: None,
                original_filename: "photo.png",
                saved_filename: "photo-blur.png",
                tool: Tool::Blur,
                width: 10,
                height: 10,
                data: &data,
            },
        )
        .await
        .unwrap();

        let custom = send(
            &state,
            post_form(
                "/admin/storage/user",
                Some(&cookie),
                &format!("user_id={}&limit_type=custom&custom_limit_mb=4", jane.id),
            ),
        )
        .await;
        assert_eq!(custom.status, StatusCode::OK);

        let overview = send(&state, get("/admin/storage", Some(&cookie))).await.json();
        assert_eq!(overview["total_images"], 1);
        let row = overview["users"]
            .as_array()
            .unwrap()
            .iter()
            .find(|row| row["username"] == "jane")
            .unwrap()
            .clone();
        assert_eq!(row["limit_type"], "custom");
        assert_eq!(row["percent"], 25.0);

        let unlimited = send(
            &state,
            post_form(
                "/admin/storage/user",
                Some(&cookie),
                &format!("user_id={}&limit_type=unlimited", jane.id),
            ),
        )
        .await;
        assert_eq!(unlimited.status, StatusCode::OK);
        let jane = user::find_by_id(&state.pool, jane.id).await.unwrap().unwrap();
        assert_eq!(jane.storage_limit, STORAGE_LIMIT_UNLIMITED);
    }

    #[tokio::test]
    async fn storage_settings_are_stored_in_bytes() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let response = send(
            &state,
            post_form(
                "/admin/storage/settings",
                Some(&cookie),
                "default_storage_limit_mb=250&max_upload_mb=8&auto_delete_days=30",
            ),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);

        let effective = state.settings().await.unwrap();
        assert_eq!(effective.default_storage_limit_bytes, 250 * 1024 * 1024);
        assert_eq!(effective.max_file_size, 8 * 1024 * 1024);
        assert_eq!(effective.auto_delete_days, 30);
    }

    #[tokio::test]
    async fn unchecked_site_options_are_cleared() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        send(
            &state,
            post_form(
                "/admin/settings/update",
                Some(&cookie),
                "custom_domain=img.example.com&allow_registration=on",
            ),
        )
        .await;
        assert!(state.settings().await.unwrap().allow_registration);

        send(
            &state,
            post_form("/admin/settings/update", Some(&cookie), "custom_domain=img.example.com"),
        )
        .await;
        assert!(!state.settings().await.unwrap().allow_registration);

        let shown = send(&state, get("/admin/settings", Some(&cookie))).await.json();
        assert_eq!(shown["settings"]["custom_domain"], "img.example.com");
        assert_eq!(shown["settings"]["allow_registration"], "");
    }

    #[tokio::test]
    async fn branding_assets_are_served_from_uploads() {
        let (state, dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;
        let logo = png_bytes(8, 8);

        let response = send(
            &state,
            multipart(
                "/admin/branding/update",
                Some(&cookie),
                &[("logo", "Brand.PNG", &logo)],
                &[("app_name", "Pixel Works"), ("primary_color", "#123456")],
            ),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            setting::get(&state.pool, "logo_url").await.unwrap().as_deref(),
            Some("/uploads/logo.png")
        );
        assert!(dir.path().join("uploads/logo.png").exists());

        let served = send(&state, get("/uploads/logo.png", None)).await;
        assert_eq!(served.status, StatusCode::OK);

        let public = send(&state, get("/api/settings", None)).await.json();
        assert_eq!(public["settings"]["app_name"], "Pixel Works");

        let rejected = send(
            &state,
            multipart(
                "/admin/branding/update",
                Some(&cookie),
                &[("favicon", "icon.exe", b"MZ")],
                &[],
            ),
        )
        .await;
        assert_eq!(rejected.status, StatusCode::BAD_REQUEST);

        let removed = send(
            &state,
            multipart(
                "/admin/branding/update",
                Some(&cookie),
                &[],
                &[("remove_logo", "on")],
            ),
        )
        .await;
        assert_eq!(removed.status, StatusCode::OK);
        assert_eq!(
            setting::get(&state.pool, "logo_url").await.unwrap().as_deref(),
            Some("")
        );
    }
}
