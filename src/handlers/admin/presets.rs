use axum::{
    extract::{Path, State},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::{PRESET_MAX_DIMENSION, PRESET_MIN_DIMENSION},
    error::{AppError, AppResult},
    handlers::number_field,
    models::preset::{self, PresetFields, DEFAULT_ICON},
    server::ServerState,
    util::{audit, auth::AdminUser, security::ClientInfo},
};

#[derive(Deserialize)]
pub struct PresetForm {
    name: Option<String>,
    width: Option<String>,
    height: Option<String>,
    icon: Option<String>,
    order_num: Option<String>,
}

/// Validated preset input. `order_num` stays `None` when the form left it blank.
struct ValidPreset {
    name: String,
    width: i64,
    height: i64,
    icon: String,
    order_num: Option<i64>,
}

impl PresetForm {
    fn validate(&self) -> AppResult<ValidPreset> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        let width = self.width.as_deref().map(str::trim).unwrap_or_default();
        let height = self.height.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || width.is_empty() || height.is_empty() {
            return Err(AppError::bad_request("All fields are required"));
        }

        let width: i64 = number_field("width", Some(width), 0)?;
        let height: i64 = number_field("height", Some(height), 0)?;
        let range = PRESET_MIN_DIMENSION..=PRESET_MAX_DIMENSION;
        if !range.contains(&width) || !range.contains(&height) {
            return Err(AppError::bad_request(format!(
                "Dimensions must be between {} and {} pixels",
                PRESET_MIN_DIMENSION, PRESET_MAX_DIMENSION
            )));
        }

        let icon = match self.icon.as_deref().map(str::trim) {
            Some(icon) if !icon.is_empty() => icon.to_owned(),
            _ => DEFAULT_ICON.to_owned(),
        };
        let order_num = match self.order_num.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(number_field("order_num", Some(raw), 0)?),
            _ => None,
        };

        Ok(ValidPreset {
            name: name.to_owned(),
            width,
            height,
            icon,
            order_num,
        })
    }
}

pub async fn list_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let presets = preset::list_all(&state.pool).await?;
    Ok(Json(json!({ "presets": presets })))
}

pub async fn create_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<PresetForm>,
) -> AppResult<Json<Value>> {
    let valid = form.validate()?;
    let order_num = match valid.order_num {
        Some(order_num) => order_num,
        None => preset::next_order(&state.pool).await?,
    };

    let id = preset::create(
        &state.pool,
        &PresetFields {
            name: &valid.name,
            width: valid.width,
            height: valid.height,
            icon: &valid.icon,
            order_num,
        },
    )
    .await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PRESET_CREATED",
        &format!("Created preset '{}' ({}x{})", valid.name, valid.width, valid.height),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Preset created successfully",
        "id": id,
    })))
}

pub async fn update_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<PresetForm>,
) -> AppResult<Json<Value>> {
    let existing = preset::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Preset not found"))?;
    let valid = form.validate()?;

    preset::update(
        &state.pool,
        id,
        &PresetFields {
            name: &valid.name,
            width: valid.width,
            height: valid.height,
            icon: &valid.icon,
            order_num: valid.order_num.unwrap_or(existing.order_num),
        },
    )
    .await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PRESET_UPDATED",
        &format!("Updated preset '{}' ({}x{})", valid.name, valid.width, valid.height),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Preset updated successfully",
    })))
}

pub async fn toggle_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let is_active = preset::toggle(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Preset not found"))?;

    let status = if is_active { "activated" } else { "deactivated" };
    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PRESET_TOGGLED",
        &format!("Preset {} {}", id, status),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Preset {} successfully", status),
        "is_active": is_active,
    })))
}

pub async fn delete_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let existing = preset::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Preset not found"))?;
    preset::delete(&state.pool, id).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PRESET_DELETED",
        &format!("Deleted preset '{}'", existing.name),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Preset deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support::{create_user, get, login_cookie, post_form, send, test_state};

    #[tokio::test]
    async fn presets_are_created_at_the_end_of_the_list() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let created = send(
            &state,
            post_form(
                "/admin/presets/create",
                Some(&cookie),
                "name=Banner&width=1600&height=400",
            ),
        )
        .await;
        assert_eq!(created.status, StatusCode::OK);
        let id = created.json()["id"].as_i64().unwrap();

        let banner = preset::find(&state.pool, id).await.unwrap().unwrap();
        assert_eq!(banner.icon, DEFAULT_ICON);
        assert_eq!(banner.order_num, 13);

        let listed = send(&state, get("/admin/presets", Some(&cookie))).await.json();
        assert_eq!(listed["presets"].as_array().unwrap().len(), 13);
    }

    #[tokio::test]
    async fn dimensions_are_bounded() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        for body in [
            "name=Tiny&width=99&height=400",
            "name=Huge&width=400&height=4001",
        ] {
            let response =
                send(&state, post_form("/admin/presets/create", Some(&cookie), body)).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(
                response.json()["error"],
                "Dimensions must be between 100 and 4000 pixels"
            );
        }

        let missing =
            send(&state, post_form("/admin/presets/create", Some(&cookie), "name=Half")).await;
        assert_eq!(missing.json()["error"], "All fields are required");
    }

    #[tokio::test]
    async fn presets_are_updated_toggled_and_deleted() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;
        let square = preset::list_all(&state.pool).await.unwrap()[0].clone();

        let updated = send(
            &state,
            post_form(
                &format!("/admin/presets/{}/update", square.id),
                Some(&cookie),
                "name=Big+Square&width=2000&height=2000&icon=%E2%AC%9B",
            ),
        )
        .await;
        assert_eq!(updated.status, StatusCode::OK);
        let changed = preset::find(&state.pool, square.id).await.unwrap().unwrap();
        assert_eq!(changed.name, "Big Square");
        assert_eq!(changed.icon, "⬛");
        assert_eq!(changed.order_num, square.order_num);

        let toggled = send(
            &state,
            post_form(&format!("/admin/presets/{}/toggle", square.id), Some(&cookie), ""),
        )
        .await
        .json();
        assert_eq!(toggled["is_active"], false);
        assert_eq!(toggled["message"], "Preset deactivated successfully");
        assert_eq!(preset::list_active(&state.pool).await.unwrap().len(), 11);

        let deleted = send(
            &state,
            post_form(&format!("/admin/presets/{}/delete", square.id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(deleted.status, StatusCode::OK);
        assert!(preset::find(&state.pool, square.id).await.unwrap().is_none());

        let again = send(
            &state,
            post_form(&format!("/admin/presets/{}/toggle", square.id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(again.status, StatusCode::NOT_FOUND);
    }
}
