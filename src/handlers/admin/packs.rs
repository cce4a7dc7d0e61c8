use axum::{
    extract::{Path, State},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::pack::{self, DEFAULT_ICON},
    server::ServerState,
    util::{audit, auth::AdminUser, image::PackConfig, security::ClientInfo},
};

#[derive(Deserialize)]
pub struct PackForm {
    name: Option<String>,
    icon: Option<String>,
    config: Option<String>,
}

struct ValidPack {
    name: String,
    icon: String,
    config: String,
    outputs: usize,
}

impl PackForm {
    fn validate(&self) -> AppResult<ValidPack> {
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(AppError::bad_request("Pack name is required"));
        }
        let icon = match self.icon.as_deref().map(str::trim) {
            Some(icon) if !icon.is_empty() => icon,
            _ => DEFAULT_ICON,
        };
        let config = match self.config.as_deref().map(str::trim) {
            Some(config) if !config.is_empty() => config,
            _ => "[]",
        };
        let parsed = PackConfig::parse(config)
            .map_err(|_| AppError::bad_request("Invalid JSON configuration"))?;

        Ok(ValidPack {
            name: name.to_owned(),
            icon: icon.to_owned(),
            config: config.to_owned(),
            outputs: parsed.outputs.len(),
        })
    }
}

pub async fn list_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
) -> AppResult<Json<Value>> {
    let packs = pack::list_all(&state.pool).await?;
    Ok(Json(json!({ "packs": packs })))
}

pub async fn create_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<PackForm>,
) -> AppResult<Json<Value>> {
    let valid = form.validate()?;
    let id = pack::create(&state.pool, &valid.name, &valid.icon, &valid.config).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PACK_CREATED",
        &format!("Created pack '{}' with {} outputs", valid.name, valid.outputs),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Pack created successfully",
        "id": id,
    })))
}

pub async fn update_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<PackForm>,
) -> AppResult<Json<Value>> {
    let valid = form.validate()?;
    if !pack::update(&state.pool, id, &valid.name, &valid.icon, &valid.config).await? {
        return Err(AppError::not_found("Pack not found"));
    }

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PACK_UPDATED",
        &format!("Updated pack '{}' with {} outputs", valid.name, valid.outputs),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Pack updated successfully",
    })))
}

pub async fn toggle_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let is_active = pack::toggle(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Pack not found"))?;

    let status = if is_active { "activated" } else { "deactivated" };
    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PACK_TOGGLED",
        &format!("Pack {} {}", id, status),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": format!("Pack {} successfully", status),
        "is_active": is_active,
    })))
}

pub async fn delete_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let existing = pack::find(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Pack not found"))?;
    pack::delete(&state.pool, id).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "PACK_DELETED",
        &format!("Deleted pack '{}'", existing.name),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Pack deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support::{create_user, get, login_cookie, post_form, send, test_state};

    const SOCIAL: &str = "name=Social&config=%7B%22outputs%22%3A%5B%7B%22name%22%3A%22square%22%2C%22width%22%3A1080%2C%22height%22%3A1080%7D%5D%7D";

    #[tokio::test]
    async fn packs_are_created_with_valid_configuration() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let created = send(&state, post_form("/admin/packs/create", Some(&cookie), SOCIAL)).await;
        assert_eq!(created.status, StatusCode::OK);
        let id = created.json()["id"].as_i64().unwrap();

        let social = pack::find(&state.pool, id).await.unwrap().unwrap();
        assert_eq!(social.icon, DEFAULT_ICON);
        assert!(social.is_active);
        assert_eq!(social.parsed_config().unwrap().outputs[0].width, 1080);

        let listed = send(&state, get("/admin/packs", Some(&cookie))).await.json();
        assert_eq!(listed["packs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn broken_configuration_is_rejected() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let invalid = send(
            &state,
            post_form("/admin/packs/create", Some(&cookie), "name=Bad&config=%7Bnope"),
        )
        .await;
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.json()["error"], "Invalid JSON configuration");

        let unnamed =
            send(&state, post_form("/admin/packs/create", Some(&cookie), "config=%5B%5D")).await;
        assert_eq!(unnamed.json()["error"], "Pack name is required");

        // A blank configuration defaults to an empty recipe
        let empty = send(&state, post_form("/admin/packs/create", Some(&cookie), "name=Empty")).await;
        assert_eq!(empty.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn packs_are_updated_toggled_and_deleted() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;
        let id = pack::create(&state.pool, "Social", "📦", "[]").await.unwrap();

        let updated = send(
            &state,
            post_form(
                &format!("/admin/packs/{}/update", id),
                Some(&cookie),
                "name=Socials&icon=%F0%9F%93%B8&config=%5B%5D",
            ),
        )
        .await;
        assert_eq!(updated.status, StatusCode::OK);
        let socials = pack::find(&state.pool, id).await.unwrap().unwrap();
        assert_eq!(socials.name, "Socials");
        assert_eq!(socials.icon, "📸");

        let toggled = send(
            &state,
            post_form(&format!("/admin/packs/{}/toggle", id), Some(&cookie), ""),
        )
        .await
        .json();
        assert_eq!(toggled["is_active"], false);
        assert!(pack::list_active(&state.pool).await.unwrap().is_empty());

        let deleted = send(
            &state,
            post_form(&format!("/admin/packs/{}/delete", id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(deleted.status, StatusCode::OK);

        let missing = send(
            &state,
            post_form(&format!("/admin/packs/{}/update", id), Some(&cookie), "name=Ghost"),
        )
        .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }
}
