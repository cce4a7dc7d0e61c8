use axum::{
    extract::{Path, Query, State},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::USERS_PER_PAGE,
    error::{AppError, AppResult},
    handlers::{auth::ensure_strong_password, checkbox},
    models::{
        page_offset, session,
        user::{self, NewUser, User},
    },
    server::ServerState,
    util::{
        audit,
        auth::{hash_password, AdminUser},
        security::{validate_email, validate_username, ClientInfo},
    },
};

#[derive(Deserialize)]
pub struct UsersQuery {
    page: Option<i64>,
    search: Option<String>,
    role: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    is_admin: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateUserForm {
    username: Option<String>,
    email: Option<String>,
    is_admin: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    password: String,
}

async fn find_user(state: &ServerState, id: i64) -> AppResult<User> {
    user::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

fn hash(password: &str) -> AppResult<String> {
    hash_password(password).map_err(|err| AppError::Internal(err.to_string()))
}

/// Rejects changes that would leave the hub without an administrator.
async fn ensure_not_last_admin(state: &ServerState, target: &User, message: &str) -> AppResult<()> {
    if target.is_admin && user::count_admins(&state.pool).await? <= 1 {
        return Err(AppError::bad_request(message));
    }
    Ok(())
}

pub async fn list_handler(
    State(state): State<ServerState>,
    _admin: AdminUser,
    Query(query): Query<UsersQuery>,
) -> AppResult<Json<Value>> {
    let (page, _) = page_offset(query.page, USERS_PER_PAGE);
    let search = query.search.as_deref().map(str::trim).unwrap_or_default();
    let role = query.role.as_deref().unwrap_or_default();
    let is_admin = match role {
        "admin" => Some(true),
        "user" => Some(false),
        _ => None,
    };

    let users = user::list(&state.pool, Some(search), is_admin, page, USERS_PER_PAGE).await?;
    Ok(Json(json!({
        "users": users,
        "search": search,
        "role_filter": role,
    })))
}

pub async fn create_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Form(form): Form<CreateUserForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("admin_create_user", &client, 20).await?;

    let username = form.username.trim();
    let email = form.email.trim().to_lowercase();
    if username.is_empty() || email.is_empty() || form.password.is_empty() {
        return Err(AppError::bad_request("All fields are required"));
    }
    if !validate_username(username) {
        return Err(AppError::bad_request(
            "Username must be 3-20 characters of letters, numbers, and underscores",
        ));
    }
    if !validate_email(&email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    if user::username_taken(&state.pool, username, None).await? {
        return Err(AppError::Conflict("Username already exists".to_owned()));
    }
    if user::email_taken(&state.pool, &email, None).await? {
        return Err(AppError::Conflict("Email already exists".to_owned()));
    }
    ensure_strong_password(&form.password)?;

    let is_admin = checkbox(form.is_admin.as_deref());
    let password_hash = hash(&form.password)?;
    user::create(
        &state.pool,
        NewUser {
            username,
            email: Some(&email),
            password_hash: &password_hash,
            is_admin,
        },
    )
    .await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_CREATED",
        &format!("Created user '{}' (admin: {})", username, is_admin),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "User created successfully",
    })))
}

pub async fn update_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<UpdateUserForm>,
) -> AppResult<Json<Value>> {
    let target = find_user(&state, id).await?;

    let username = match form.username.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() && name != target.username => {
            if !validate_username(name) {
                return Err(AppError::bad_request(
                    "Username must be 3-20 characters of letters, numbers, and underscores",
                ));
            }
            if user::username_taken(&state.pool, name, Some(id)).await? {
                return Err(AppError::Conflict("Username already exists".to_owned()));
            }
            name.to_owned()
        }
        _ => target.username.clone(),
    };

    let email = match form.email.as_deref().map(|e| e.trim().to_lowercase()) {
        Some(email) if !email.is_empty() && Some(&email) != target.email.as_ref() => {
            if !validate_email(&email) {
                return Err(AppError::bad_request("Invalid email address"));
            }
            if user::email_taken(&state.pool, &email, Some(id)).await? {
                return Err(AppError::Conflict("Email already exists".to_owned()));
            }
            Some(email)
        }
        _ => target.email.clone(),
    };

    let is_admin = checkbox(form.is_admin.as_deref());
    if target.is_admin && !is_admin {
        if target.id == admin.user.id {
            return Err(AppError::bad_request("Cannot change your own admin status"));
        }
        ensure_not_last_admin(&state, &target, "Cannot remove the last admin").await?;
    }

    user::update_account(&state.pool, id, &username, email.as_deref(), is_admin).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_UPDATED",
        &format!("Updated user '{}' (admin: {})", username, is_admin),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "User updated successfully",
    })))
}

pub async fn reset_password_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
    Form(form): Form<PasswordForm>,
) -> AppResult<Json<Value>> {
    let target = find_user(&state, id).await?;
    if form.password.is_empty() {
        return Err(AppError::bad_request("Password is required"));
    }
    ensure_strong_password(&form.password)?;

    let password_hash = hash(&form.password)?;
    user::set_password(&state.pool, id, &password_hash).await?;
    session::delete_for_user(&state.pool, id).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_PASSWORD_RESET",
        &format!("Reset password for user '{}'", target.username),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Password reset successfully",
    })))
}

pub async fn delete_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let target = find_user(&state, id).await?;
    if target.id == admin.user.id {
        return Err(AppError::bad_request("Cannot delete your own account"));
    }
    ensure_not_last_admin(&state, &target, "Cannot delete the last admin user").await?;

    user::delete(&state.pool, id).await?;

    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_DELETED",
        &format!("Deleted user '{}'", target.username),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully",
    })))
}

pub async fn toggle_admin_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    AdminUser(admin): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let target = find_user(&state, id).await?;
    if target.id == admin.user.id {
        return Err(AppError::bad_request("Cannot change your own admin status"));
    }
    ensure_not_last_admin(&state, &target, "Cannot remove the last admin").await?;

    let is_admin = !target.is_admin;
    user::set_admin(&state.pool, id, is_admin).await?;

    let status = if is_admin {
        "promoted to admin"
    } else {
        "demoted to user"
    };
    audit::admin_action(
        &state.pool,
        &admin.user,
        &client,
        "USER_ROLE_CHANGED",
        &format!("User '{}' {}", target.username, status),
    )
    .await;

    Ok(Json(json!({ "success": true, "is_admin": is_admin })))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::{
        test_support::{create_user, get, login_cookie, post_form, send, test_state},
        util::auth::verify_password,
    };

    #[tokio::test]
    async fn users_are_created_and_listed() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let created = send(
            &state,
            post_form(
                "/admin/users/create",
                Some(&cookie),
                "username=editor&email=Editor%40Example.com&password=Sunflower7%21&is_admin=on",
            ),
        )
        .await;
        assert_eq!(created.status, StatusCode::OK);

        let editor = user::find_by_login(&state.pool, "editor")
            .await
            .unwrap()
            .unwrap();
        assert!(editor.is_admin);
        assert_eq!(editor.email.as_deref(), Some("editor@example.com"));

        let duplicate = send(
            &state,
            post_form(
                "/admin/users/create",
                Some(&cookie),
                "username=editor&email=other%40example.com&password=Sunflower7%21",
            ),
        )
        .await;
        assert_eq!(duplicate.status, StatusCode::CONFLICT);

        let admins = send(&state, get("/admin/users?role=admin", Some(&cookie)))
            .await
            .json();
        assert_eq!(admins["users"]["total"], 3);
        let searched = send(&state, get("/admin/users?search=edit", Some(&cookie)))
            .await
            .json();
        assert_eq!(searched["users"]["total"], 1);
    }

    #[tokio::test]
    async fn admins_cannot_remove_themselves() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let cookie = login_cookie(&state, &boss).await;

        let delete = send(
            &state,
            post_form(&format!("/admin/users/{}/delete", boss.id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(delete.status, StatusCode::BAD_REQUEST);
        assert_eq!(delete.json()["error"], "Cannot delete your own account");

        let toggle = send(
            &state,
            post_form(
                &format!("/admin/users/{}/toggle-admin", boss.id),
                Some(&cookie),
                "",
            ),
        )
        .await;
        assert_eq!(toggle.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn other_admins_can_be_demoted_and_users_removed() {
        let (state, _dir) = test_state().await;
        let seeded = user::find_by_login(&state.pool, "admin")
            .await
            .unwrap()
            .unwrap();
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        let cookie = login_cookie(&state, &boss).await;

        let demoted = send(
            &state,
            post_form(
                &format!("/admin/users/{}/toggle-admin", seeded.id),
                Some(&cookie),
                "",
            ),
        )
        .await;
        assert_eq!(demoted.json()["is_admin"], false);
        assert_eq!(user::count_admins(&state.pool).await.unwrap(), 1);

        let removed = send(
            &state,
            post_form(&format!("/admin/users/{}/delete", jane.id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(removed.status, StatusCode::OK);
        assert!(user::find_by_id(&state.pool, jane.id).await.unwrap().is_none());

        let missing = send(
            &state,
            post_form(&format!("/admin/users/{}/delete", jane.id), Some(&cookie), ""),
        )
        .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn passwords_are_reset_and_sessions_revoked() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        let cookie = login_cookie(&state, &boss).await;
        let jane_cookie = login_cookie(&state, &jane).await;

        let weak = send(
            &state,
            post_form(
                &format!("/admin/users/{}/reset-password", jane.id),
                Some(&cookie),
                "password=abc",
            ),
        )
        .await;
        assert_eq!(weak.status, StatusCode::BAD_REQUEST);

        let reset = send(
            &state,
            post_form(
                &format!("/admin/users/{}/reset-password", jane.id),
                Some(&cookie),
                "password=Moonlight8%21",
            ),
        )
        .await;
        assert_eq!(reset.status, StatusCode::OK);

        let updated = user::find_by_id(&state.pool, jane.id).await.unwrap().unwrap();
        assert!(verify_password("Moonlight8!", &updated.password_hash));
        let profile = send(&state, get("/profile", Some(&jane_cookie))).await;
        assert_eq!(profile.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn updates_keep_unchanged_fields() {
        let (state, _dir) = test_state().await;
        let boss = create_user(&state.pool, "boss", "Secret123!", true).await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        let cookie = login_cookie(&state, &boss).await;

        let response = send(
            &state,
            post_form(
                &format!("/admin/users/{}/update", jane.id),
                Some(&cookie),
                "email=jane.doe%40example.com",
            ),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);

        let updated = user::find_by_id(&state.pool, jane.id).await.unwrap().unwrap();
        assert_eq!(updated.username, "jane");
        assert_eq!(updated.email.as_deref(), Some("jane.doe@example.com"));
        assert!(!updated.is_admin);

        let taken = send(
            &state,
            post_form(
                &format!("/admin/users/{}/update", jane.id),
                Some(&cookie),
                "email=boss%40example.com",
            ),
        )
        .await;
        assert_eq!(taken.status, StatusCode::CONFLICT);
    }
}
