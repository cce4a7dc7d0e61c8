use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Redirect,
    Form, Json,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    constants::SESSION_COOKIE,
    error::{AppError, AppResult},
    models::{image, password_reset, session, user},
    server::ServerState,
    util::{
        audit,
        auth::{
            generate_token, hash_password, removal_cookie, session_cookie, session_ttl,
            verify_password, CurrentUser, MaybeUser,
        },
        image::format_file_size,
        security::{
            check_password_strength, is_safe_redirect, validate_email, validate_username,
            ClientInfo,
        },
    },
};

const DEFAULT_REDIRECT: &str = "/app";

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    remember: Option<String>,
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct NextQuery {
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordForm {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
    #[serde(default)]
    confirm_password: String,
}

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn safe_next(next: Option<&str>, headers: &HeaderMap) -> String {
    next.filter(|target| is_safe_redirect(target, host(headers)))
        .unwrap_or(DEFAULT_REDIRECT)
        .to_owned()
}

/// Rejects weak passwords with the first two suggestions.
pub fn ensure_strong_password(password: &str) -> AppResult<()> {
    let strength = check_password_strength(password);
    if strength.valid {
        return Ok(());
    }
    Err(AppError::bad_request(format!(
        "Password is too weak. {}",
        strength
            .suggestions
            .iter()
            .take(2)
            .copied()
            .collect::<Vec<_>>()
            .join("; ")
    )))
}

/// `/` sends visitors to the app or to the login page.
pub async fn index_handler(MaybeUser(current): MaybeUser) -> Redirect {
    match current {
        Some(_) => Redirect::to(DEFAULT_REDIRECT),
        None => Redirect::to("/login"),
    }
}

pub async fn login_status_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    headers: HeaderMap,
    MaybeUser(current): MaybeUser,
    axum::extract::Query(query): axum::extract::Query<NextQuery>,
) -> AppResult<Json<Value>> {
    state.rate_limit("login", &client, 30).await?;
    let settings = state.settings().await?;

    let redirect = current
        .as_ref()
        .map(|_| safe_next(query.next.as_deref(), &headers));
    Ok(Json(json!({
        "authenticated": current.is_some(),
        "redirect": redirect,
        "registration_enabled": settings.allow_registration,
    })))
}

pub async fn login_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> AppResult<(CookieJar, Json<Value>)> {
    state.rate_limit("login", &client, 30).await?;

    let login = form.username.trim();
    if login.is_empty() || form.password.is_empty() {
        return Err(AppError::bad_request(
            "Please enter username/email and password",
        ));
    }

    let Some(account) = user::find_by_login(&state.pool, login).await? else {
        audit::security_event(
            &state.pool,
            None,
            &client,
            "LOGIN_FAILED",
            &format!("Unknown user: {}", login),
        )
        .await;
        return Err(AppError::InvalidCredentials(
            "Invalid username/email or password".to_owned(),
        ));
    };

    if account.is_locked() {
        audit::security_event(
            &state.pool,
            Some(&account),
            &client,
            "LOGIN_BLOCKED",
            &format!("Login attempt on locked account: {}", account.username),
        )
        .await;
        return Err(AppError::Locked);
    }

    let settings = state.settings().await?;

    if !verify_password(&form.password, &account.password_hash) {
        let updated = user::record_failed_login(
            &state.pool,
            account.id,
            settings.max_login_attempts,
            settings.lockout_duration,
        )
        .await?;
        audit::security_event(
            &state.pool,
            Some(&account),
            &client,
            "LOGIN_FAILED",
            &format!(
                "Invalid password for user: {} (attempt {})",
                account.username, updated.failed_login_attempts
            ),
        )
        .await;
        if updated.is_locked() {
            audit::security_event(
                &state.pool,
                Some(&account),
                &client,
                "ACCOUNT_LOCKED",
                &format!(
                    "Account locked for {} seconds after {} failed attempts",
                    settings.lockout_duration, updated.failed_login_attempts
                ),
            )
            .await;
        }
        return Err(AppError::InvalidCredentials(
            "Invalid username/email or password".to_owned(),
        ));
    }

    user::record_successful_login(&state.pool, account.id).await?;

    let remember = form.remember.as_deref() == Some("on");
    let token = generate_token();
    session::create(
        &state.pool,
        &token,
        account.id,
        remember,
        session_ttl(remember, &settings),
    )
    .await?;

    audit::record(
        &state.pool,
        Some(&account),
        &client,
        "LOGIN_SUCCESS",
        &format!("User logged in (remember me: {})", remember),
    )
    .await;

    let redirect = safe_next(form.next.as_deref(), &headers);
    let jar = jar.add(session_cookie(token, remember, state.config.force_https));
    Ok((jar, Json(json!({ "success": true, "redirect": redirect }))))
}

pub async fn logout_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    jar: CookieJar,
    MaybeUser(current): MaybeUser,
) -> AppResult<(CookieJar, Redirect)> {
    if let Some(current) = current {
        session::delete(&state.pool, &current.session.token).await?;
        audit::record(
            &state.pool,
            Some(&current.user),
            &client,
            "LOGOUT",
            "User logged out",
        )
        .await;
    } else if let Some(cookie) = jar.get(SESSION_COOKIE) {
        session::delete(&state.pool, cookie.value()).await?;
    }

    Ok((jar.remove(removal_cookie()), Redirect::to("/login")))
}

pub async fn registration_status_handler(
    State(state): State<ServerState>,
) -> AppResult<Json<Value>> {
    let settings = state.settings().await?;
    Ok(Json(json!({ "registration_enabled": settings.allow_registration })))
}

pub async fn register_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    Form(form): Form<RegisterForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("register", &client, 5).await?;

    let settings = state.settings().await?;
    if !settings.allow_registration {
        return Err(AppError::forbidden("User registration is currently disabled."));
    }

    let username = form.username.trim();
    let email = form.email.trim().to_lowercase();
    if username.is_empty()
        || email.is_empty()
        || form.password.is_empty()
        || form.confirm_password.is_empty()
    {
        return Err(AppError::bad_request("Please fill in all fields"));
    }
    if !validate_email(&email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    if !(3..=20).contains(&username.chars().count()) {
        return Err(AppError::bad_request(
            "Username must be between 3 and 20 characters",
        ));
    }
    if !validate_username(username) {
        return Err(AppError::bad_request(
            "Username can only contain letters, numbers, and underscores",
        ));
    }
    if form.password != form.confirm_password {
        return Err(AppError::bad_request("Passwords do not match"));
    }
    ensure_strong_password(&form.password)?;

    if user::username_taken(&state.pool, username, None).await? {
        return Err(AppError::Conflict("Username already exists".to_owned()));
    }
    if user::email_taken(&state.pool, &email, None).await? {
        return Err(AppError::Conflict(
            "Email address already registered".to_owned(),
        ));
    }

    let password_hash =
        hash_password(&form.password).map_err(|err| AppError::Internal(err.to_string()))?;
    let created = user::create(
        &state.pool,
        user::NewUser {
            username,
            email: Some(&email),
            password_hash: &password_hash,
            is_admin: false,
        },
    )
    .await?;

    audit::record(
        &state.pool,
        Some(&created),
        &client,
        "USER_REGISTERED",
        &format!("New user registered: {} ({})", created.username, email),
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Account created successfully! You can now log in.",
        "redirect": "/login",
    })))
}

pub async fn forgot_password_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    headers: HeaderMap,
    Form(form): Form<ForgotPasswordForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("forgot_password", &client, 5).await?;

    let login = form.username.trim();
    if login.is_empty() {
        return Err(AppError::bad_request(
            "Please enter your username or email address",
        ));
    }

    if let Some(account) = user::find_by_login(&state.pool, login).await? {
        let token = generate_token();
        password_reset::create(&state.pool, account.id, &token).await?;

        let base = if state.config.custom_domain.is_empty() {
            format!("http://{}", host(&headers))
        } else {
            format!("https://{}", state.config.custom_domain)
        };
        log::info!(
            "Password reset link for '{}': {}/reset-password/{}",
            account.username,
            base,
            token
        );
        audit::record(
            &state.pool,
            Some(&account),
            &client,
            "PASSWORD_RESET_REQUESTED",
            "Password reset link issued",
        )
        .await;
    }

    Ok(Json(json!({
        "success": true,
        "message": "If an account exists with that username/email, password reset instructions have been sent.",
    })))
}

fn invalid_reset_token() -> AppError {
    AppError::bad_request("Invalid or expired reset token. Please request a new password reset.")
}

pub async fn reset_token_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    Path(token): Path<String>,
) -> AppResult<Json<Value>> {
    state.rate_limit("reset_password", &client, 10).await?;

    password_reset::find_valid(&state.pool, &token)
        .await?
        .ok_or_else(invalid_reset_token)?;
    Ok(Json(json!({ "valid": true, "token": token })))
}

pub async fn reset_password_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> AppResult<Json<Value>> {
    state.rate_limit("reset_password", &client, 10).await?;

    let reset = password_reset::find_valid(&state.pool, &token)
        .await?
        .ok_or_else(invalid_reset_token)?;

    if form.password.is_empty() || form.confirm_password.is_empty() {
        return Err(AppError::bad_request(
            "Please enter and confirm your new password",
        ));
    }
    if form.password != form.confirm_password {
        return Err(AppError::bad_request("Passwords do not match"));
    }
    ensure_strong_password(&form.password)?;

    let password_hash =
        hash_password(&form.password).map_err(|err| AppError::Internal(err.to_string()))?;
    user::set_password(&state.pool, reset.user_id, &password_hash).await?;
    password_reset::mark_used(&state.pool, reset.id).await?;
    session::delete_for_user(&state.pool, reset.user_id).await?;

    let account = user::find_by_id(&state.pool, reset.user_id).await?;
    audit::record(
        &state.pool,
        account.as_ref(),
        &client,
        "PASSWORD_RESET_COMPLETED",
        "Password reset via token",
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Your password has been reset successfully. You can now log in with your new password.",
        "redirect": "/login",
    })))
}

pub async fn profile_handler(
    State(state): State<ServerState>,
    current: CurrentUser,
) -> AppResult<Json<Value>> {
    let settings = state.settings().await?;
    let totals = image::totals(&state.pool, Some(current.user.id)).await?;
    let recent = image::recent_for_user(&state.pool, current.user.id, 5).await?;
    let quota = current
        .user
        .storage_quota(settings.default_storage_limit_bytes);

    Ok(Json(json!({
        "user": current.user,
        "total_images": totals.count,
        "total_size": totals.size,
        "total_size_display": format_file_size(totals.size.max(0) as u64),
        "storage_limit": quota,
        "storage_limit_display": quota
            .map(|bytes| format_file_size(bytes.max(0) as u64))
            .unwrap_or_else(|| "Unlimited".to_owned()),
        "recent_images": recent,
    })))
}

pub async fn change_password_handler(
    State(state): State<ServerState>,
    client: ClientInfo,
    current: CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Json<Value>> {
    if !verify_password(&form.current_password, &current.user.password_hash) {
        audit::security_event(
            &state.pool,
            Some(&current.user),
            &client,
            "PASSWORD_CHANGE_FAILED",
            "Incorrect current password",
        )
        .await;
        return Err(AppError::bad_request("Current password is incorrect"));
    }
    if form.new_password != form.confirm_password {
        return Err(AppError::bad_request("New passwords do not match"));
    }
    ensure_strong_password(&form.new_password)?;

    let password_hash =
        hash_password(&form.new_password).map_err(|err| AppError::Internal(err.to_string()))?;
    user::set_password(&state.pool, current.user.id, &password_hash).await?;

    audit::record(
        &state.pool,
        Some(&current.user),
        &client,
        "PASSWORD_CHANGED",
        "User changed their password",
    )
    .await;

    Ok(Json(json!({
        "success": true,
        "message": "Password changed successfully",
    })))
}
