use argon2::{
    password_hash::{
        self,
        rand_core::{OsRng, RngCore},
        PasswordHash, PasswordHasher, SaltString,
    },
    Argon2, PasswordVerifier,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::{
    constants::{REMEMBER_ME_SECS, SESSION_COOKIE},
    error::AppError,
    models::{
        session::{self, Session},
        setting::EffectiveSettings,
        user::{self, User},
    },
    server::ServerState,
};

/// Hashes a password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Checks a password against a stored PHC string.
/// Malformed hashes are logged and treated as a mismatch.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let hash = match PasswordHash::new(stored_hash) {
        Err(err) => {
            log::error!("Stored password hash could not be parsed: {}", err);
            return false;
        }
        Ok(hash) => hash,
    };

    match Argon2::default().verify_password(password.as_bytes(), &hash) {
        Ok(_) => true,
        // Password is incorrect
        Err(password_hash::Error::Password) => false,
        Err(err) => {
            log::error!("Error during password verification: {}", err);
            false
        }
    }
}

/// 32 random bytes, URL-safe base64 encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Seconds a session lives before (or after) each request extends it.
pub fn session_ttl(remember: bool, settings: &EffectiveSettings) -> i64 {
    if remember {
        REMEMBER_ME_SECS
    } else {
        settings.session_timeout
    }
}

pub fn session_cookie(token: String, remember: bool, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    if remember {
        cookie.set_max_age(time::Duration::seconds(REMEMBER_ME_SECS));
    }
    cookie
}

pub fn removal_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    cookie
}

/// Resolves a session token to its user, sliding the session's expiry.
/// Unknown, expired and locked-out sessions resolve to `None`.
pub async fn authenticate(
    state: &ServerState,
    token: &str,
) -> Result<Option<CurrentUser>, AppError> {
    let Some(session) = session::find_valid(&state.pool, token).await? else {
        return Ok(None);
    };
    let Some(user) = user::find_by_id(&state.pool, session.user_id).await? else {
        session::delete(&state.pool, token).await?;
        return Ok(None);
    };
    if user.is_locked() {
        log::warn!("Rejected session of locked user '{}'", user.username);
        session::delete(&state.pool, token).await?;
        return Ok(None);
    }

    let settings = EffectiveSettings::load(&state.pool, &state.config).await?;
    session::extend(&state.pool, token, session_ttl(session.remember, &settings)).await?;

    Ok(Some(CurrentUser { user, session }))
}

/// A logged-in user. Rejects with 401 when there is no valid session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

#[axum::async_trait]
impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        MaybeUser::from_request_parts(parts, state)
            .await?
            .0
            .ok_or(AppError::Unauthorized)
    }
}

/// A logged-in administrator. Rejects with 401 or 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[axum::async_trait]
impl FromRequestParts<ServerState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if !current.user.is_admin {
            log::warn!(
                "User '{}' tried to access {} without admin rights",
                current.user.username,
                parts.uri.path()
            );
            return Err(AppError::forbidden("Admin access required"));
        }
        Ok(AdminUser(current))
    }
}

/// The logged-in user, if there is one.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

#[axum::async_trait]
impl FromRequestParts<ServerState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        match jar.get(SESSION_COOKIE) {
            None => Ok(MaybeUser(None)),
            Some(cookie) => Ok(MaybeUser(authenticate(state, cookie.value()).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{create_user, test_state};

    #[test]
    fn passwords_verify_against_their_hash() {
        let hash = hash_password("Secret123!").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Secret123!", &hash));
        assert!(!verify_password("secret123!", &hash));
        assert!(!verify_password("Secret123!", "not-a-phc-string"));

        let again = hash_password("Secret123!").unwrap();
        assert_ne!(hash, again);
        assert!(verify_password("Secret123!", &again));
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let first = generate_token();
        let second = generate_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn remember_me_cookies_persist() {
        let cookie = session_cookie("abc".into(), true, true);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert!(cookie.max_age().is_some());
        assert!(session_cookie("abc".into(), false, false).max_age().is_none());
    }

    #[tokio::test]
    async fn locked_users_lose_their_sessions() {
        let (state, _dir) = test_state().await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        session::create(&state.pool, "token", jane.id, false, 600)
            .await
            .unwrap();

        assert!(authenticate(&state, "token").await.unwrap().is_some());

        user::record_failed_login(&state.pool, jane.id, 1, 900)
            .await
            .unwrap();
        assert!(authenticate(&state, "token").await.unwrap().is_none());
        assert!(session::find_valid(&state.pool, "token")
            .await
            .unwrap()
            .is_none());
    }
}
