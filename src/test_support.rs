//! Helpers shared by the unit tests: in-memory database, users, sessions and requests.

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::{
    config::AppConfig,
    db,
    models::{
        session,
        user::{self, NewUser, User},
    },
    server::{router, ServerState},
    util::{
        auth::{generate_token, hash_password},
        security::ClientInfo,
    },
};

pub const BOUNDARY: &str = "imagehub-test-boundary";

pub async fn test_pool() -> SqlitePool {
    let pool = db::memory_pool().await;
    db::init(&pool, &AppConfig::default()).await.unwrap();
    pool
}

/// State backed by an in-memory database and a temporary data directory.
pub async fn test_state() -> (ServerState, TempDir) {
    test_state_with(AppConfig::default()).await
}

pub async fn test_state_with(mut config: AppConfig) -> (ServerState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    config.data_dir = dir.path().to_path_buf();
    config.database_url = "sqlite::memory:".to_owned();

    let pool = db::memory_pool().await;
    db::init(&pool, &config).await.unwrap();
    (ServerState::new(pool, config), dir)
}

pub async fn create_user(pool: &SqlitePool, username: &str, password: &str, is_admin: bool) -> User {
    let password_hash = hash_password(password).unwrap();
    user::create(
        pool,
        NewUser {
            username,
            email: Some(&format!("{}@example.com", username)),
            password_hash: &password_hash,
            is_admin,
        },
    )
    .await
    .unwrap()
}

/// Creates a session for `user` and returns the matching `Cookie` header value.
pub async fn login_cookie(state: &ServerState, user: &User) -> String {
    let token = generate_token();
    session::create(&state.pool, &token, user.id, false, 3600)
        .await
        .unwrap();
    format!("{}={}", crate::constants::SESSION_COOKIE, token)
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip: "127.0.0.1".to_owned(),
        user_agent: Some("tests".to_owned()),
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    crate::util::image::tests::png_bytes(width, height)
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn form(method: &str, uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_owned())).unwrap()
}

pub fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    form("POST", uri, cookie, body)
}

/// Multipart request with files `(field, filename, bytes)` and text fields.
pub fn multipart(
    uri: &str,
    cookie: Option<&str>,
    files: &[(&str, &str, &[u8])],
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (name, filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(state: &ServerState, request: Request<Body>) -> TestResponse {
    send_to(router(state.clone()), request).await
}

pub async fn send_to(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body: body.to_vec(),
    }
}

/// Uploads a generated PNG through `/upload` for the session in `cookie`.
pub async fn upload_png(state: &ServerState, cookie: &str, width: u32, height: u32) -> TestResponse {
    let png = png_bytes(width, height);
    send(
        state,
        multipart("/upload", Some(cookie), &[("file", "photo.png", &png)], &[]),
    )
    .await
}
