use std::{net::SocketAddr, sync::Arc, time::Instant};

use anyhow::{bail, Context};
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tokio::{net::TcpListener, signal};
use tower_http::services::ServeDir;

use crate::{
    cleaner,
    config::{AppConfig, DatabaseKind},
    constants::MULTIPART_OVERHEAD,
    db,
    error::{AppError, AppResult},
    handlers::{admin, api, auth, health, images},
    models::setting::EffectiveSettings,
    util::{
        audit, cors::cors_layer, path::get_uploads_path, rate_limit::RateLimiter,
        security::ClientInfo,
    },
};

#[derive(Clone)]
pub struct ServerState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(pool: SqlitePool, config: AppConfig) -> Self {
        ServerState {
            pool,
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::default()),
            started_at: Instant::now(),
        }
    }

    /// Counts a request against `endpoint`'s hourly budget for the caller's address.
    pub async fn rate_limit(
        &self,
        endpoint: &str,
        client: &ClientInfo,
        max_per_hour: usize,
    ) -> AppResult<()> {
        if self.limiter.check(endpoint, &client.ip, max_per_hour) {
            return Ok(());
        }

        audit::security_event(
            &self.pool,
            None,
            client,
            "RATE_LIMIT_EXCEEDED",
            &format!("Endpoint: {}", endpoint),
        )
        .await;
        Err(AppError::RateLimited)
    }

    pub async fn settings(&self) -> AppResult<EffectiveSettings> {
        Ok(EffectiveSettings::load(&self.pool, &self.config).await?)
    }
}

pub fn router(state: ServerState) -> Router {
    let body_limit = state.config.max_file_size + MULTIPART_OVERHEAD;
    let uploads = ServeDir::new(get_uploads_path(&state.config.data_dir));

    let mut app = Router::new()
        .route("/", get(auth::index_handler))
        .route("/health", get(health::health_handler))
        .route("/login", get(auth::login_status_handler).post(auth::login_handler))
        .route("/logout", get(auth::logout_handler))
        .route(
            "/register",
            get(auth::registration_status_handler).post(auth::register_handler),
        )
        .route("/forgot-password", post(auth::forgot_password_handler))
        .route(
            "/reset-password/:token",
            get(auth::reset_token_handler).post(auth::reset_password_handler),
        )
        .route("/profile", get(auth::profile_handler))
        .route("/change-password", post(auth::change_password_handler))
        .route("/app", get(images::app_handler))
        .route("/upload", post(images::upload_handler))
        .route("/process-blur", post(images::blur_handler))
        .route("/process-compress", post(images::compress_handler))
        .route("/process-resize", post(images::resize_handler))
        .route("/process-pack", post(images::pack_handler))
        .route("/my-files", get(images::my_files_handler))
        .route("/download/:id", get(images::download_handler))
        .route("/download-pack/:pack_id", get(images::download_pack_handler))
        .route("/download-all", get(images::download_all_handler))
        .route("/delete-image/:id", post(images::delete_image_handler))
        .route("/delete-pack/:pack_id", post(images::delete_pack_handler))
        .route("/clear-all", post(images::clear_all_handler))
        .nest("/api", api::router())
        .nest("/admin", admin::router())
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_requests));

    if let Some(cors) = cors_layer(&state.config) {
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// One log line per request with status and duration.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} {} {:.3}s",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64()
    );
    response
}

pub async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Unable to read configuration")?;

    let kind = config.database_kind();
    if kind != DatabaseKind::Sqlite {
        bail!(
            "{} databases are not supported, DATABASE_URL must point to SQLite",
            kind.display_name()
        );
    }
    if config.secret_key == AppConfig::default().secret_key {
        log::warn!("SECRET_KEY is not set. Using the development default.");
    }

    log::info!("Opening database {}", config.database_url);
    let pool = db::connect(&config.database_url)
        .await
        .context("Unable to open database")?;
    db::init(&pool, &config)
        .await
        .context("Unable to initialize database")?;

    let state = ServerState::new(pool, config);
    tokio::spawn(cleaner::run(state.clone()));

    let address = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = router(state);

    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("Unable to bind {}", address))?;
    log::info!("Listening on {}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    log::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
        log::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Err(err) => {
                log::error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
            Ok(mut stream) => {
                stream.recv().await;
            }
        }
        log::info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
