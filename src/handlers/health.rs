use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::server::ServerState;

/// Liveness probe for the container runtime.
pub async fn health_handler(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": state.config.app_version,
    }))
}

/// Runs `SELECT 1` against the pool.
pub async fn database_healthy(pool: &SqlitePool) -> bool {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Err(err) => {
            log::error!("Database health check failed: {}", err);
            false
        }
        Ok(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::test_support::{get, send, test_state};

    #[tokio::test]
    async fn reports_healthy() {
        let (state, _dir) = test_state().await;
        assert!(database_healthy(&state.pool).await);

        let response = send(&state, get("/health", None)).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn closed_pools_are_unhealthy() {
        let (state, _dir) = test_state().await;
        state.pool.close().await;
        assert!(!database_healthy(&state.pool).await);
    }
}
