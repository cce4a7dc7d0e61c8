use sqlx::SqlitePool;

use crate::{
    models::{
        audit::{self, NewAuditEntry},
        user::User,
    },
    util::security::ClientInfo,
};

/// Logs a user action on the `audit` target and stores it in the audit log.
pub async fn record(
    pool: &SqlitePool,
    actor: Option<&User>,
    client: &ClientInfo,
    action: &str,
    details: &str,
) {
    let username = actor.map(|user| user.username.as_str());
    log::info!(
        target: "audit",
        "USER: {} ({}) | ACTION: {} | DETAILS: {}",
        username.unwrap_or("Anonymous"),
        client.ip,
        action,
        details
    );
    persist(pool, actor, username, client, action, details).await;
}

/// Logs a security relevant event at warn level and stores it.
pub async fn security_event(
    pool: &SqlitePool,
    actor: Option<&User>,
    client: &ClientInfo,
    event: &str,
    details: &str,
) {
    log::warn!(
        target: "audit",
        "SECURITY: {} | {} | IP: {}",
        event,
        details,
        client.ip
    );
    let username = actor.map(|user| user.username.as_str());
    persist(pool, actor, username, client, event, details).await;
}

/// Logs an administrative action on the `admin` target and stores it.
pub async fn admin_action(
    pool: &SqlitePool,
    admin: &User,
    client: &ClientInfo,
    action: &str,
    details: &str,
) {
    log::info!(
        target: "admin",
        "ADMIN: {} | {} | Admin: {}",
        action,
        details,
        admin.username
    );
    persist(
        pool,
        Some(admin),
        Some(admin.username.as_str()),
        client,
        action,
        details,
    )
    .await;
}

/// Image tool usage. Only logged, the images table already records it.
pub fn image_event(user: &User, operation: &str, details: &str) {
    log::info!(
        target: "image",
        "IMAGE: {} | {} | User: {}",
        operation,
        details,
        user.username
    );
}

async fn persist(
    pool: &SqlitePool,
    actor: Option<&User>,
    username: Option<&str>,
    client: &ClientInfo,
    action: &str,
    details: &str,
) {
    let entry = NewAuditEntry {
        user_id: actor.map(|user| user.id),
        username,
        action,
        details,
        ip_address: &client.ip,
        user_agent: client.user_agent.as_deref(),
    };
    if let Err(err) = audit::insert(pool, &entry).await {
        log::error!("Unable to store audit entry '{}': {}", action, err);
    }
}
