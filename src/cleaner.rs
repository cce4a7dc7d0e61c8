use std::{
    collections::HashSet,
    fs::{read_dir, remove_file, DirEntry},
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::Utc;

use crate::{
    constants::{CLEANUP_INTERVAL, PENDING_MAX_AGE},
    models::{image, password_reset, session},
    server::ServerState,
    util::path::get_pending_path,
};

/// Housekeeping loop. Runs once right away and then every [`CLEANUP_INTERVAL`].
pub async fn run(state: ServerState) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        interval.tick().await;
        log::info!("Starting housekeeping.");
        sweep(&state).await;
        log::info!("Finished housekeeping. Going back to sleep...");
    }
}

/// One housekeeping pass. Failures are logged and do not stop the other steps.
pub async fn sweep(state: &ServerState) {
    let data_dir = state.config.data_dir.clone();
    let pending = tokio::task::spawn_blocking(move || {
        prune_pending(&data_dir, Some(PENDING_MAX_AGE), &HashSet::new())
    })
    .await;
    match pending {
        Err(err) => log::error!("Pending cleanup task failed: {}", err),
        Ok(Err(err)) => log::error!("Unable to read pending path: {}", err),
        Ok(Ok(0)) => {}
        Ok(Ok(count)) => log::info!("Deleted {} old pending files", count),
    }

    match session::delete_expired(&state.pool).await {
        Err(err) => log::error!("Unable to delete expired sessions: {}", err),
        Ok(0) => {}
        Ok(count) => log::info!("Deleted {} expired sessions", count),
    }

    match password_reset::delete_stale(&state.pool).await {
        Err(err) => log::error!("Unable to delete stale reset tokens: {}", err),
        Ok(0) => {}
        Ok(count) => log::info!("Deleted {} stale reset tokens", count),
    }

    match state.settings().await {
        Err(err) => log::error!("Unable to load settings: {}", err),
        Ok(settings) if settings.auto_delete_days > 0 => {
            let cutoff = Utc::now() - chrono::Duration::days(settings.auto_delete_days);
            match image::delete_older_than(&state.pool, cutoff).await {
                Err(err) => log::error!("Unable to delete old images: {}", err),
                Ok(0) => {}
                Ok(count) => log::info!(
                    "Deleted {} images older than {} days",
                    count,
                    settings.auto_delete_days
                ),
            }
        }
        Ok(_) => {}
    }

    state.limiter.prune();
}

/// Deletes staged uploads below `data_dir` and returns how many were removed.
///
/// Only regular, non-hidden files are considered. Files whose stem is in `keep`
/// survive, and with `max_age` set only files modified before `now - max_age` go.
pub fn prune_pending(
    data_dir: &Path,
    max_age: Option<Duration>,
    keep: &HashSet<String>,
) -> io::Result<usize> {
    let directory = get_pending_path(data_dir);
    let iterator = match read_dir(&directory) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
        Ok(iterator) => iterator,
    };

    let threshold = max_age.map(|age| SystemTime::now() - age);
    let deleted = iterator
        .filter_map(|dir_entry| removable(dir_entry, threshold, keep))
        .filter(|path| match remove_file(path) {
            Err(err) => {
                log::error!("Unable to delete '{:?}': {}", path, err);
                false
            }
            Ok(_) => {
                log::info!("Deleted {:?}", path);
                true
            }
        })
        .count();
    Ok(deleted)
}

/// Returns the entry's path if it is a regular, visible file that may be deleted.
fn removable(
    dir_entry_res: Result<DirEntry, io::Error>,
    threshold: Option<SystemTime>,
    keep: &HashSet<String>,
) -> Option<PathBuf> {
    let dir_entry = match dir_entry_res {
        Err(err) => {
            log::error!("Error while reading dir entry: {}", err);
            return None;
        }
        Ok(dir_entry) => dir_entry,
    };

    let path = dir_entry.path();
    if !path.is_file() {
        return None;
    }

    let file_name = dir_entry.file_name();
    let Some(file_name) = file_name.to_str() else {
        log::error!("Unable to get file name as string for: '{:?}'", path);
        return None;
    };
    if file_name.starts_with('.') {
        return None;
    }

    let stem = file_name.split('.').next().unwrap_or(file_name);
    if keep.contains(stem) {
        return None;
    }

    if let Some(threshold) = threshold {
        let modified = match dir_entry.metadata().and_then(|metadata| metadata.modified()) {
            Err(err) => {
                log::error!("Unable to get modified time for '{:?}': {}", path, err);
                return None;
            }
            Ok(modified) => modified,
        };
        if modified >= threshold {
            return None;
        }
    }

    Some(path)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        models::{
            image::{NewImage, Tool},
            setting,
        },
        test_support::{create_user, login_cookie, test_state},
        util::auth::generate_token,
    };

    fn pending_dir(data_dir: &Path) -> PathBuf {
        let directory = get_pending_path(data_dir);
        fs::create_dir_all(&directory).unwrap();
        directory
    }

    #[test]
    fn hidden_files_and_directories_survive() {
        let dir = tempfile::tempdir().unwrap();
        let pending = pending_dir(dir.path());
        fs::write(pending.join("a.upload"), b"a").unwrap();
        fs::write(pending.join(".gitkeep"), b"").unwrap();
        fs::create_dir(pending.join("nested")).unwrap();

        let deleted = prune_pending(dir.path(), None, &HashSet::new()).unwrap();
        assert_eq!(deleted, 1);
        assert!(pending.join(".gitkeep").exists());
        assert!(pending.join("nested").exists());
    }

    #[test]
    fn fresh_and_kept_files_survive() {
        let dir = tempfile::tempdir().unwrap();
        let pending = pending_dir(dir.path());
        fs::write(pending.join("fresh.upload"), b"a").unwrap();
        fs::write(pending.join("kept.upload"), b"b").unwrap();
        fs::write(pending.join("orphan.upload"), b"c").unwrap();

        let hour = Some(Duration::from_secs(3600));
        assert_eq!(prune_pending(dir.path(), hour, &HashSet::new()).unwrap(), 0);

        let keep = HashSet::from(["kept".to_owned()]);
        assert_eq!(prune_pending(dir.path(), None, &keep).unwrap(), 2);
        assert!(pending.join("kept.upload").exists());
        assert!(!pending.join("orphan.upload").exists());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_pending(dir.path(), None, &HashSet::new()).unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_expired_rows_and_old_images() {
        let (state, _dir) = test_state().await;
        let jane = create_user(&state.pool, "jane", "Secret123!", false).await;
        login_cookie(&state, &jane).await;
        session::create(&state.pool, &generate_token(), jane.id, false, -10)
            .await
            .unwrap();
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
                data: &[1, 2, 3],
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE images SET created_at = ?")
            .bind(Utc::now() - chrono::Duration::days(10))
            .execute(&state.pool)
            .await
            .unwrap();

        // Auto delete is off by default
        sweep(&state).await;
        assert_eq!(image::totals(&state.pool, None).await.unwrap().count, 1);

        setting::set(&state.pool, "auto_delete_days", "7").await.unwrap();
        sweep(&state).await;
        assert_eq!(image::totals(&state.pool, None).await.unwrap().count, 0);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&state.pool)
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
