use std::path::{Path, PathBuf};

use crate::constants::{BACKUP_DIR, PENDING_DIR, UPLOADS_DIR};

// Path of uploaded originals that are not yet processed
pub fn get_pending_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PENDING_DIR)
}

// Path where database snapshots are written
pub fn get_backup_path(data_dir: &Path) -> PathBuf {
    data_dir.join(BACKUP_DIR)
}

// Path for publicly served branding assets
pub fn get_uploads_path(data_dir: &Path) -> PathBuf {
    data_dir.join(UPLOADS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_below_data_dir() {
        let data_dir = Path::new("/srv/imagehub/data");
        assert_eq!(
            get_pending_path(data_dir),
            PathBuf::from("/srv/imagehub/data/pending")
        );
        assert_eq!(
            get_backup_path(data_dir),
            PathBuf::from("/srv/imagehub/data/backups")
        );
        assert_eq!(
            get_uploads_path(data_dir),
            PathBuf::from("/srv/imagehub/data/uploads")
        );
    }
}
