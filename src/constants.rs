use std::time::Duration;

// Multipart framing overhead allowed on top of the configured upload limit
pub const MULTIPART_OVERHEAD: usize = 1024 * 1024;
pub const DEFAULT_PORT: u16 = 5000;
// Image paths, relative to the configured data directory
pub const PENDING_DIR: &str = "pending"; // Uploaded originals waiting to be processed
pub const BACKUP_DIR: &str = "backups"; // Database snapshots
pub const UPLOADS_DIR: &str = "uploads"; // Branding assets (logo, favicon)
pub const PENDING_EXTENSION: &str = "upload";

pub const SESSION_COOKIE: &str = "imagehub_session";
pub const REMEMBER_ME_SECS: i64 = 30 * 24 * 60 * 60;
pub const RESET_TOKEN_TTL_SECS: i64 = 60 * 60;

pub const MAX_IMAGE_DIMENSION: u32 = 4000;
pub const PRESET_MIN_DIMENSION: i64 = 100;
pub const PRESET_MAX_DIMENSION: i64 = 4000;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_BLUR_AMOUNT: u32 = 30;

pub const FILES_PER_PAGE: i64 = 20;
pub const USERS_PER_PAGE: i64 = 20;
pub const LOGS_PER_PAGE: i64 = 50;
pub const API_MAX_PER_PAGE: i64 = 100;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(3600);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(900);
pub const PENDING_MAX_AGE: Duration = Duration::from_secs(3600);

// Nominal capacity shown on the admin system page
pub const STORAGE_CAPACITY_BYTES: i64 = 10 * 1024 * 1024 * 1024;
