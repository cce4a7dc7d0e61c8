use std::{fs, path::Path};

use uuid::Uuid;

use super::info::parse_key_values;

pub const ENV_FILE: &str = ".env";
pub const CONTAINER_DATA_DIR: &str = "/app/data";

/// Settings written to the container's `.env`. Values stay unquoted, `docker --env-file`
/// takes everything after `=` literally.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSettings {
    pub secret_key: String,
    pub app_name: String,
    pub custom_domain: String,
    pub force_https: bool,
    pub enable_registration: bool,
}

impl EnvSettings {
    pub fn render(&self) -> String {
        let lines = [
            ("SECRET_KEY", self.secret_key.clone()),
            ("APP_NAME", self.app_name.clone()),
            (
                "DATABASE_URL",
                format!("sqlite://{}/imagehub.db", CONTAINER_DATA_DIR),
            ),
            ("DATA_DIR", CONTAINER_DATA_DIR.to_owned()),
            ("CUSTOM_DOMAIN", self.custom_domain.clone()),
            ("FORCE_HTTPS", self.force_https.to_string()),
            ("ENABLE_REGISTRATION", self.enable_registration.to_string()),
        ];
        lines
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }
}

/// 64 hex characters of randomness.
pub fn generate_secret_key() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Reuses the secret of an earlier install so existing sessions stay valid.
pub fn existing_secret_key(install_dir: &Path) -> Option<String> {
    let contents = fs::read_to_string(install_dir.join(ENV_FILE)).ok()?;
    parse_key_values(&contents)
        .remove("SECRET_KEY")
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_points_the_container_at_its_volume() {
        let settings = EnvSettings {
            secret_key: "s3cr3t".to_owned(),
            app_name: "Image Scale Hub".to_owned(),
            custom_domain: "img.example.com".to_owned(),
            force_https: true,
            enable_registration: false,
        };
        let rendered = settings.render();

        let values = parse_key_values(&rendered);
        assert_eq!(values["APP_NAME"], "Image Scale Hub");
        assert_eq!(values["DATABASE_URL"], "sqlite:///app/data/imagehub.db");
        assert_eq!(values["DATA_DIR"], "/app/data");
        assert_eq!(values["FORCE_HTTPS"], "true");
        assert_eq!(values["ENABLE_REGISTRATION"], "false");
    }

    #[test]
    fn secrets_are_random_hex() {
        let key = generate_secret_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_secret_key());
    }

    #[test]
    fn earlier_secrets_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_secret_key(dir.path()), None);

        fs::write(dir.path().join(ENV_FILE), "SECRET_KEY=abc\nAPP_NAME=Hub\n").unwrap();
        assert_eq!(existing_secret_key(dir.path()).as_deref(), Some("abc"));
    }
}
