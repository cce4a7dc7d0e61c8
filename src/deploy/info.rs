use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};

pub const INSTALL_INFO_FILE: &str = "INSTALL_INFO.txt";

/// Installation parameters shared between install, update and uninstall.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallInfo {
    pub app_name: String,
    pub container_name: String,
    pub image_name: String,
    pub domain: String,
    pub port: u16,
    pub install_dir: PathBuf,
    pub source_dir: PathBuf,
    pub nginx_enabled: bool,
    pub ssl_enabled: bool,
    pub installed_at: String,
}

impl InstallInfo {
    pub fn render(&self) -> String {
        let lines = [
            ("APP_NAME", self.app_name.clone()),
            ("CONTAINER_NAME", self.container_name.clone()),
            ("IMAGE_NAME", self.image_name.clone()),
            ("DOMAIN", self.domain.clone()),
            ("PORT", self.port.to_string()),
            ("INSTALL_DIR", self.install_dir.display().to_string()),
            ("SOURCE_DIR", self.source_dir.display().to_string()),
            ("NGINX_ENABLED", self.nginx_enabled.to_string()),
            ("SSL_ENABLED", self.ssl_enabled.to_string()),
            ("INSTALLED_AT", self.installed_at.clone()),
        ];
        lines
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let values = parse_key_values(contents);
        let get = |key: &str| -> Result<String> {
            values
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow!("{} is missing {}", INSTALL_INFO_FILE, key))
        };
        let flag = |key: &str| values.get(key).is_some_and(|value| value == "true");

        let port = get("PORT")?;
        Ok(InstallInfo {
            app_name: get("APP_NAME")?,
            container_name: get("CONTAINER_NAME")?,
            image_name: get("IMAGE_NAME")?,
            domain: values.get("DOMAIN").cloned().unwrap_or_default(),
            port: port
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", port))?,
            install_dir: PathBuf::from(get("INSTALL_DIR")?),
            source_dir: PathBuf::from(get("SOURCE_DIR")?),
            nginx_enabled: flag("NGINX_ENABLED"),
            ssl_enabled: flag("SSL_ENABLED"),
            installed_at: values.get("INSTALLED_AT").cloned().unwrap_or_default(),
        })
    }

    pub fn load(install_dir: &Path) -> Result<Self> {
        let path = install_dir.join(INSTALL_INFO_FILE);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid {}", path.display()))
    }
}

/// `KEY=value` lines. Blank lines and `#` comments are skipped, quotes around values dropped.
pub fn parse_key_values(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (key.trim().to_owned(), value.to_owned())
        })
        .collect()
}

/// Finds the installation: the explicit flag, then the current directory, then `default`.
pub fn locate_install_dir(flag: Option<&Path>, current: &Path, default: &Path) -> Result<PathBuf> {
    if let Some(dir) = flag {
        if dir.join(INSTALL_INFO_FILE).is_file() {
            return Ok(dir.to_path_buf());
        }
        return Err(anyhow!(
            "No {} found in {}",
            INSTALL_INFO_FILE,
            dir.display()
        ));
    }

    [current, default]
        .into_iter()
        .find(|dir| dir.join(INSTALL_INFO_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            anyhow!(
                "Unable to find an installation. Run from the install directory or pass --install-dir"
            )
        })
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub fn sample(install_dir: &Path) -> InstallInfo {
        InstallInfo {
            app_name: "Image Scale Hub".to_owned(),
            container_name: "imagehub".to_owned(),
            image_name: "imagehub:latest".to_owned(),
            domain: "img.example.com".to_owned(),
            port: 5000,
            install_dir: install_dir.to_path_buf(),
            source_dir: PathBuf::from("/src/imagehub"),
            nginx_enabled: true,
            ssl_enabled: false,
            installed_at: "2026-01-01T00:00:00+00:00".to_owned(),
        }
    }

    #[test]
    fn info_survives_a_write_and_read() {
        let info = sample(Path::new("/opt/imagehub"));
        let rendered = info.render();
        assert!(rendered.starts_with("APP_NAME=Image Scale Hub\n"));
        assert!(rendered.contains("NGINX_ENABLED=true\n"));
        assert_eq!(InstallInfo::parse(&rendered).unwrap(), info);
    }

    #[test]
    fn missing_keys_are_reported() {
        let err = InstallInfo::parse("APP_NAME=Hub\n").unwrap_err();
        assert!(err.to_string().contains("CONTAINER_NAME"));
    }

    #[test]
    fn key_values_ignore_comments_and_quotes() {
        let values = parse_key_values("# generated\n\nSECRET_KEY=\"abc=def\"\nPORT = 80\n");
        assert_eq!(values["SECRET_KEY"], "abc=def");
        assert_eq!(values["PORT"], "80");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn install_dir_lookup_order() {
        let current = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        fs::write(fallback.path().join(INSTALL_INFO_FILE), "").unwrap();

        let found = locate_install_dir(None, current.path(), fallback.path()).unwrap();
        assert_eq!(found, fallback.path());

        fs::write(current.path().join(INSTALL_INFO_FILE), "").unwrap();
        let found = locate_install_dir(None, current.path(), fallback.path()).unwrap();
        assert_eq!(found, current.path());

        let missing = tempfile::tempdir().unwrap();
        assert!(locate_install_dir(Some(missing.path()), current.path(), fallback.path()).is_err());
    }
}
