use std::path::{Path, PathBuf};

use super::runner::CommandSpec;

const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";

/// `(available, enabled)` vhost paths for a site.
pub fn site_paths(site: &str) -> (PathBuf, PathBuf) {
    (
        Path::new(SITES_AVAILABLE).join(site),
        Path::new(SITES_ENABLED).join(site),
    )
}

/// Reverse proxy from port 80 on `domain` to the container on `port`.
pub fn vhost(domain: &str, port: u16, max_body_mb: usize) -> String {
    format!(
        r#"server {{
    listen 80;
    server_name {domain};

    client_max_body_size {max_body_mb}M;

    location / {{
        proxy_pass http://127.0.0.1:{port};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 120s;
    }}
}}
"#
    )
}

pub fn enable_site(site: &str) -> CommandSpec {
    let (available, enabled) = site_paths(site);
    CommandSpec::new(
        "ln",
        [
            "-sf".to_owned(),
            available.display().to_string(),
            enabled.display().to_string(),
        ],
    )
}

pub fn test_config() -> CommandSpec {
    CommandSpec::new("nginx", ["-t"])
}

pub fn reload() -> CommandSpec {
    CommandSpec::new("systemctl", ["reload", "nginx"])
}

pub fn certbot(domain: &str, email: &str) -> CommandSpec {
    CommandSpec::new(
        "certbot",
        [
            "--nginx",
            "-d",
            domain,
            "--non-interactive",
            "--agree-tos",
            "-m",
            email,
            "--redirect",
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vhost_proxies_to_the_container() {
        let config = vhost("img.example.com", 8080, 16);
        assert!(config.contains("server_name img.example.com;"));
        assert!(config.contains("proxy_pass http://127.0.0.1:8080;"));
        assert!(config.contains("client_max_body_size 16M;"));
    }

    #[test]
    fn certbot_runs_unattended() {
        assert_eq!(
            certbot("img.example.com", "ops@example.com").to_string(),
            "certbot --nginx -d img.example.com --non-interactive --agree-tos \
             -m ops@example.com --redirect"
        );
        assert_eq!(
            enable_site("imagehub").to_string(),
            "ln -sf /etc/nginx/sites-available/imagehub /etc/nginx/sites-enabled/imagehub"
        );
    }
}
