use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use axum_extra::{headers::UserAgent, TypedHeader};

const MAX_FILENAME_LENGTH: usize = 255;
const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";
const COMMON_PATTERNS: [&str; 5] = ["password", "123456", "qwerty", "admin", "letmein"];

/// Reduces a client supplied filename to a safe basename.
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut sanitized: String = basename
        .chars()
        .filter(|c| !is_control(*c))
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    if sanitized.chars().count() > MAX_FILENAME_LENGTH {
        let (stem, extension) = split_extension(&sanitized);
        let keep = MAX_FILENAME_LENGTH.saturating_sub(extension.chars().count());
        sanitized = stem.chars().take(keep).chain(extension.chars()).collect();
    }

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "unnamed_file".to_owned();
    }
    sanitized
}

fn is_control(c: char) -> bool {
    matches!(c as u32, 0x00..=0x1f | 0x7f..=0x9f)
}

/// Splits `name.ext` into `("name", ".ext")`. Dotfiles have no extension.
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(index) if index > 0 => filename.split_at(index),
        _ => (filename, ""),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordStrength {
    pub valid: bool,
    pub score: i32,
    pub suggestions: Vec<&'static str>,
}

pub fn check_password_strength(password: &str) -> PasswordStrength {
    let mut score = 0;
    let mut suggestions = Vec::new();
    let length = password.chars().count();

    let checks: [(bool, &'static str); 5] = [
        (length >= 8, "Use at least 8 characters"),
        (
            password.chars().any(char::is_uppercase),
            "Include uppercase letters",
        ),
        (
            password.chars().any(char::is_lowercase),
            "Include lowercase letters",
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            "Include numbers",
        ),
        (
            password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)),
            "Include special characters",
        ),
    ];
    for (passed, suggestion) in checks {
        if passed {
            score += 1;
        } else {
            suggestions.push(suggestion);
        }
    }

    let lowered = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|pattern| lowered.contains(pattern)) {
        score -= 2;
        suggestions.push("Avoid common patterns");
    }

    PasswordStrength {
        valid: score >= 3 && length >= 6,
        score,
        suggestions,
    }
}

/// 3 to 20 characters of letters, digits and underscores.
pub fn validate_username(username: &str) -> bool {
    (3..=20).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".-".contains(c));
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());

    local_ok && host_ok && tld_ok
}

/// Accepts local paths (`/app`) and absolute http(s) URLs pointing at `host`.
pub fn is_safe_redirect(target: &str, host: &str) -> bool {
    if target.starts_with('/') {
        return !target.starts_with("//") && !target.starts_with("/\\");
    }

    let Some(rest) = target
        .strip_prefix("https://")
        .or_else(|| target.strip_prefix("http://"))
    else {
        return false;
    };
    let netloc = rest.split(['/', '?', '#']).next().unwrap_or_default();
    !host.is_empty() && netloc.eq_ignore_ascii_case(host)
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_owned)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Who is calling: address and user agent, used for audit records and rate limits.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: Option<String>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = TypedHeader::<UserAgent>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(agent)| agent.as_str().to_owned());

        Ok(ClientInfo {
            ip: client_ip(&parts.headers, peer),
            user_agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn filenames_are_reduced_to_safe_basenames() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\cat.png"), "cat.png");
        assert_eq!(sanitize_filename("a<b>c?.jpg"), "a_b_c_.jpg");
        assert_eq!(sanitize_filename("bad\u{0007}name.png"), "badname.png");
        assert_eq!(sanitize_filename(".."), "unnamed_file");
        assert_eq!(sanitize_filename(""), "unnamed_file");
    }

    #[test]
    fn long_filenames_keep_their_extension() {
        let long = format!("{}.jpeg", "x".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.len(), 255);
        assert!(sanitized.ends_with(".jpeg"));
    }

    #[test]
    fn extensions_are_split_at_last_dot() {
        assert_eq!(split_extension("photo.final.png"), ("photo.final", ".png"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
    }

    #[test]
    fn password_strength_scores() {
        let strong = check_password_strength("Sunflower7!");
        assert!(strong.valid);
        assert_eq!(strong.score, 5);
        assert!(strong.suggestions.is_empty());

        let weak = check_password_strength("abc");
        assert!(!weak.valid);
        assert!(weak.suggestions.contains(&"Use at least 8 characters"));

        let common = check_password_strength("Password1!");
        assert_eq!(common.score, 3);
        assert!(common.suggestions.contains(&"Avoid common patterns"));
    }

    #[test]
    fn usernames_and_emails_are_validated() {
        assert!(validate_username("jane_doe42"));
        assert!(!validate_username("jd"));
        assert!(!validate_username("jane-doe"));
        assert!(!validate_username(&"a".repeat(21)));

        assert!(validate_email("jane.doe+tag@example.co"));
        assert!(!validate_email("jane@localhost"));
        assert!(!validate_email("@example.com"));
        assert!(!validate_email("jane@example.c"));
    }

    #[test]
    fn redirects_stay_on_site() {
        assert!(is_safe_redirect("/app", "hub.example.com"));
        assert!(!is_safe_redirect("//evil.com/app", "hub.example.com"));
        assert!(is_safe_redirect(
            "https://hub.example.com/my-files",
            "hub.example.com"
        ));
        assert!(!is_safe_redirect("https://evil.com/", "hub.example.com"));
        assert!(!is_safe_redirect("javascript:alert(1)", "hub.example.com"));
    }

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.2"));
        assert_eq!(client_ip(&headers, Some(peer)), "172.16.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
