pub mod admin;
pub mod api;
pub mod auth;
pub mod health;
pub mod images;

use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Parses an optional numeric form field, falling back to `default` when absent or blank.
pub fn number_field<T: FromStr>(name: &str, value: Option<&str>, default: T) -> AppResult<T> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_request(format!("Invalid value for {}", name))),
    }
}

/// HTML checkbox semantics: checked boxes submit `on`.
pub fn checkbox(value: Option<&str>) -> bool {
    value == Some("on")
}
