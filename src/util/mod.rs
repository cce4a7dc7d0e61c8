pub mod archive;
pub mod audit;
pub mod auth;
pub mod cors;
pub mod image;
pub mod path;
pub mod rate_limit;
pub mod security;
