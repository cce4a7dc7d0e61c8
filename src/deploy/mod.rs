//! Operator subcommands: install, update and uninstall of the Docker deployment.
//!
//! They share no state with the server. Everything they know is read from flags,
//! prompts and the install directory's `INSTALL_INFO.txt` and `.env`.

mod docker;
mod env_file;
mod info;
mod nginx;
mod runner;

pub mod install;
pub mod uninstall;
pub mod update;
