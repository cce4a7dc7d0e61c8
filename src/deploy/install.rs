use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::Args;
use inquire::{Confirm, Text};

use super::{
    docker,
    env_file::{self, EnvSettings, ENV_FILE},
    info::{InstallInfo, INSTALL_INFO_FILE},
    nginx,
    runner::{self, CommandRunner},
};
use crate::{config::AppConfig, constants::DEFAULT_PORT};

pub const DEFAULT_INSTALL_DIR: &str = "/opt/imagehub";
const DEFAULT_CONTAINER_NAME: &str = "imagehub";

#[derive(Args, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Display name of the application
    #[arg(long)]
    pub app_name: Option<String>,

    /// Name of the Docker container
    #[arg(long)]
    pub container_name: Option<String>,

    /// Public domain served by Nginx
    #[arg(long)]
    pub domain: Option<String>,

    /// Host port published for the container
    #[arg(long)]
    pub port: Option<u16>,

    /// Contact address for Let's Encrypt
    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Directory holding the Dockerfile (defaults to the current directory)
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Skip the Nginx reverse proxy
    #[arg(long)]
    pub no_nginx: bool,

    /// Skip Certbot
    #[arg(long)]
    pub no_ssl: bool,

    /// Accept defaults instead of prompting
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Print the steps instead of running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Everything install needs, after flags and prompts are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallPlan {
    pub info: InstallInfo,
    pub email: String,
    pub secret_key: String,
    pub max_body_mb: usize,
}

fn ask(label: &str, current: Option<String>, default: &str, interactive: bool) -> Result<String> {
    match current {
        Some(value) => Ok(value),
        None if !interactive => Ok(default.to_owned()),
        None => Text::new(label)
            .with_default(default)
            .prompt()
            .map_err(|e| anyhow!("Prompt cancelled: {}", e)),
    }
}

fn confirm(label: &str, default: bool, interactive: bool) -> Result<bool> {
    if !interactive {
        return Ok(default);
    }
    Confirm::new(label)
        .with_default(default)
        .prompt()
        .map_err(|e| anyhow!("Prompt cancelled: {}", e))
}

/// Resolves flags and, unless `--yes` was given, prompts for what is missing.
pub fn plan(args: &InstallArgs, current_dir: &Path) -> Result<InstallPlan> {
    let interactive = !args.yes;
    let defaults = AppConfig::default();

    let app_name = ask("Application name:", args.app_name.clone(), &defaults.app_name, interactive)?;
    let container_name = ask(
        "Container name:",
        args.container_name.clone(),
        DEFAULT_CONTAINER_NAME,
        interactive,
    )?;
    let port = match args.port {
        Some(port) => port,
        None => {
            let raw = ask("Host port:", None, &DEFAULT_PORT.to_string(), interactive)?;
            raw.parse()
                .with_context(|| format!("Invalid port '{}'", raw))?
        }
    };
    let install_dir = match &args.install_dir {
        Some(dir) => dir.clone(),
        None => PathBuf::from(ask("Install directory:", None, DEFAULT_INSTALL_DIR, interactive)?),
    };
    let source_dir = args
        .source_dir
        .clone()
        .unwrap_or_else(|| current_dir.to_path_buf());

    let mut nginx_enabled =
        !args.no_nginx && confirm("Set up an Nginx reverse proxy?", true, interactive)?;
    let domain = if nginx_enabled {
        ask("Domain:", args.domain.clone(), "", interactive)?
    } else {
        args.domain.clone().unwrap_or_default()
    };
    if nginx_enabled && domain.is_empty() {
        log::warn!("No domain given, skipping Nginx and SSL");
        nginx_enabled = false;
    }

    let mut ssl_enabled =
        nginx_enabled && !args.no_ssl && confirm("Request a certificate with Certbot?", true, interactive)?;
    let email = if ssl_enabled {
        ask("Email for Let's Encrypt:", args.email.clone(), "", interactive)?
    } else {
        args.email.clone().unwrap_or_default()
    };
    if ssl_enabled && email.is_empty() {
        log::warn!("No email given, skipping SSL");
        ssl_enabled = false;
    }

    let secret_key = env_file::existing_secret_key(&install_dir)
        .unwrap_or_else(env_file::generate_secret_key);

    Ok(InstallPlan {
        info: InstallInfo {
            app_name,
            image_name: format!("{}:latest", container_name),
            container_name,
            domain,
            port,
            install_dir,
            source_dir,
            nginx_enabled,
            ssl_enabled,
            installed_at: Utc::now().to_rfc3339(),
        },
        email,
        secret_key,
        max_body_mb: defaults.max_file_size / (1024 * 1024) + 1,
    })
}

/// Performs the installation described by `plan`.
pub fn execute(plan: &InstallPlan, runner: &mut dyn CommandRunner) -> Result<()> {
    let info = &plan.info;

    let env = EnvSettings {
        secret_key: plan.secret_key.clone(),
        app_name: info.app_name.clone(),
        custom_domain: info.domain.clone(),
        force_https: info.ssl_enabled,
        enable_registration: false,
    };
    runner.write_file(&info.install_dir.join(ENV_FILE), &env.render())?;

    runner
        .run(&docker::build_image(&info.image_name, &info.source_dir))
        .context("Building the Docker image failed")?;
    // A leftover container with the same name blocks `docker run`
    runner.run_tolerant(&docker::stop_container(&info.container_name));
    runner.run_tolerant(&docker::remove_container(&info.container_name));
    runner
        .run(&docker::run_container(info))
        .context("Starting the container failed")?;

    if info.nginx_enabled {
        let (available, _) = nginx::site_paths(&info.container_name);
        runner.write_file(
            &available,
            &nginx::vhost(&info.domain, info.port, plan.max_body_mb),
        )?;
        runner.run(&nginx::enable_site(&info.container_name))?;
        runner
            .run(&nginx::test_config())
            .context("Nginx rejected the generated configuration")?;
        runner.run(&nginx::reload())?;
    }

    if info.ssl_enabled {
        runner
            .run(&nginx::certbot(&info.domain, &plan.email))
            .context("Certbot failed")?;
    }

    runner.write_file(&info.install_dir.join(INSTALL_INFO_FILE), &info.render())?;
    Ok(())
}

/// `imagehub install`
pub fn run(args: InstallArgs) -> Result<()> {
    if !args.dry_run && which::which("docker").is_err() {
        bail!("docker is required but was not found in PATH");
    }
    let current_dir = std::env::current_dir().context("Unable to read the current directory")?;
    let plan = plan(&args, &current_dir)?;
    if !plan.info.source_dir.join("Dockerfile").is_file() {
        log::warn!(
            "No Dockerfile in {}, the image build will likely fail",
            plan.info.source_dir.display()
        );
    }

    let mut runner = runner::runner(args.dry_run);
    execute(&plan, runner.as_mut())?;

    let info = &plan.info;
    let url = match (info.ssl_enabled, info.nginx_enabled) {
        (true, _) => format!("https://{}", info.domain),
        (false, true) => format!("http://{}", info.domain),
        _ => format!("http://localhost:{}", info.port),
    };
    log::info!("{} is installed and available at {}", info.app_name, url);
    Ok(())
}
