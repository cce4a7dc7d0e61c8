use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use inquire::Confirm;

use super::{
    docker,
    info::{locate_install_dir, InstallInfo},
    install::DEFAULT_INSTALL_DIR,
    nginx,
    runner::{self, CommandRunner},
};

#[derive(Args, Debug, Clone, Default)]
pub struct UninstallArgs {
    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Also delete the data directory (database, uploads, backups)
    #[arg(long)]
    pub purge_data: bool,

    /// Do not ask for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Print the steps instead of running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Removes the container, image and Nginx site. Deletes the data only with `purge_data`.
pub fn execute(info: &InstallInfo, purge_data: bool, runner: &mut dyn CommandRunner) -> Result<()> {
    runner.run_tolerant(&docker::stop_container(&info.container_name));
    runner.run_tolerant(&docker::remove_container(&info.container_name));
    runner.run_tolerant(&docker::remove_image(&info.image_name));

    if info.nginx_enabled {
        let (available, enabled) = nginx::site_paths(&info.container_name);
        runner.remove_path(&enabled)?;
        runner.remove_path(&available)?;
        runner.run_tolerant(&nginx::reload());
    }

    if purge_data {
        runner
            .remove_path(&info.install_dir.join("data"))
            .context("Deleting the data directory failed")?;
    }
    Ok(())
}

/// `imagehub uninstall`
pub fn run(args: UninstallArgs) -> Result<()> {
    let current_dir = std::env::current_dir().context("Unable to read the current directory")?;
    let install_dir = locate_install_dir(
        args.install_dir.as_deref(),
        &current_dir,
        Path::new(DEFAULT_INSTALL_DIR),
    )?;
    let info = InstallInfo::load(&install_dir)?;

    if !args.yes {
        let proceed = Confirm::new(&format!("Uninstall {}?", info.app_name))
            .with_default(false)
            .prompt()
            .map_err(|e| anyhow!("Prompt cancelled: {}", e))?;
        if !proceed {
            log::info!("Uninstall aborted");
            return Ok(());
        }
    }

    let purge_data = args.purge_data
        && (args.yes
            || Confirm::new("Permanently delete all images, users and backups?")
                .with_default(false)
                .prompt()
                .map_err(|e| anyhow!("Prompt cancelled: {}", e))?);

    let mut runner = runner::runner(args.dry_run);
    execute(&info, purge_data, runner.as_mut())?;

    if !purge_data {
        log::info!(
            "Data kept in {}",
            info.install_dir.join("data").display()
        );
    }
    log::info!("{} uninstalled", info.app_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{info::tests::sample, runner::RecordingRunner};

    #[test]
    fn uninstall_tolerates_missing_containers() {
        let info = sample(Path::new("/opt/imagehub"));
        let mut runner = RecordingRunner {
            failing: vec!["docker".to_owned()],
            ..RecordingRunner::default()
        };

        execute(&info, false, &mut runner).unwrap();

        assert_eq!(
            runner.steps,
            vec![
                "run docker stop imagehub",
                "run docker rm imagehub",
                "run docker rmi imagehub:latest",
                "remove /etc/nginx/sites-enabled/imagehub",
                "remove /etc/nginx/sites-available/imagehub",
                "run systemctl reload nginx",
            ]
        );
    }

    #[test]
    fn data_is_only_deleted_when_purging() {
        let info = InstallInfo {
            nginx_enabled: false,
            ..sample(Path::new("/opt/imagehub"))
        };

        let mut runner = RecordingRunner::default();
        execute(&info, true, &mut runner).unwrap();
        assert_eq!(
            runner.steps.last().map(String::as_str),
            Some("remove /opt/imagehub/data")
        );

        let mut runner = RecordingRunner::default();
        execute(&info, false, &mut runner).unwrap();
        assert_eq!(runner.steps.len(), 3);
    }
}
