use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use super::{
    docker,
    info::{locate_install_dir, InstallInfo},
    install::DEFAULT_INSTALL_DIR,
    runner::{self, CommandRunner, CommandSpec},
};

#[derive(Args, Debug, Clone, Default)]
pub struct UpdateArgs {
    #[arg(long)]
    pub install_dir: Option<PathBuf>,

    /// Run `git pull` in the source directory before rebuilding
    #[arg(long)]
    pub pull: bool,

    /// Print the steps instead of running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Where the pre-update database copy goes.
pub fn backup_path(install_dir: &Path, timestamp: &str) -> PathBuf {
    install_dir
        .join("data")
        .join("backups")
        .join(format!("imagehub_{}.db", timestamp))
}

/// Backs up the database, optionally pulls, rebuilds and replaces the container.
pub fn execute(info: &InstallInfo, pull: bool, runner: &mut dyn CommandRunner) -> Result<()> {
    let database = info.install_dir.join("data").join("imagehub.db");
    if database.is_file() {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        runner
            .copy_file(&database, &backup_path(&info.install_dir, &timestamp))
            .context("Backing up the database failed")?;
    } else {
        log::warn!("No database at {}, skipping backup", database.display());
    }

    if pull {
        runner
            .run(&CommandSpec::new("git", ["pull"]).in_dir(&info.source_dir))
            .context("git pull failed")?;
    }

    runner
        .run(&docker::build_image(&info.image_name, &info.source_dir))
        .context("Building the Docker image failed")?;
    runner.run_tolerant(&docker::stop_container(&info.container_name));
    runner.run_tolerant(&docker::remove_container(&info.container_name));
    runner
        .run(&docker::run_container(info))
        .context("Starting the container failed")?;
    Ok(())
}

/// `imagehub update`
pub fn run(args: UpdateArgs) -> Result<()> {
    let current_dir = std::env::current_dir().context("Unable to read the current directory")?;
    let install_dir = locate_install_dir(
        args.install_dir.as_deref(),
        &current_dir,
        Path::new(DEFAULT_INSTALL_DIR),
    )?;
    let info = InstallInfo::load(&install_dir)?;
    log::info!("Updating {} in {}", info.app_name, install_dir.display());

    let mut runner = runner::runner(args.dry_run);
    execute(&info, args.pull, runner.as_mut())?;

    log::info!("{} updated", info.app_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::deploy::{info::tests::sample, runner::RecordingRunner};

    #[test]
    fn updates_back_up_then_replace_the_container() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/imagehub.db"), b"sqlite").unwrap();
        let info = sample(dir.path());
        let mut runner = RecordingRunner::default();

        execute(&info, true, &mut runner).unwrap();

        assert!(runner.steps[0].starts_with("copy "));
        assert!(runner.steps[0].contains("/data/backups/imagehub_"));
        let commands = runner.commands();
        assert_eq!(
            commands[..4],
            [
                "git pull",
                "docker build -t imagehub:latest /src/imagehub",
                "docker stop imagehub",
                "docker rm imagehub",
            ]
        );
        assert!(commands[4].starts_with("docker run -d --name imagehub"));
    }

    #[test]
    fn missing_databases_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let info = sample(dir.path());
        let mut runner = RecordingRunner::default();

        execute(&info, false, &mut runner).unwrap();
        assert!(runner.steps.iter().all(|step| !step.starts_with("copy ")));
        assert_eq!(runner.commands().len(), 4);
    }

    #[test]
    fn backups_are_timestamped() {
        assert_eq!(
            backup_path(Path::new("/opt/imagehub"), "20260101_120000"),
            PathBuf::from("/opt/imagehub/data/backups/imagehub_20260101_120000.db")
        );
    }
}
