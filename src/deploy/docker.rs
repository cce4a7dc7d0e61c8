use std::path::Path;

use super::{
    env_file::{CONTAINER_DATA_DIR, ENV_FILE},
    info::InstallInfo,
    runner::CommandSpec,
};
use crate::constants::DEFAULT_PORT;

pub fn build_image(image_name: &str, source_dir: &Path) -> CommandSpec {
    CommandSpec::new(
        "docker",
        [
            "build".to_owned(),
            "-t".to_owned(),
            image_name.to_owned(),
            source_dir.display().to_string(),
        ],
    )
}

/// `docker run` for the service: detached, restarted, data volume and `.env` mounted.
pub fn run_container(info: &InstallInfo) -> CommandSpec {
    let data_dir = info.install_dir.join("data");
    CommandSpec::new(
        "docker",
        [
            "run".to_owned(),
            "-d".to_owned(),
            "--name".to_owned(),
            info.container_name.clone(),
            "--restart".to_owned(),
            "unless-stopped".to_owned(),
            "-p".to_owned(),
            format!("{}:{}", info.port, DEFAULT_PORT),
            "-v".to_owned(),
            format!("{}:{}", data_dir.display(), CONTAINER_DATA_DIR),
            "--env-file".to_owned(),
            info.install_dir.join(ENV_FILE).display().to_string(),
            info.image_name.clone(),
        ],
    )
}

pub fn stop_container(container_name: &str) -> CommandSpec {
    CommandSpec::new("docker", ["stop", container_name])
}

pub fn remove_container(container_name: &str) -> CommandSpec {
    CommandSpec::new("docker", ["rm", container_name])
}

pub fn remove_image(image_name: &str) -> CommandSpec {
    CommandSpec::new("docker", ["rmi", image_name])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::info::tests::sample;

    #[test]
    fn containers_mount_the_install_data() {
        let info = sample(Path::new("/opt/imagehub"));
        assert_eq!(
            run_container(&info).to_string(),
            "docker run -d --name imagehub --restart unless-stopped -p 5000:5000 \
             -v /opt/imagehub/data:/app/data --env-file /opt/imagehub/.env imagehub:latest"
        );
        assert_eq!(
            build_image(&info.image_name, &info.source_dir).to_string(),
            "docker build -t imagehub:latest /src/imagehub"
        );
    }
}
