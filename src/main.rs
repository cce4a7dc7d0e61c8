mod cleaner;
mod config;
mod constants;
mod db;
mod deploy;
mod error;
mod handlers;
mod models;
mod server;
mod util;

#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};

use deploy::{install::InstallArgs, uninstall::UninstallArgs, update::UpdateArgs};

/// Image Scale Hub: self-hosted image tools with user management.
#[derive(Parser)]
#[command(name = "imagehub", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Build and start the Docker deployment, optionally behind Nginx with Certbot
    Install(InstallArgs),
    /// Back up the database and rebuild the running deployment
    Update(UpdateArgs),
    /// Remove the container, image and Nginx site
    Uninstall(UninstallArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve().await,
        Command::Install(args) => deploy::install::run(args),
        Command::Update(args) => deploy::update::run(args),
        Command::Uninstall(args) => deploy::uninstall::run(args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::try_parse_from(["imagehub"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["imagehub", "install", "--yes", "--port", "8080"]).unwrap();
        match cli.command {
            Some(Command::Install(args)) => {
                assert!(args.yes);
                assert_eq!(args.port, Some(8080));
            }
            _ => panic!("expected install"),
        }
    }
}
