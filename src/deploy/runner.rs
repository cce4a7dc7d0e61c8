use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec {
            program: program.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
            dir: None,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Side effects of the deploy commands: running programs and touching files.
pub trait CommandRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<()>;

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()>;

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()>;

    /// Removes a file or a whole directory. Missing paths are not an error.
    fn remove_path(&mut self, path: &Path) -> Result<()>;

    /// Runs `command` and only logs a failure.
    fn run_tolerant(&mut self, command: &CommandSpec) {
        if let Err(err) = self.run(command) {
            log::warn!("Ignoring failure of `{}`: {:#}", command, err);
        }
    }
}

/// Executes everything for real.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<()> {
        log::info!("Running `{}`", command);
        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.dir {
            process.current_dir(dir);
        }

        let status = process
            .status()
            .with_context(|| format!("Unable to start `{}`", command))?;
        if !status.success() {
            bail!("`{}` failed with {}", command, status);
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create {}", parent.display()))?;
        }
        fs::write(path, contents).with_context(|| format!("Unable to write {}", path.display()))?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Unable to create {}", parent.display()))?;
        }
        fs::copy(from, to).with_context(|| {
            format!("Unable to copy {} to {}", from.display(), to.display())
        })?;
        log::info!("Copied {} to {}", from.display(), to.display());
        Ok(())
    }

    fn remove_path(&mut self, path: &Path) -> Result<()> {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("Unable to remove {}", path.display()))
            }
            _ => {
                log::info!("Removed {}", path.display());
                Ok(())
            }
        }
    }
}

/// Path and size only. `.env` holds the secret key.
fn describe_write(path: &Path, contents: &str) -> String {
    format!("write {} ({} bytes)", path.display(), contents.len())
}

/// Logs every step instead of performing it.
#[derive(Debug, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<()> {
        match &command.dir {
            Some(dir) => log::info!("[dry-run] (in {}) {}", dir.display(), command),
            None => log::info!("[dry-run] {}", command),
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        log::info!("[dry-run] {}", describe_write(path, contents));
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        log::info!("[dry-run] copy {} to {}", from.display(), to.display());
        Ok(())
    }

    fn remove_path(&mut self, path: &Path) -> Result<()> {
        log::info!("[dry-run] remove {}", path.display());
        Ok(())
    }
}

/// Picks the runner for `--dry-run`.
pub fn runner(dry_run: bool) -> Box<dyn CommandRunner> {
    if dry_run {
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner)
    }
}

/// Remembers every step. Programs listed in `failing` report an error.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingRunner {
    pub steps: Vec<String>,
    pub files: std::collections::HashMap<PathBuf, String>,
    pub failing: Vec<String>,
}

#[cfg(test)]
impl RecordingRunner {
    pub fn commands(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| step.strip_prefix("run "))
            .collect()
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&mut self, command: &CommandSpec) -> Result<()> {
        self.steps.push(format!("run {}", command));
        if self.failing.iter().any(|program| *program == command.program) {
            bail!("{} is failing", command.program);
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, contents: &str) -> Result<()> {
        self.steps.push(format!("write {}", path.display()));
        self.files.insert(path.to_path_buf(), contents.to_owned());
        Ok(())
    }

    fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        self.steps
            .push(format!("copy {} {}", from.display(), to.display()));
        Ok(())
    }

    fn remove_path(&mut self, path: &Path) -> Result<()> {
        self.steps.push(format!("remove {}", path.display()));
        Ok(())
    }
}
