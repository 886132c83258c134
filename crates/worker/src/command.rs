use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use fieldsync_core::Job;

/// Command-line interface of the sync worker.
#[derive(Parser, Debug)]
#[command(
    name = "fieldsync-worker",
    version,
    about = "Keeps a device's job store in sync with the shared remote store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The requested command; no subcommand means `run`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}

/// What the worker was asked to do.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the sync engine until interrupted.
    Run,
    /// Flush completed jobs and clear the device, then exit.
    Purge,
    /// Load jobs from a JSON file into an empty local store, then exit.
    Seed {
        /// JSON array of jobs in the local (camelCase) shape.
        path: PathBuf,
    },
}

/// Read a JSON array of jobs in the local (camelCase) shape.
pub fn read_seed_file(path: &Path) -> anyhow::Result<Vec<Job>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let jobs: Vec<Job> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of jobs", path.display()))?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        let argv = std::iter::once("fieldsync-worker").chain(args.iter().copied());
        Cli::try_parse_from(argv).map(Cli::into_command)
    }

    #[test]
    fn no_arguments_runs_the_engine() {
        assert_eq!(parse(&[]).unwrap(), Command::Run);
        assert_eq!(parse(&["run"]).unwrap(), Command::Run);
    }

    #[test]
    fn purge_and_seed_parse() {
        assert_eq!(parse(&["purge"]).unwrap(), Command::Purge);
        assert_eq!(
            parse(&["seed", "jobs.json"]).unwrap(),
            Command::Seed {
                path: PathBuf::from("jobs.json")
            }
        );
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert_eq!(
            parse(&["seed"]).unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
        assert_eq!(
            parse(&["sync"]).unwrap_err().kind(),
            clap::error::ErrorKind::InvalidSubcommand
        );
        assert!(parse(&["purge", "now"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        <Cli as CommandFactory>::command().debug_assert();
    }

    #[test]
    fn seed_file_uses_local_job_shape() {
        let dir = std::env::temp_dir().join(format!("fieldsync-seed-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.json");
        std::fs::write(
            &path,
            r#"[{"id":"JOB-1","assignee":"tech-247","address":"12 Elm St","issue":"No heat",
                "notes":"","distance":"2.1 mi","estTime":"15 min","priority":"high",
                "status":"pending","timeWindow":"9-11","lastUpdated":"2024-01-01T09:00:00Z"}]"#,
        )
        .unwrap();

        let jobs = read_seed_file(&path).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].est_time, "15 min");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
