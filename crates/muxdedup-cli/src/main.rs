use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use muxdedup_engine::{ConfigError, RunConfig};
use muxdedup_storage::{ErrorKind, RepositoryError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "muxdedup")]
#[command(about = "Find and resolve duplicate Tvheadend muxes")]
struct Cli {
    /// Trace every request sent to the server
    #[arg(long)]
    debug: bool,

    /// Apply updates and deletions instead of only reporting them
    #[arg(long = "no-dry-run", alias = "nodryrun", conflicts_with = "snapshot")]
    no_dry_run: bool,

    /// Work on an exported `{ "<class>": [...] }` file instead of the server.
    /// Only TVH_MUX_CLASS is read and nothing is ever mutated.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let run = RunConfig {
        debug: cli.debug,
        dry_run: !cli.no_dry_run,
    };
    let summary = muxdedup_engine::run_once_from_env(run, cli.snapshot.as_deref()).await?;
    println!(
        "dedup complete: muxes={} pairs={} duplicates={} updated={} deleted={} skipped={} dry_run={}",
        summary.muxes,
        summary.pairs_scanned,
        summary.duplicates,
        summary.updated.len(),
        summary.deleted.len(),
        summary.skipped,
        summary.dry_run
    );
    if let Some(path) = &cli.summary_json {
        muxdedup_engine::write_summary_json(path, &summary).await?;
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 2 configuration, 10 transport, 11 protocol, 1 anything else.
fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitCode::from(2);
        }
        if let Some(repo_err) = cause.downcast_ref::<RepositoryError>() {
            return match repo_err.kind() {
                ErrorKind::Transport => ExitCode::from(10),
                ErrorKind::Protocol => ExitCode::from(11),
            };
        }
    }
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_is_the_default() {
        let cli = Cli::try_parse_from(["muxdedup"]).expect("parse");
        assert!(!cli.no_dry_run);
        assert!(!cli.debug);
    }

    #[test]
    fn both_live_spellings_are_accepted() {
        for flag in ["--no-dry-run", "--nodryrun"] {
            let cli = Cli::try_parse_from(["muxdedup", "--debug", flag]).expect("parse");
            assert!(cli.no_dry_run, "{flag}");
            assert!(cli.debug);
        }
        assert!(Cli::try_parse_from(["muxdedup", "--dryrun"]).is_err());
    }

    #[test]
    fn snapshot_runs_cannot_go_live() {
        let cli = Cli::try_parse_from(["muxdedup", "--snapshot", "export.json"]).expect("parse");
        assert_eq!(cli.snapshot.as_deref(), Some(std::path::Path::new("export.json")));
        for flag in ["--no-dry-run", "--nodryrun"] {
            assert!(
                Cli::try_parse_from(["muxdedup", "--snapshot", "export.json", flag]).is_err(),
                "{flag}"
            );
        }
    }

    #[test]
    fn error_kinds_map_to_distinct_exit_codes() {
        let config = anyhow::Error::new(ConfigError::MissingCredentials);
        assert_eq!(exit_code_for(&config), ExitCode::from(2));

        let transport = anyhow::Error::new(RepositoryError::Transport {
            status: 401,
            reason: "Unauthorized".to_string(),
            url: "http://localhost:9981/api/raw/export".to_string(),
        })
        .context("fetching channels");
        assert_eq!(exit_code_for(&transport), ExitCode::from(10));

        let protocol = anyhow::Error::new(RepositoryError::Protocol {
            url: "memory://snapshot".to_string(),
            message: "not an object".to_string(),
        });
        assert_eq!(exit_code_for(&protocol), ExitCode::from(11));

        assert_eq!(exit_code_for(&anyhow::anyhow!("disk full")), ExitCode::FAILURE);
    }
}
