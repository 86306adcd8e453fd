use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rulegate",
    version,
    about = "Evaluate access requests against database and storage rules"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "rulegate.yaml", global = true)]
    pub config: PathBuf,

    /// Database rules file (overrides config file setting)
    #[arg(long, global = true)]
    pub database_rules: Option<PathBuf>,

    /// Storage rules file (overrides config file setting)
    #[arg(long, global = true)]
    pub storage_rules: Option<PathBuf>,

    /// Document store JSON used for lookups (overrides config file setting)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Per-request evaluation deadline in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Maximum document lookups per request
    #[arg(long, global = true)]
    pub max_lookups: Option<usize>,

    /// Audit log path (overrides config file setting)
    #[arg(long, global = true)]
    pub audit_log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one request or an array of requests from a JSON file and
    /// print one decision per line
    Check {
        /// JSON file holding a request object or an array of them
        requests: PathBuf,
    },
    /// Load and validate rules, auth settings, indexes and the document store
    Validate,
    /// Print the validated composite-index descriptor as JSON
    Indexes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rulegate",
            "check",
            "requests.json",
            "--max-lookups",
            "3",
            "--store",
            "store.json",
        ])
        .unwrap();
        assert_eq!(cli.max_lookups, Some(3));
        assert_eq!(cli.store, Some(PathBuf::from("store.json")));
        assert_eq!(cli.config, PathBuf::from("rulegate.yaml"));
        assert!(matches!(cli.command, Command::Check { ref requests } if requests == &PathBuf::from("requests.json")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["rulegate"]).is_err());
    }
}
