use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fpc",
    about = "Inspect and maintain a persistent action fingerprint cache",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with cache settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the journal-to-snapshot compaction threshold
    #[arg(long, global = true)]
    pub compaction_ratio: Option<f64>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print every entry in key order
    Dump(RootArgs),
    /// Show entry count, stamps and journal size
    Stats(RootArgs),
    /// Load strictly and report any recovered damage
    Verify(RootArgs),
    /// Fold the journal into a fresh snapshot
    Compact(RootArgs),
    /// Remove entries and persist
    Invalidate(InvalidateArgs),
}

#[derive(Args)]
pub struct RootArgs {
    /// Cache root; files are `<root>.snapshot` and `<root>.journal`
    pub root: PathBuf,
}

#[derive(Args)]
pub struct InvalidateArgs {
    pub root: PathBuf,
    /// Action keys to remove
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fpc",
            "stats",
            "/tmp/cache",
            "--format",
            "json",
            "--compaction-ratio",
            "0.5",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.compaction_ratio, Some(0.5));
        assert!(matches!(cli.command, Command::Stats(ref a) if a.root == PathBuf::from("/tmp/cache")));
    }

    #[test]
    fn invalidate_requires_keys() {
        assert!(Cli::try_parse_from(["fpc", "invalidate", "/tmp/cache"]).is_err());
        let cli = Cli::try_parse_from(["fpc", "invalidate", "/tmp/cache", "a", "b"]).unwrap();
        match cli.command {
            Command::Invalidate(args) => assert_eq!(args.keys, vec!["a", "b"]),
            _ => panic!("expected invalidate"),
        }
    }
}
