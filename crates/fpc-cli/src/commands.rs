use std::io::{self, Write};

use anyhow::{bail, Context};
use colored::Colorize;
use fpc_cache::{CacheConfig, CacheError, JournaledStore, LoadReport, SaveOutcome};
use serde_json::json;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Dump(args) => cmd_dump(args, config),
        Command::Stats(args) => cmd_stats(args, config, cli.format),
        Command::Verify(args) => cmd_verify(args, config),
        Command::Compact(args) => cmd_compact(args, config),
        Command::Invalidate(args) => cmd_invalidate(args, config),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => CacheConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(ratio) = cli.compaction_ratio {
        config = config.with_compaction_ratio(ratio);
    }
    config.validate()?;
    Ok(config)
}

fn open(args: &RootArgs, config: CacheConfig) -> anyhow::Result<JournaledStore> {
    let store = JournaledStore::open(&args.root, config)
        .with_context(|| format!("opening cache at {}", args.root.display()))?;
    print_warnings(store.load_report());
    Ok(store)
}

fn print_warnings(report: &LoadReport) {
    for warning in &report.warnings {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

fn cmd_dump(args: RootArgs, config: CacheConfig) -> anyhow::Result<()> {
    let store = open(&args, config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    store.dump(&mut out)?;
    out.flush()?;
    Ok(())
}

fn cmd_stats(args: RootArgs, config: CacheConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store = open(&args, config)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats_json(&store))?),
        OutputFormat::Text => {
            let base = store
                .base_stamp()
                .map_or_else(|| "none".to_string(), |s| s.to_string());
            println!("Cache: {}", args.root.display().to_string().bold());
            println!("  Entries: {}", store.len().to_string().bold());
            println!("  Snapshot stamp: {}", base.cyan());
            println!(
                "  Journal: {} records (ratio {:.4}, compacts above {})",
                store.journal_len(),
                store.journal_ratio(),
                store.config().compaction_ratio
            );
            let report = store.load_report();
            if report.warnings.is_empty() {
                println!("  Load: {}", "clean".green());
            } else {
                println!("  Load: {} warning(s)", report.warnings.len().to_string().yellow());
            }
        }
    }
    Ok(())
}

fn stats_json(store: &JournaledStore) -> serde_json::Value {
    let report = store.load_report();
    json!({
        "entries": store.len(),
        "base_stamp": store.base_stamp().map(|s| s.to_string()),
        "journal_records": store.journal_len(),
        "journal_ratio": store.journal_ratio(),
        "compaction_ratio": store.config().compaction_ratio,
        "snapshot_entries": report.snapshot_entries,
        "replayed_records": report.journal_records,
        "warnings": report.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

fn cmd_verify(args: RootArgs, config: CacheConfig) -> anyhow::Result<()> {
    let store = match JournaledStore::open(&args.root, config) {
        Ok(store) => store,
        Err(CacheError::CorruptData { path, reason }) => {
            println!("{} {}: {}", "✗".red().bold(), path.display(), reason);
            bail!("snapshot at {} is corrupt", path.display());
        }
        Err(e) => return Err(e.into()),
    };

    let report = store.load_report();
    if report.warnings.is_empty() {
        println!("{} Cache integrity verified", "✓".green().bold());
    } else {
        println!("{} Cache loaded with recoverable damage", "!".yellow().bold());
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
    println!("  Snapshot entries: {}", report.snapshot_entries);
    println!("  Journal records: {}", report.journal_records);
    Ok(())
}

fn cmd_compact(args: RootArgs, config: CacheConfig) -> anyhow::Result<()> {
    let mut store = JournaledStore::open_or_empty(&args.root, config)
        .with_context(|| format!("opening cache at {}", args.root.display()))?;
    print_warnings(store.load_report());
    match store.compact()? {
        SaveOutcome::Full { entries, stamp } => println!(
            "{} Compacted {} entries into snapshot {}",
            "✓".green().bold(),
            entries,
            stamp.to_string().cyan()
        ),
        _ => println!("Already compact."),
    }
    Ok(())
}

fn cmd_invalidate(args: InvalidateArgs, config: CacheConfig) -> anyhow::Result<()> {
    let root = RootArgs { root: args.root };
    let mut store = open(&root, config)?;
    for key in &args.keys {
        match store.invalidate(key) {
            Some(_) => println!("  {} {}", "removed:".green(), key),
            None => println!("  {} {}", "absent:".dimmed(), key),
        }
    }
    match store.persist()? {
        SaveOutcome::Incremental { records } => println!("Journaled {records} record(s)."),
        SaveOutcome::Full { entries, .. } => println!("Rewrote snapshot ({entries} entries)."),
        SaveOutcome::Unchanged => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use clap::Parser;
    use fpc_cache::ManualClock;
    use fpc_store::InMemoryFs;

    #[test]
    fn ratio_flag_overrides_default() {
        let cli = Cli::try_parse_from(["fpc", "--compaction-ratio", "0.2", "dump", "x"]).unwrap();
        assert_eq!(load_config(&cli).unwrap().compaction_ratio, 0.2);
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        let cli = Cli::try_parse_from(["fpc", "--compaction-ratio", "3", "dump", "x"]).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let cli = Cli {
            command: Command::Dump(RootArgs { root: PathBuf::from("x") }),
            config: Some(PathBuf::from("/nonexistent/fpc.toml")),
            compaction_ratio: None,
            verbose: false,
            format: OutputFormat::Text,
        };
        let err = load_config(&cli).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fpc.toml"));
    }

    fn root_in(dir: &tempfile::TempDir) -> RootArgs {
        RootArgs { root: dir.path().join("cache") }
    }

    #[test]
    fn verify_accepts_clean_cache() {
        let dir = tempfile::tempdir().unwrap();
        let args = root_in(&dir);
        let mut store = JournaledStore::open(&args.root, CacheConfig::default()).unwrap();
        let mut entry = store.create_entry("k");
        entry.digest();
        store.put("k", entry).unwrap();
        store.save().unwrap();

        assert!(cmd_verify(args, CacheConfig::default()).is_ok());
    }

    #[test]
    fn verify_fails_on_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let args = root_in(&dir);
        std::fs::write(fpc_cache::snapshot_path(&args.root), b"FPCS\x01garbage").unwrap();

        let err = cmd_verify(args, CacheConfig::default()).unwrap_err();
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn stats_json_shape() {
        let mut store = JournaledStore::open_with(
            "/c/cache",
            CacheConfig::default(),
            Arc::new(InMemoryFs::new()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        let mut entry = store.create_entry("k");
        entry.digest();
        store.put("k", entry).unwrap();
        store.save().unwrap();

        let stats = stats_json(&store);
        assert_eq!(stats["entries"], 1);
        assert_eq!(stats["journal_records"], 0);
        assert!(stats["base_stamp"].is_string());
        assert_eq!(stats["warnings"].as_array().map(Vec::len), Some(0));
    }
}
