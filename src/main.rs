use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use lead_pipeline::{
    count_properties, count_property_values, get_all_properties, get_all_property_values,
    get_load_history, import_csv_files, replace_marketing_projects, setup_database,
    GoldenComparator, MarketingRules, PipelineConfig,
};

#[derive(Parser)]
#[command(name = "lead-pipeline", version)]
#[command(about = "Ad tracking extraction and marketing lead flattening", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull tracking parameters out of a TSV list of URLs
    ExtractUrls {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compare an output file against its expected version
    Compare {
        #[arg(short, long)]
        actual: PathBuf,
        #[arg(short, long)]
        expected: PathBuf,
    },
    /// Create the tables and bulk-load property CSV files
    Load {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        properties: PathBuf,
        #[arg(long)]
        values: PathBuf,
        /// Drop and recreate the tables first
        #[arg(long)]
        reset: bool,
    },
    /// Compute projects_for_marketing
    Marketing {
        /// SQLite database (in-memory when omitted)
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long, requires = "values")]
        properties: Option<PathBuf>,
        #[arg(long, requires = "properties")]
        values: Option<PathBuf>,
        /// JSON file with the qualification rules (overrides the config)
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Store the result in the projects_for_marketing table
        #[arg(long)]
        persist: bool,
    },
}

/// Directives from `RUST_LOG`; "info" when unset or empty
fn log_filter(directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives.unwrap_or_default())
}

fn main() -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::ExtractUrls { input, output } => run_extract(&config, &input, &output),
        Commands::Compare { actual, expected } => run_compare(&actual, &expected),
        Commands::Load {
            db,
            properties,
            values,
            reset,
        } => {
            let conn = Connection::open(&db)?;
            setup_database(&conn, reset)?;
            run_load(&config, &conn, &properties, &values)?;

            for event in get_load_history(&conn, "project_properties_values")?.iter().take(5) {
                println!(
                    "  {} {}: +{} rows, {} already loaded",
                    event.loaded_at.format("%Y-%m-%d %H:%M:%S"),
                    event.source,
                    event.inserted,
                    event.duplicates
                );
            }
            Ok(())
        }
        Commands::Marketing {
            db,
            properties,
            values,
            rules,
            persist,
        } => {
            if let Some(path) = rules {
                config.marketing_rules = MarketingRules::from_file(path)?;
            }
            run_marketing(&config, db.as_deref(), properties.zip(values), persist)
        }
    }
}

fn run_extract(config: &PipelineConfig, input: &Path, output: &Path) -> Result<()> {
    let extractor = config.tracking_extractor();
    let count = extractor.extract_file(input, output)?;

    println!("✓ Wrote {} rows to {}", count, output.display());
    Ok(())
}

fn run_compare(actual: &Path, expected: &Path) -> Result<()> {
    let report = GoldenComparator::new().compare_files(actual, expected)?;

    println!("{}", report.summary());
    for d in report.discrepancies.iter().take(20) {
        println!(
            "  line {} ({:?})\n    expected: {}\n    actual:   {}",
            d.line_number,
            d.category,
            d.expected.as_deref().unwrap_or("<none>"),
            d.actual.as_deref().unwrap_or("<none>"),
        );
    }

    if !report.is_match() {
        let line = report.first_discrepancy().map_or(0, |d| d.line_number);
        bail!(
            "{} does not match {} (first difference at line {})",
            actual.display(),
            expected.display(),
            line
        );
    }

    println!("✓ Output matches expected file");
    Ok(())
}

fn run_load(
    config: &PipelineConfig,
    conn: &Connection,
    properties_csv: &Path,
    values_csv: &Path,
) -> Result<()> {
    let delimiter = config.delimiter_byte()?;

    let (properties, values) = import_csv_files(conn, properties_csv, values_csv, delimiter)?;
    info!(
        "Loaded {} new properties and {} new values",
        properties.inserted, values.inserted
    );

    println!(
        "✓ Tables populated: {} properties, {} property values",
        count_properties(conn)?,
        count_property_values(conn)?
    );
    Ok(())
}

fn run_marketing(
    config: &PipelineConfig,
    db: Option<&Path>,
    csv_files: Option<(PathBuf, PathBuf)>,
    persist: bool,
) -> Result<()> {
    if db.is_none() && csv_files.is_none() {
        bail!("Nothing to read: pass --db, or --properties with --values");
    }

    let conn = match db {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    setup_database(&conn, false)?;

    if let Some((properties_csv, values_csv)) = csv_files {
        run_load(config, &conn, &properties_csv, &values_csv)?;
    }

    let properties = get_all_properties(&conn)?;
    let values = get_all_property_values(&conn)?;

    let output = config.flattener().flatten(&properties, &values);
    info!("{}", output.report.summary());

    println!("projects_for_marketing");
    println!("----------------------------------------");
    for record in &output.records {
        println!("{}", record);
        println!("----------------------------------------");
    }
    println!("✓ {} qualified customers", output.records.len());

    if persist {
        if db.is_none() {
            warn!("--persist without --db stores into a throwaway in-memory database");
        }
        replace_marketing_projects(&conn, &output.records)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(Some("")).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_log_filter_honours_rust_log() {
        assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(log_filter(Some("warn")).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_cli_parses_marketing_flags() {
        let cli = Cli::try_parse_from([
            "lead-pipeline",
            "marketing",
            "--properties",
            "p.csv",
            "--values",
            "v.csv",
            "--rules",
            "rules.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Marketing { rules, persist, .. } => {
                assert_eq!(rules, Some(PathBuf::from("rules.json")));
                assert!(!persist);
            }
            _ => panic!("expected marketing subcommand"),
        }
    }

    #[test]
    fn test_cli_properties_require_values() {
        assert!(Cli::try_parse_from(["lead-pipeline", "marketing", "--properties", "p.csv"]).is_err());
    }
}
