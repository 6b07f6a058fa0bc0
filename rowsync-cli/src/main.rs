//! CLI for the rowsync persistence engine.
//!
//! Provides commands for creating tables, loading records, reading them
//! back, and purging expired data.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rowsync::config::DEFAULT_TABLE_NAME;
use rowsync::timestamp::parse_date_time_smart;
use rowsync::{Record, StoreConfig, TableDao, TableReporter, TableSpec, Value};
use tracing_subscriber::EnvFilter;

/// rowsync: schema-synchronizing relational persistence for flat records.
#[derive(Parser)]
#[command(name = "rowsync", version, about)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args)]
struct StoreArgs {
    /// Path to a JSON table spec (name, fields, keys, indexes).
    #[arg(long, global = true, default_value = "table.json")]
    spec: PathBuf,

    /// Path to a JSON store configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store connection string, e.g. "sqlite:./metrics.db".
    #[arg(long, global = true)]
    connection_string: Option<String>,

    /// Table name. Overrides `tableName` from the configuration and the name
    /// in the spec file.
    #[arg(long, global = true)]
    table: Option<String>,

    /// Extra configuration as key=value (e.g. dataRetention=86400).
    #[arg(long = "arg", global = true, value_name = "KEY=VALUE")]
    args: Vec<String>,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the table if it does not exist.
    Create,

    /// Write JSON records, one object per line.
    Write {
        /// Input file. Reads stdin when omitted.
        input: Option<PathBuf>,
    },

    /// Read one row by primary key.
    Get {
        /// Primary-key values in declared order. Leading keys may be given
        /// alone.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Count the rows of the table.
    Count,

    /// Read rows from the table.
    Query {
        /// Maximum number of rows (0 = 1000).
        #[arg(long, default_value = "0")]
        limit: usize,

        /// Columns to select, comma separated. All columns when omitted.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Run this SQL instead of a column select.
        #[arg(long, conflicts_with_all = ["limit", "columns"])]
        sql: Option<String>,

        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Delete data by day.
    Purge {
        /// First day to delete (e.g. 2018-08-30).
        #[arg(long, required_unless_present_any = ["partition", "expired"])]
        from: Option<String>,

        /// Last day to delete, inclusive. Defaults to --from.
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Delete one day partition by number (1-31).
        #[arg(long, conflicts_with_all = ["from", "expired"])]
        partition: Option<u32>,

        /// Run one retention cycle using the configured retention.
        #[arg(long, conflicts_with = "from")]
        expired: bool,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// One JSON object per line.
    Json,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create => cmd_create(&cli.store),
        Commands::Write { input } => cmd_write(&cli.store, input.as_deref()),
        Commands::Get { keys } => cmd_get(&cli.store, &keys),
        Commands::Count => cmd_count(&cli.store),
        Commands::Query {
            limit,
            columns,
            sql,
            format,
        } => cmd_query(&cli.store, limit, &columns, sql.as_deref(), &format),
        Commands::Purge {
            from,
            to,
            partition,
            expired,
        } => cmd_purge(&cli.store, from.as_deref(), to.as_deref(), partition, expired),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Resolves the store configuration and table spec from the shared options.
fn load(store: &StoreArgs) -> CliResult<(StoreConfig, TableSpec)> {
    let mut config = match &store.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    config.update_from_args(&parse_args(&store.args)?)?;
    if let Some(connection_string) = &store.connection_string {
        config.connection_string = Some(connection_string.clone());
    }

    let text = std::fs::read_to_string(&store.spec)
        .map_err(|e| format!("cannot read table spec '{}': {e}", store.spec.display()))?;
    let mut spec: TableSpec = serde_json::from_str(&text)
        .map_err(|e| format!("invalid table spec '{}': {e}", store.spec.display()))?;
    let table = resolve_table_name(store.table.as_deref(), &config.table_name, &spec.table);
    tracing::debug!(table = table.as_str(), spec = %store.spec.display(), "resolved table");
    spec.table.clone_from(&table);
    config.table_name = table;
    config.validate()?;
    Ok((config, spec))
}

/// Picks the table name: `--table` first, then a name configured through
/// `--config` or `--arg tableName=...`, then the spec file.
fn resolve_table_name(flag: Option<&str>, configured: &str, spec_table: &str) -> String {
    match flag {
        Some(table) => table.to_string(),
        None if configured != DEFAULT_TABLE_NAME && !configured.trim().is_empty() => {
            configured.to_string()
        }
        None => spec_table.to_string(),
    }
}

fn parse_args(pairs: &[String]) -> CliResult<HashMap<String, Vec<String>>> {
    let mut args: HashMap<String, Vec<String>> = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{pair}'"))?;
        args.entry(key.trim().to_string())
            .or_default()
            .push(value.to_string());
    }
    Ok(args)
}

fn open_dao(store: &StoreArgs) -> CliResult<(StoreConfig, TableDao)> {
    let (config, spec) = load(store)?;
    let dao = TableDao::new(config.connection_manager()?, spec).with_policy(config.retention_policy());
    Ok((config, dao))
}

/// Implements `rowsync create`.
fn cmd_create(store: &StoreArgs) -> CliResult<()> {
    let (config, dao) = open_dao(store)?;
    let schema = dao.create_table(config.table_partition)?;
    println!("Table: {}", schema.table);
    for column in &schema.columns {
        println!("  {} {} ({:?})", column.name, column.column_type, column.role);
    }
    if let Some(key) = &schema.partition_key {
        println!("  Partitioned by HASH({key})");
    }
    dao.close();
    Ok(())
}

/// Implements `rowsync write [input]`.
fn cmd_write(store: &StoreArgs, input: Option<&Path>) -> CliResult<()> {
    let (config, spec) = load(store)?;
    let reporter = TableReporter::new(config, spec);

    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path)?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut written = 0u64;
    let mut failed = 0u64;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match reporter.report(line.as_str()) {
            Ok(_) => written += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(line = number + 1, "failed to write record: {e}");
            }
        }
    }
    reporter.close();

    println!("Wrote {written} records ({failed} failed)");
    if failed > 0 {
        return Err(format!("{failed} records were not written").into());
    }
    Ok(())
}

/// Parses a key argument: JSON scalars keep their type, anything else is
/// text.
fn key_value(arg: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(arg) {
        Ok(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Ok(serde_json::Value::Bool(b)) => Value::Bool(b),
        Ok(serde_json::Value::String(s)) => Value::Text(s),
        _ => Value::from(arg),
    }
}

/// Implements `rowsync get <keys>...`.
fn cmd_get(store: &StoreArgs, keys: &[String]) -> CliResult<()> {
    let (_, dao) = open_dao(store)?;
    let values: Vec<Value> = keys.iter().map(|k| key_value(k)).collect();
    match dao.get_by_primary_keys(&values)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record.to_json())?),
        None => return Err("no matching row".into()),
    }
    Ok(())
}

/// Implements `rowsync count`.
fn cmd_count(store: &StoreArgs) -> CliResult<()> {
    let (_, dao) = open_dao(store)?;
    println!("{}", dao.total_count()?);
    Ok(())
}

/// Implements `rowsync query`.
fn cmd_query(
    store: &StoreArgs,
    limit: usize,
    columns: &[String],
    sql: Option<&str>,
    format: &OutputFormat,
) -> CliResult<()> {
    let (_, dao) = open_dao(store)?;
    let records = match sql {
        Some(sql) => dao.execute_query(sql)?,
        None => {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            dao.query_columns(limit, &columns)?
        }
    };

    match format {
        OutputFormat::Json => {
            for record in &records {
                println!("{}", serde_json::to_string(&record.to_json())?);
            }
        }
        OutputFormat::Csv => print_csv(&records),
    }
    Ok(())
}

fn print_csv(records: &[Record]) {
    let Some(first) = records.first() else {
        return;
    };
    let header: Vec<&str> = first.iter().map(|(name, _)| name).collect();
    println!("{}", header.join(","));
    for record in records {
        let cells: Vec<String> = record.iter().map(|(_, value)| csv_cell(value)).collect();
        println!("{}", cells.join(","));
    }
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(s) if s.contains([',', '"', '\n']) => format!("\"{}\"", s.replace('"', "\"\"")),
        Value::Text(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a day (`2018-08-30`) or any timestamp the write path accepts.
fn parse_day(arg: &str) -> CliResult<DateTime<Utc>> {
    if let Ok(day) = NaiveDate::parse_from_str(arg.trim(), "%Y-%m-%d") {
        return Ok(day.and_time(NaiveTime::MIN).and_utc());
    }
    parse_date_time_smart(arg).ok_or_else(|| format!("invalid date '{arg}'").into())
}

/// Implements `rowsync purge`.
fn cmd_purge(
    store: &StoreArgs,
    from: Option<&str>,
    to: Option<&str>,
    partition: Option<u32>,
    expired: bool,
) -> CliResult<()> {
    let (config, dao) = open_dao(store)?;

    tracing::debug!(?from, ?to, ?partition, expired, "purging {}", dao.table());
    let deleted = if let Some(day) = partition {
        dao.delete_by_partition(day)?
    } else if expired {
        dao.cleanup_expired(Utc::now())?.unwrap_or(0)
    } else {
        let start = parse_day(from.ok_or("--from is required")?)?;
        let end = match to {
            Some(to) => parse_day(to)?,
            None => start,
        };
        if end < start {
            return Err("--to must not be before --from".into());
        }
        dao.delete_by_date_range(start, end, config.table_partition)?
    };

    println!("Deleted {deleted} rows from {}", dao.table());
    dao.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_flag_wins() {
        assert_eq!(resolve_table_name(Some("flag"), "configured", "spec"), "flag");
        assert_eq!(resolve_table_name(Some("flag"), DEFAULT_TABLE_NAME, "spec"), "flag");
    }

    #[test]
    fn test_configured_table_beats_spec_file() {
        assert_eq!(resolve_table_name(None, "configured", "spec"), "configured");
    }

    #[test]
    fn test_spec_file_used_when_nothing_configured() {
        assert_eq!(resolve_table_name(None, DEFAULT_TABLE_NAME, "spec"), "spec");
    }

    #[test]
    fn test_parse_args_groups_repeated_keys() {
        let args = parse_args(&[
            "tableName=a".to_string(),
            "tableName=b".to_string(),
            "dataRetention=86400".to_string(),
        ])
        .unwrap();
        assert_eq!(args["tableName"], vec!["a", "b"]);
        assert!(parse_args(&["tableName".to_string()]).is_err());
    }

    #[test]
    fn test_parse_day_accepts_dates_and_timestamps() {
        let day = parse_day("2018-08-30").unwrap();
        assert_eq!(day.timestamp(), 1_535_587_200);
        assert_eq!(parse_day("1535587200").unwrap(), day);
        assert!(parse_day("someday").is_err());
    }
}
