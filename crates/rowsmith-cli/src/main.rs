//! `rowsmith`: load JSON records into a SQLite database.
//!
//! Reads `rowsmith.toml` (or the path given with `--config`), layered with
//! `ROWSMITH_*` environment variables, then runs one subcommand.
//!
//! # Usage
//!
//! ```
//! rowsmith insert dogs dogs.json --pk id --alter
//! cat dogs.json | rowsmith upsert dogs - --pk id
//! rowsmith enable-fts dogs name bio --tokenize porter
//! rowsmith optimize
//! ```

use std::{
  fs,
  io::{self, Read},
  path::{Path, PathBuf},
};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use rowsmith_core::{
  PrimaryKey, Record, WriteMode, WriteOptions, options::DEFAULT_BATCH_SIZE,
  value::record_from_json,
};
use rowsmith_sqlite::{Database, DatabaseConfig, FtsOptions, FtsVersion};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Load JSON records into SQLite")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "rowsmith.toml")]
  config: PathBuf,

  /// Database file; overrides `database` from the config.
  #[arg(short, long, value_name = "FILE")]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Insert records, creating the table if needed.
  Insert(WriteArgs),
  /// Insert records, merging fields into rows whose key already exists.
  Upsert(WriteArgs),
  /// Add a full-text index over some columns of a table.
  EnableFts {
    table:   String,
    #[arg(required = true)]
    columns: Vec<String>,
    /// Use FTS4 instead of FTS5.
    #[arg(long)]
    fts4:        bool,
    #[arg(long)]
    tokenize:    Option<String>,
    /// Leave the index to `optimize` instead of keeping it in step.
    #[arg(long)]
    no_triggers: bool,
    /// Replace an existing index.
    #[arg(long)]
    replace:     bool,
  },
  DisableFts {
    table: String,
  },
  /// Reconcile and merge full-text indexes; all of them when no table is named.
  Optimize {
    tables: Vec<String>,
  },
  /// List tables.
  Tables {
    /// Include row counts.
    #[arg(long)]
    counts: bool,
  },
}

#[derive(Args)]
struct WriteArgs {
  table: String,
  /// JSON file holding an array of objects or a single object; `-` for stdin.
  input: PathBuf,
  /// Primary key column; repeat for a compound key.
  #[arg(long)]
  pk:         Vec<String>,
  /// Add columns for fields the table does not have yet.
  #[arg(long)]
  alter:      bool,
  #[arg(long, conflicts_with = "ignore")]
  replace:    bool,
  #[arg(long)]
  ignore:     bool,
  /// Delete existing rows first.
  #[arg(long)]
  truncate:   bool,
  #[arg(long)]
  batch_size: Option<usize>,
  /// Key rows by a hash of their content, stored in this column.
  #[arg(long)]
  hash_id:    Option<String>,
}

// ─── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CliConfig {
  database:   PathBuf,
  db:         DatabaseConfig,
  batch_size: usize,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      database:   PathBuf::from("rowsmith.db"),
      db:         DatabaseConfig::default(),
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }
}

fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("ROWSMITH")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise CliConfig")
}

// ─── Entry point ──────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let cfg = load_config(&cli.config)?;
  let path = cli.database.unwrap_or(cfg.database);

  let mut db = Database::open(&path, cfg.db)
    .with_context(|| format!("failed to open database at {}", path.display()))?;

  match cli.command {
    Command::Insert(args) => write(&mut db, args, WriteMode::Insert, cfg.batch_size),
    Command::Upsert(args) => write(&mut db, args, WriteMode::Upsert, cfg.batch_size),
    Command::EnableFts { table, columns, fts4, tokenize, no_triggers, replace } => {
      let opts = FtsOptions {
        version: if fts4 { FtsVersion::Fts4 } else { FtsVersion::Fts5 },
        tokenize,
        create_triggers: !no_triggers,
        replace,
      };
      let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
      let index = db
        .enable_fts(&table, &columns, &opts)
        .with_context(|| format!("enabling full-text search on {table}"))?;
      print_json(&index)
    }
    Command::DisableFts { table } => db
      .disable_fts(&table)
      .with_context(|| format!("disabling full-text search on {table}")),
    Command::Optimize { tables } => optimize(&mut db, tables),
    Command::Tables { counts } => {
      for name in db.table_names()? {
        if counts {
          let count = db.count(&name)?;
          print_json(&serde_json::json!({ "table": name, "count": count }))?;
        } else {
          println!("{name}");
        }
      }
      Ok(())
    }
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

fn write(db: &mut Database, args: WriteArgs, mode: WriteMode, batch_size: usize) -> anyhow::Result<()> {
  let mode = conflict_mode(mode, &args)?;
  let records = read_records(&args.input)?;
  let opts = WriteOptions {
    pk: (!args.pk.is_empty()).then(|| PrimaryKey::new(args.pk)),
    mode,
    alter: args.alter,
    truncate: args.truncate,
    batch_size: args.batch_size.unwrap_or(batch_size),
    hash_id: args.hash_id,
    ..WriteOptions::default()
  };

  let summary = db
    .insert_all(&args.table, records, &opts)
    .with_context(|| format!("writing to {}", args.table))?;
  tracing::info!(
    table = %args.table,
    written = summary.written,
    failed = summary.failed.len(),
    "write finished"
  );
  print_json(&summary)
}

/// `--replace` and `--ignore` pick the conflict policy of an insert; an
/// upsert already has one.
fn conflict_mode(mode: WriteMode, args: &WriteArgs) -> anyhow::Result<WriteMode> {
  match mode {
    WriteMode::Upsert if args.replace || args.ignore => {
      bail!("--replace and --ignore only apply to insert")
    }
    WriteMode::Insert if args.replace => Ok(WriteMode::Replace),
    WriteMode::Insert if args.ignore => Ok(WriteMode::Ignore),
    mode => Ok(mode),
  }
}

fn optimize(db: &mut Database, tables: Vec<String>) -> anyhow::Result<()> {
  let tables = if tables.is_empty() {
    let mut indexed = Vec::new();
    for name in db.table_names()? {
      if db.detect_fts(&name)?.is_some() {
        indexed.push(name);
      }
    }
    indexed
  } else {
    tables
  };
  for table in tables {
    let report = db
      .optimize(&table)
      .with_context(|| format!("optimizing {table}"))?;
    print_json(&serde_json::json!({ "table": table, "report": report }))?;
  }
  Ok(())
}

// ─── Input ────────────────────────────────────────────────────────────────────

fn read_records(input: &Path) -> anyhow::Result<Vec<Record>> {
  let raw = if input == Path::new("-") {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf).context("reading stdin")?;
    buf
  } else {
    fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?
  };
  let json: serde_json::Value = serde_json::from_str(&raw).context("parsing JSON input")?;
  records_from(json)
}

fn records_from(json: serde_json::Value) -> anyhow::Result<Vec<Record>> {
  let items = match json {
    serde_json::Value::Array(items) => items,
    object @ serde_json::Value::Object(_) => vec![object],
    _ => bail!("expected a JSON object or an array of objects"),
  };
  items
    .into_iter()
    .enumerate()
    .map(|(i, item)| {
      record_from_json(item).with_context(|| format!("item {i} is not a JSON object"))
    })
    .collect()
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string(value)?);
  Ok(())
}
