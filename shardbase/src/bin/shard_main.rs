//! ShardBase command line
//!
//! Usage:
//!   shardbase --spec '{"kind":"hash","table":"orders","key":"user_id","tables":4}' route 123
//!   shardbase --config shards.json --table logs tables --start 2024-01-01 --end 2024-06-30
//!   shardbase --config shards.json --table orders ddl --template "CREATE TABLE orders (id BIGINT)"

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use shardbase::migrate::generate_shard_ddl;
use shardbase::sharding::shard_tables;
use shardbase::{ShardError, ShardingManifest, ShardingStrategy, StrategySpec, TimeRange, Value};

#[derive(Parser, Debug)]
#[command(name = "shardbase")]
#[command(about = "Resolve and enumerate physical shard tables")]
#[command(version)]
struct Args {
    /// Inline strategy spec (JSON)
    #[arg(long, conflicts_with = "config")]
    spec: Option<String>,

    /// Sharding manifest file (JSON)
    #[arg(short, long, requires = "table")]
    config: Option<PathBuf>,

    /// Logical table to use from the manifest
    #[arg(short, long)]
    table: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the physical table for a shard-key value
    Route {
        /// Key value; JSON literals are typed, anything else is text
        value: String,
    },
    /// List physical tables
    Tables {
        /// Window start for time strategies
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Window end for time strategies
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
    /// Print CREATE TABLE statements for every shard
    Ddl {
        /// Template written against the logical table name; defaults to
        /// the schema of the strategy definition
        #[arg(long)]
        template: Option<String>,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
}

fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(&json),
        Err(_) => Value::String(raw.to_string()),
    }
}

fn load_spec(args: &Args) -> Result<StrategySpec, ShardError> {
    if let Some(spec) = &args.spec {
        return StrategySpec::from_json(spec);
    }
    let (Some(path), Some(table)) = (&args.config, &args.table) else {
        return Err(ShardError::Config("either --spec or --config with --table is required".into()));
    };
    let manifest = ShardingManifest::load(path)?;
    manifest
        .table(table)
        .cloned()
        .ok_or_else(|| ShardError::StrategyNotFound(table.clone()))
}

fn window(
    strategy: &dyn ShardingStrategy,
    start: &Option<String>,
    end: &Option<String>,
) -> Result<Option<TimeRange>, ShardError> {
    match (strategy.as_time(), start, end) {
        (Some(time), Some(start), Some(end)) => {
            Ok(Some(time.parse_time_range(&parse_value(start), &parse_value(end))?))
        }
        _ => Ok(None),
    }
}

fn run(args: Args) -> Result<(), ShardError> {
    let spec = load_spec(&args)?;
    let strategy: Arc<dyn ShardingStrategy> = spec.build()?;
    let base = strategy.base_table_name().to_string();
    log::debug!("using {} strategy for {}", strategy.name(), base);

    match &args.command {
        Command::Route { value } => {
            println!("{}", strategy.try_table_name(&base, &parse_value(value))?);
        }
        Command::Tables { start, end } => {
            let window = window(strategy.as_ref(), start, end)?;
            for table in shard_tables(strategy.as_ref(), window.as_ref()) {
                println!("{}", table);
            }
        }
        Command::Ddl { template, start, end } => {
            let template = match template {
                Some(t) => t.clone(),
                None => spec
                    .schema()
                    .map(|s| s.create_sql(&base, false))
                    .ok_or_else(|| ShardError::Config(format!("no --template and no schema for {}", base)))?,
            };
            let window = window(strategy.as_ref(), start, end)?;
            for (_, ddl) in generate_shard_ddl(strategy.as_ref(), &template, window.as_ref()) {
                println!("{};", ddl.trim_end_matches(';'));
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
