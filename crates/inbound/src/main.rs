//! Inbound - command-line ingestion runner

use anyhow::{Context, Result};
use clap::Parser;
use inbound::config::InboundConfig;
use inbound::job::Job;
use inbound::models::Metadata;
use inbound::query::describe_query;
use inbound::sink::CsvSink;
use inbound::tap::CsvFileTap;
use inbound_common::logging::{init_logging, LogConfig, LogLevel};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "inbound")]
#[command(author, version, about = "Tabular data ingestion runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Copy a CSV file into another CSV file with provenance columns
    Load {
        /// Input CSV file (with header row)
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Job name recorded in the metadata columns
        #[arg(long)]
        job_name: String,

        /// Source environment recorded in the metadata columns
        #[arg(long)]
        source_env: String,

        /// Run identifier (random UUID if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Add the raw JSON column
        #[arg(long)]
        raw: bool,

        /// Rows per batch read from the input
        #[arg(long, env = "INBOUND_FETCH_SIZE")]
        fetch_size: Option<usize>,
    },

    /// Print the zero-row variant of a SELECT statement
    DescribeQuery {
        /// The SELECT statement
        sql: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("inbound")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Load {
            input,
            output,
            job_name,
            source_env,
            run_id,
            raw,
            fetch_size,
        } => {
            let config = InboundConfig::from_env()?;
            let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            info!(input = %input.display(), output = %output.display(), run_id = %run_id, "Loading");

            let tap = CsvFileTap::new(&input).with_fetch_size(fetch_size.unwrap_or(config.tap.fetch_size));
            let file = File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let sink = CsvSink::new(BufWriter::new(file));

            let summary = Job::new(tap, sink)
                .with_metadata(Metadata::new(source_env, run_id, job_name))
                .with_raw(raw)
                .run()
                .context("Load failed")?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
        },
        Command::DescribeQuery { sql } => {
            println!("{}", describe_query(&sql)?);
        },
    }

    Ok(())
}
