//! Command-line front end for a corpus data directory.

use clap::{Parser, Subcommand};
use corpus_config::{Config, default_config_path};
use corpus_engine::{ByteRange, Engine, IngestReport};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Display, Error)]
enum CliError {
    #[display("could not load configuration")]
    Config,
    #[display("engine operation failed")]
    Engine,
    #[display("could not read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
    #[display("could not write output")]
    Output,
    #[display("document not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("container verification failed")]
    Unverified,
}

impl CliError {
    /// Process exit status for each failure class.
    fn exit_code(&self) -> u8 {
        match self {
            Self::Engine => 1,
            Self::Config => 2,
            Self::Input(_) | Self::Output => 3,
            Self::NotFound(_) => 4,
            Self::Unverified => 5,
        }
    }
}

type Result<T> = std::result::Result<T, exn::Exn<CliError>>;

#[derive(Parser)]
#[command(name = "corpus")]
#[command(about = "Deduplicating, compressed document store")]
#[command(version)]
#[command(after_help = "Exit status: 1 engine failure, 2 bad configuration, 3 unreadable input or unwritable output, \
                       4 unknown document, 5 container failed verification")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true, env = "CORPUS_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a document, read from a file or stdin
    Ingest {
        document_id: String,
        /// Input file; stdin when omitted or "-"
        input: Option<PathBuf>,
    },
    /// Print a document, or a byte range of it
    Query {
        document_id: String,
        /// First byte (inclusive)
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Last byte (exclusive); end of document when omitted
        #[arg(long)]
        end: Option<u64>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a document
    Delete { document_id: String },
    /// Print engine statistics as JSON
    Stats,
    /// Drop index entries of unreferenced chunks
    Purge,
    /// Check every record in the chunk container
    Verify {
        /// Also decompress payloads and check their hashes
        #[arg(long, default_value_t = false)]
        decode: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::from(err.exit_code())
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.or_else(default_config_path);
    let mut config = Config::load(path.as_deref()).or_raise(|| CliError::Config)?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    let engine = Engine::open(&config).await.or_raise(|| CliError::Engine)?;
    let result = dispatch(&engine, cli.command).await;
    let closed = engine.close().await.or_raise(|| CliError::Engine);
    result.and(closed)
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest { document_id, input } => {
            let data = read_input(input).await?;
            let report = engine.ingest(&document_id, &data).await.or_raise(|| CliError::Engine)?;
            print_json(&ingest_json(&document_id, data.len(), &report)).await
        },
        Commands::Query { document_id, start, end, output } => {
            let end = match end {
                Some(end) => end,
                None => engine
                    .document_length(&document_id)
                    .await
                    .or_raise(|| CliError::Engine)?
                    .ok_or_raise(|| CliError::NotFound(document_id.clone()))?,
            };
            let bytes = engine
                .query(&document_id, ByteRange::new(start, end))
                .await
                .or_raise(|| CliError::Engine)?
                .ok_or_raise(|| CliError::NotFound(document_id.clone()))?;
            write_output(output, &bytes).await
        },
        Commands::Delete { document_id } => {
            let deleted = engine.delete_document(&document_id).await.or_raise(|| CliError::Engine)?;
            if !deleted {
                exn::bail!(CliError::NotFound(document_id));
            }
            print_json(&json!({ "document_id": document_id, "deleted": true })).await
        },
        Commands::Stats => {
            let stats = engine.stats().await.or_raise(|| CliError::Engine)?;
            print_json(&serde_json::to_value(stats).or_raise(|| CliError::Output)?).await
        },
        Commands::Purge => {
            let report = engine.purge_orphans().await.or_raise(|| CliError::Engine)?;
            print_json(&json!({ "purged": report.purged, "reclaimable_bytes": report.reclaimable_bytes })).await
        },
        Commands::Verify { decode } => {
            let report = engine.verify(decode).await.or_raise(|| CliError::Engine)?;
            let failures: Vec<_> = report
                .failures
                .iter()
                .map(|failure| {
                    json!({
                        "offset": failure.offset,
                        "hash": failure.hash.map(|hash| hash.to_hex()),
                        "reason": failure.reason,
                    })
                })
                .collect();
            print_json(&json!({
                "records": report.records,
                "bytes": report.bytes,
                "unindexed": report.unindexed,
                "failures": failures,
            }))
            .await?;
            if !report.is_clean() {
                exn::bail!(CliError::Unverified);
            }
            Ok(())
        },
    }
}

fn ingest_json(document_id: &str, length: usize, report: &IngestReport) -> serde_json::Value {
    let chunks: Vec<_> = report
        .chunks
        .iter()
        .map(|chunk| {
            json!({
                "hash": chunk.hash.to_hex(),
                "start": chunk.range.start,
                "end": chunk.range.end,
                "is_new": chunk.is_new,
                "stored_len": chunk.stored_len,
            })
        })
        .collect();
    json!({
        "document_id": document_id,
        "length": length,
        "bytes_stored": report.bytes_stored,
        "bytes_saved": report.bytes_saved,
        "chunks": chunks,
    })
}

async fn read_input(input: Option<PathBuf>) -> Result<Vec<u8>> {
    match input.filter(|path| path.as_os_str() != "-") {
        Some(path) => tokio::fs::read(&path).await.or_raise(|| CliError::Input(path)),
        None => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await.or_raise(|| CliError::Input(PathBuf::from("-")))?;
            Ok(data)
        },
    }
}

async fn write_output(output: Option<PathBuf>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(&path, bytes).await.or_raise(|| CliError::Output),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(bytes).await.or_raise(|| CliError::Output)?;
            stdout.flush().await.or_raise(|| CliError::Output)
        },
    }
}

async fn print_json(value: &serde_json::Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value).or_raise(|| CliError::Output)?;
    text.push('\n');
    write_output(None, text.as_bytes()).await
}
