//! hybridjoin - enrich a JSON-lines tuple stream with master data
//!
//! Reads stream tuples on a producer thread, joins them against a JSON-lines
//! relation with HYBRIDJOIN, and writes joined records as JSON lines.

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing_subscriber::EnvFilter;

use luma_hybridjoin::{
    HybridJoin, JoinConfig, JsonLinesRelation, PartitionPolicy, Record, StreamProducer,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream tuples, one JSON object per line
    #[arg(short, long)]
    stream: PathBuf,

    /// Master data relation, one JSON object per line
    #[arg(short, long)]
    relation: PathBuf,

    /// Joined output (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, env = "HYBRIDJOIN_HASH_SLOTS")]
    hash_slots: Option<usize>,

    #[arg(long, env = "HYBRIDJOIN_PARTITION_SIZE")]
    partition_size: Option<usize>,

    #[arg(long)]
    key_field: Option<String>,

    /// Use sequential relation blocks instead of exact-key partitions
    #[arg(long)]
    sequential: bool,

    /// Print the prometheus exposition of the final metrics to stderr
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    general: GeneralConfig,
    join: JoinConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GeneralConfig {
    log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl FileConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: FileConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&file_config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut config = file_config.join;
    if let Some(n) = args.hash_slots {
        config.hash_slots = n;
    }
    if let Some(n) = args.partition_size {
        config.partition_size = n;
    }
    if let Some(field) = &args.key_field {
        config.key_field = field.clone();
    }
    if args.sequential {
        config.partition_policy = PartitionPolicy::Sequential;
    }

    let relation = JsonLinesRelation::new(&args.relation);
    let (mut engine, producer) = HybridJoin::new(config)?;

    let stream_path = args.stream.clone();
    let reader = thread::Builder::new()
        .name("stream-reader".into())
        .spawn(move || read_stream(&stream_path, &producer))?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let result = engine.run_with_sink(&relation, |batch| {
        for record in &batch {
            writeln!(out, "{}", record.to_json_line()?)?;
        }
        Ok(())
    });
    out.flush()?;

    // dropping the engine closes the intake, so a reader still blocked on a
    // full queue after a failed run stops at once
    let metrics = engine.metrics();
    drop(engine);

    let read = match reader.join() {
        Ok(read) => read,
        Err(_) => Err(anyhow::anyhow!("stream reader thread panicked")),
    };

    let summary = result?;
    eprintln!("{}", serde_json::to_string_pretty(&summary.stats)?);
    if args.metrics {
        eprintln!("{}", metrics.encode()?);
    }

    match read {
        Ok(read) => {
            tracing::info!(read, "Stream reader finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Stream reader failed");
            Err(e.context("stream reader failed"))
        }
    }
}

/// Producer side: parse each line and submit it. Malformed lines are
/// skipped; completion is signaled however the read ends.
fn read_stream(path: &Path, producer: &StreamProducer) -> anyhow::Result<u64> {
    let result = submit_lines(path, producer);
    producer.signal_completion();
    result
}

fn submit_lines(path: &Path, producer: &StreamProducer) -> anyhow::Result<u64> {
    let file = File::open(path).with_context(|| format!("opening stream {}", path.display()))?;
    let mut read = 0u64;

    for (idx, bytes) in BufReader::new(file).split(b'\n').enumerate() {
        let bytes = bytes.with_context(|| format!("reading stream {}", path.display()))?;
        let line = match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(
                    line = idx + 1,
                    error = %e,
                    "Skipping stream tuple that is not UTF-8"
                );
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let tuple = match Record::from_json_line(&line) {
            Ok(tuple) => tuple,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "Skipping malformed stream tuple");
                continue;
            }
        };
        producer.submit(tuple)?;
        read += 1;
    }
    Ok(read)
}
