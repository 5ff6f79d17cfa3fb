use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use chrono::Local;
use clap::{ArgGroup, Parser, Subcommand};
use tracing::Level;
use tracing_appender::non_blocking;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt};
use tracing_unwrap::ResultExt;
use voice_cache::{
    CacheConfig, DEFAULT_VOICE, HttpFetcher, PiperLoader, Registry, Synthesizer, VoiceCache,
    config::{
        DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_READ_TIMEOUT, default_models_dir,
    },
};

#[derive(Parser)]
#[command(version, about = "Download, cache and speak with Piper voices")]
struct Cli {
    /// Directory holding downloaded voices
    #[arg(long, env = "VOICE_CACHE_MODELS_DIR", default_value_os_t = default_models_dir())]
    models_dir: PathBuf,

    /// Additional voices as a JSON catalog
    #[arg(long, env = "VOICE_CACHE_CATALOG")]
    catalog: Option<PathBuf>,

    /// Path or name of the piper executable
    #[arg(long, env = "PIPER_BIN", default_value = "piper")]
    piper: PathBuf,

    /// How often waiters re-check an in-flight download
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_interval_ms: u64,

    /// Seconds to wait for a download connection
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    connect_timeout_secs: u64,

    /// Seconds a download may go without receiving data
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT.as_secs())]
    read_timeout_secs: u64,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known voices and whether they are downloaded
    Voices,

    /// Print the descriptor of one voice as JSON
    Describe { id: String },

    /// Download a voice without loading it
    Download {
        #[arg(default_value = DEFAULT_VOICE)]
        id: String,
    },

    /// Synthesize text into a WAV file
    #[command(group(ArgGroup::new("input").required(true).args(["text", "file"])))]
    Speak {
        #[arg(long, short, default_value = DEFAULT_VOICE)]
        voice: String,

        /// Text to speak
        #[arg(long, short)]
        text: Option<String>,

        /// Text file, one segment per line
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Output WAV path
        #[arg(long, short, default_value = "speech.wav")]
        output: PathBuf,

        /// Print the WAV as base64 to stdout instead of writing a file
        #[arg(long)]
        base64: bool,
    },
}

fn read_non_empty_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let f =
        File::open(path).with_context(|| format!("Failed to open text file {}", path.display()))?;
    let reader = BufReader::new(f);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to get line of text file")?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    Ok(lines)
}

fn build_synthesizer(cli: &Cli) -> anyhow::Result<Synthesizer> {
    let mut registry = Registry::builtin();
    if let Some(catalog) = &cli.catalog {
        registry
            .extend_from_file(catalog)
            .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
        tracing::info!("Loaded voice catalog {}", catalog.display());
    }

    let config = CacheConfig::default()
        .with_models_dir(&cli.models_dir)
        .with_poll_interval(Duration::from_millis(cli.poll_interval_ms));
    tracing::info!("Using models dir {}", config.models_dir.display());

    let fetcher = Arc::new(HttpFetcher::new(
        Duration::from_secs(cli.connect_timeout_secs),
        Duration::from_secs(cli.read_timeout_secs),
    )?);
    let loader = Arc::new(PiperLoader::new(&cli.piper));
    Ok(Synthesizer::new(VoiceCache::new(
        registry, &config, fetcher, loader,
    )))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let synth = build_synthesizer(&cli)?;

    match cli.command {
        Command::Voices => {
            for status in synth.status().await {
                let language = synth
                    .describe(&status.id)?
                    .language()
                    .unwrap_or("?")
                    .to_string();
                println!(
                    "{:<24} {:<4} {}",
                    status.id,
                    language,
                    if status.on_disk { "downloaded" } else { "remote" }
                );
            }
        }
        Command::Describe { id } => {
            let descriptor = synth.describe(&id)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Download { id } => {
            let local = synth.cache().download(&id).await?;
            for (kind, path) in &local.local_paths {
                println!("{kind}: {}", path.display());
            }
        }
        Command::Speak {
            voice,
            text,
            file,
            output,
            base64,
        } => {
            let segments = match (text, file) {
                (Some(text), _) => vec![text],
                (None, Some(file)) => read_non_empty_lines(&file)?,
                (None, None) => unreachable!("clap requires text or file"),
            };
            tracing::info!("Speaking {} segment(s) with {voice}", segments.len());

            if base64 {
                let encoded = synth.synthesize_batch_base64(&segments, &voice).await?;
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{encoded}")?;
            } else {
                let wav = synth.synthesize_batch(&segments, &voice).await?;
                if wav.is_empty() {
                    tracing::warn!("Nothing to speak, no file written");
                    return Ok(());
                }
                tokio::fs::write(&output, &wav)
                    .await
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                tracing::info!("Wrote {} ({} bytes)", output.display(), wav.len());
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.log_dir).expect("Failed to create log dir");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let file_path = cli.log_dir.join(format!("{timestamp}.log"));
    let file_appender = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&file_path)
        .expect("failed to create log file");
    let (non_blocking_writer, _guard) = non_blocking(file_appender);

    let indicatif_layer = IndicatifLayer::new();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_level(true)
        .with_writer(indicatif_layer.get_stderr_writer())
        .finish()
        .with(indicatif_layer)
        .with(
            fmt::Layer::default()
                .with_ansi(false)
                .with_writer(non_blocking_writer),
        );

    tracing::subscriber::set_global_default(subscriber).expect_or_log("Init tracing failed");

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        drop(_guard);
        std::process::exit(1);
    }
}
