/*!
autobackup - periodically upload a snapshot file to local or S3 storage.

Unchanged snapshots are detected by digest and not uploaded again.
*/

use std::path::PathBuf;

use anyhow::{anyhow, bail};
use autobackup_core::observability::{init_observability, render_prometheus, LogFormat};
use autobackup_core::{
    create_storage, CounterSnapshot, CycleOutcome, FileProvider, StorageClient, StorageConfig,
    Uploader, UploaderConfig, UploaderStatus,
};
use clap::{Parser, Subcommand, ValueEnum};
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "autobackup")]
#[command(about = "Periodically upload a snapshot, skipping unchanged content")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "AUTOBACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Destination URI (s3://bucket/key or a local file path); overrides the config file
    #[arg(short, long, global = true, env = "AUTOBACKUP_DEST")]
    dest: Option<String>,

    /// File to snapshot on every cycle
    #[arg(short, long, global = true, env = "AUTOBACKUP_SOURCE")]
    source: Option<PathBuf>,

    /// Seconds between upload cycles; overrides the config file
    #[arg(short, long, global = true)]
    interval_secs: Option<u64>,

    /// Gzip snapshots before upload; overrides the config file
    #[arg(long, global = true)]
    compress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload on every interval until interrupted
    Run {
        /// Pause uploads while this file exists
        #[arg(long)]
        pause_file: Option<PathBuf>,
    },
    /// Run a single upload cycle and print the resulting status
    Once {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
        /// Also print counters in Prometheus text format
        #[arg(long)]
        metrics: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let config = build_config(&cli)?;
    let source = cli
        .source
        .clone()
        .ok_or_else(|| anyhow!("--source (or AUTOBACKUP_SOURCE) is required"))?;

    let storage = create_storage(&config.destination).await?;
    let uploader = Uploader::from_config(storage, FileProvider::new(source), &config)?;

    match cli.command {
        Commands::Run { pause_file } => run(uploader, pause_file).await,
        Commands::Once { format, metrics } => once(uploader, format, metrics).await,
    }
}

fn init_logging(cli: &Cli) -> Result<(), anyhow::Error> {
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    let directive = if cli.verbose {
        "autobackup=debug"
    } else {
        "autobackup=info"
    };
    init_observability(format, directive)?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<UploaderConfig, anyhow::Error> {
    let mut config = match (&cli.config, &cli.dest) {
        (Some(path), _) => UploaderConfig::from_file(path)?,
        (None, Some(dest)) => UploaderConfig::new(StorageConfig::from_uri(dest)?),
        (None, None) => bail!("either --config or --dest is required"),
    };

    if let (Some(_), Some(dest)) = (&cli.config, &cli.dest) {
        config.destination = StorageConfig::from_uri(dest)?;
    }
    if let Some(secs) = cli.interval_secs {
        config.interval_ms = secs.saturating_mul(1000);
    }
    if cli.compress {
        config.compress = true;
    }

    config.validate()?;
    Ok(config)
}

type CliUploader = Uploader<Box<dyn StorageClient>, FileProvider>;

async fn run(uploader: CliUploader, pause_file: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, stopping"),
            Err(e) => error!(error = %e, "failed to listen for interrupt, stopping"),
        }
        on_signal.cancel();
    });

    uploader
        .start_with_gate(cancel, move || {
            pause_file.as_ref().map_or(true, |path| !path.exists())
        })
        .await;

    let counters = uploader.counters().snapshot();
    info!(
        uploads_ok = counters.num_uploads_ok,
        uploads_fail = counters.num_uploads_fail,
        uploads_skipped = counters.num_uploads_skipped,
        total_bytes = counters.total_upload_bytes,
        "upload service stopped"
    );
    Ok(())
}

async fn once(uploader: CliUploader, format: OutputFormat, metrics: bool) -> Result<(), anyhow::Error> {
    let result = uploader.upload(&CancellationToken::new()).await;
    match &result {
        Ok(CycleOutcome::Uploaded { bytes, duration, .. }) => {
            info!(bytes = *bytes, duration = ?duration, "snapshot uploaded");
        }
        Ok(CycleOutcome::Skipped { .. }) => info!("snapshot unchanged, upload skipped"),
        Err(e) => error!(error = %e, "upload cycle failed"),
    }

    let status = uploader.status();
    let counters = uploader.counters().snapshot();
    match format {
        OutputFormat::Table => println!("{}", Table::new(status_rows(&status, &counters))),
        OutputFormat::Json => {
            let report = serde_json::json!({
                "status": status.to_json(),
                "counters": serde_json::to_value(counters)?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    if metrics {
        print!("{}", render_prometheus(&counters)?);
    }

    result.map(|_| ()).map_err(Into::into)
}

fn status_rows(status: &UploaderStatus, counters: &CounterSnapshot) -> Vec<StatusRow> {
    let row = |field: &'static str, value: String| StatusRow { field, value };
    vec![
        row("Destination", status.upload_destination.clone()),
        row("Interval", status.upload_interval.clone()),
        row("Compress", status.compress.to_string()),
        row("Last upload", status.last_upload_time.clone()),
        row("Last duration", status.last_upload_duration.clone()),
        row("Last SHA-256", status.last_upload_sum.clone()),
        row("Uploads ok", counters.num_uploads_ok.to_string()),
        row("Uploads failed", counters.num_uploads_fail.to_string()),
        row("Uploads skipped", counters.num_uploads_skipped.to_string()),
        row("Total uploaded", format_size(counters.total_upload_bytes)),
        row("Last uploaded", format_size(counters.last_upload_bytes)),
    ]
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
