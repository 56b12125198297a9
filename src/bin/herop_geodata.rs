use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use herop_geodata::app::{App, RunOptions, StdoutReporter, select_jobs};
use herop_geodata::config::RuntimeConfig;
use herop_geodata::domain::OutputFormat;
use herop_geodata::error::GeodataError;
use herop_geodata::fetch::HttpSourceClient;
use herop_geodata::lookups::LookupRegistry;
use herop_geodata::publish::S3Client;
use herop_geodata::store::Store;
use herop_geodata::tiles::TippecanoeClient;

/// Retrieve geodata from the US Census Bureau's file server, merge the
/// per-state files into single nationwide coverages, and export the merged
/// datasets into various formats. Optionally upload the results to S3.
#[derive(Parser)]
#[command(name = "herop-geodata")]
#[command(version, author)]
struct Cli {
    /// Geography to prepare; repeatable. All known geographies when omitted.
    #[arg(short, long)]
    geography: Vec<String>,

    /// Year to process; repeatable. All known years when omitted.
    #[arg(short, long)]
    year: Vec<String>,

    /// Boundary file scale; repeatable. All known scales when omitted.
    #[arg(short, long)]
    scale: Vec<String>,

    /// Output format; repeatable. All formats are exported when omitted.
    #[arg(short, long, value_enum)]
    format: Vec<OutputFormat>,

    /// Upload the processed files to S3. Bucket, credentials, and prefix
    /// come from environment variables.
    #[arg(long)]
    upload: bool,

    /// Force re-retrieval of source files.
    #[arg(long)]
    no_cache: bool,

    /// Output directory for export. Defaults to .cache/{geography}/processed.
    #[arg(long)]
    destination: Option<PathBuf>,

    /// Enable verbose output during the run.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<GeodataError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &GeodataError) -> u8 {
    match error {
        GeodataError::ConfigurationMissing(_) | GeodataError::LookupParse { .. } => 2,
        GeodataError::TransferFailed { .. }
        | GeodataError::TransferStatus { .. }
        | GeodataError::UploadFailed { .. }
        | GeodataError::ExternalToolFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_env();
    let registry = LookupRegistry::from_dir(&config.lookups_dir).into_diagnostic()?;

    let formats = if cli.format.is_empty() {
        vec![
            OutputFormat::Shp,
            OutputFormat::Geojson,
            OutputFormat::Pmtiles,
        ]
    } else {
        cli.format.clone()
    };

    // Configuration failures are fatal before any job starts.
    if formats.contains(&OutputFormat::Pmtiles) {
        config.require_tippecanoe().into_diagnostic()?;
    }
    if cli.upload {
        config.require_s3().into_diagnostic()?;
    }

    println!("year(s): {:?}", cli.year);
    println!("geography(s): {:?}", cli.geography);
    println!("scale(s): {:?}", cli.scale);

    println!("checking input...");
    let selection = select_jobs(&registry, &cli.year, &cli.scale, &cli.geography);
    for combo in &selection.invalid {
        println!(
            "✘ {} -> {} -> {} (no matching source information)",
            combo.geography, combo.year, combo.scale
        );
    }
    for job in &selection.jobs {
        println!("✔ {} -> {} -> {}", job.geography(), job.year(), job.scale());
    }
    println!(
        "{} year/geography/scale combinations will be processed",
        selection.jobs.len()
    );
    println!("output format(s): {formats:?}");

    let store = Store::new(&config.cache_dir, cli.destination.as_deref()).into_diagnostic()?;
    let source = HttpSourceClient::new().into_diagnostic()?;
    let tiler = config.tippecanoe_path.clone().map(TippecanoeClient::new);
    let storage = if cli.upload {
        let s3_config = config.require_s3().into_diagnostic()?.clone();
        Some(S3Client::new(s3_config).into_diagnostic()?)
    } else {
        None
    };

    let options = RunOptions {
        formats,
        no_cache: cli.no_cache,
        upload: cli.upload,
        verbose: cli.verbose,
    };
    let sink = StdoutReporter::new(cli.verbose);
    let app = App::new(config, registry, store, source, tiler, storage);
    let summary = app.run_batch(&selection.jobs, &options, &sink).into_diagnostic()?;

    if !summary.failed.is_empty() {
        println!("\n{} job(s) failed:", summary.failed.len());
        for (job, err) in &summary.failed {
            println!(" - {job}: {err}");
        }
    }
    println!("\ndone.");
    Ok(())
}
