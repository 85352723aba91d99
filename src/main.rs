//! CLI entry point for the air-quality exposure tool.
//!
//! Provides subcommands for fetching hourly observations from Open-Meteo,
//! analysing a saved response, and listing the supported variables with their
//! default averaging windows and guideline thresholds.

use air_quality::analyzers::{Pipeline, PipelineReport, analyze};
use air_quality::config::RawConfig;
use air_quality::error::PipelineError;
use air_quality::fetch::{
    BasicClient, CachedSource, DEFAULT_BASE_URL, DataSource, OpenMeteoSource, RetryingSource,
    auth::UrlParam, fetch_bytes,
};
use air_quality::observation::IngestOptions;
use air_quality::output::{print_json, print_pretty, write_report};
use air_quality::parser::parse_response;
use air_quality::variable::Variable;
use anyhow::Result;
use chrono::{NaiveDate, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "air_quality")]
#[command(about = "Rolling and daily air-quality exposure against guideline thresholds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand that runs the pipeline.
#[derive(Args)]
struct PipelineArgs {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IANA timezone used for daily buckets (e.g. "Africa/Nairobi")
    #[arg(long)]
    timezone: Option<String>,

    /// Comma-separated variables, e.g. "ozone,pm2_5"
    #[arg(long, value_delimiter = ',')]
    variables: Option<Vec<String>>,

    /// Latitude of the location
    #[arg(long, allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Longitude of the location
    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// Reject input whose timestamps are not already sorted
    #[arg(long, default_value_t = false)]
    require_sorted: bool,

    /// Directory to write rolling/daily/exceedance CSV tables to
    #[arg(short, long, default_value = "reports")]
    output_dir: PathBuf,

    /// Gzip compress the CSV tables
    #[arg(long, default_value_t = false)]
    gzip: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch hourly observations from Open-Meteo and analyse them
    Analyze {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// First day to fetch (YYYY-MM-DD), defaults to seven days before the end
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Last day to fetch, inclusive (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Seconds a fetched response stays cached
        #[arg(long, default_value_t = 3600)]
        cache_ttl: u64,

        /// Directory holding cached responses across runs
        #[arg(long, default_value = ".cache")]
        cache_dir: PathBuf,

        /// Retries on transient provider errors
        #[arg(long, default_value_t = 5)]
        retries: u32,

        /// Backoff factor in seconds, doubled after every failed attempt
        #[arg(long, default_value_t = 0.2)]
        backoff: f64,
    },
    /// Analyse a saved Open-Meteo JSON response from a file or URL
    AnalyzeFile {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// List supported variables with their default windows and guidelines
    ListVariables,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/air_quality.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("air_quality.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            pipeline: args,
            start_date,
            end_date,
            cache_ttl,
            cache_dir,
            retries,
            backoff,
        } => {
            let pipeline = build_pipeline(&args)?;

            let end_date = end_date.unwrap_or_else(|| Utc::now().date_naive());
            let start_date = start_date.unwrap_or(end_date - TimeDelta::days(7));

            let source = CachedSource::new(
                RetryingSource::new(open_meteo_source()?, retries, backoff),
                Duration::from_secs(cache_ttl),
            )
            .with_dir(&cache_dir);

            let result = analyze(&source, &pipeline, start_date, end_date).await;
            finish(result, &args)?;
        }
        Commands::AnalyzeFile {
            source,
            pipeline: args,
        } => {
            let pipeline = build_pipeline(&args)?;
            let bytes = fetcher(&source).await?;
            let segments = parse_response(&bytes)?;

            finish(pipeline.run(segments), &args)?;
        }
        Commands::ListVariables => {
            for variable in Variable::ALL {
                let window = variable.default_window();
                info!(
                    variable = %variable,
                    unit = variable.unit(),
                    window_hours = window.hours,
                    reducer = window.reducer.as_str(),
                    "Variable"
                );
                for guideline in variable.default_guidelines() {
                    info!(
                        variable = %variable,
                        statistic = %guideline.statistic,
                        comparator = %guideline.comparator,
                        value = guideline.value,
                        label = %guideline.label,
                        "Guideline"
                    );
                }
            }
        }
    }

    Ok(())
}

/// Layers CLI flags over the config file and validates the result.
fn build_pipeline(args: &PipelineArgs) -> Result<Pipeline> {
    let mut raw = match &args.config {
        Some(path) => RawConfig::load(path)?,
        None => RawConfig::default(),
    };

    if let Some(tz) = &args.timezone {
        raw.timezone = Some(tz.clone());
    }
    if let Some(variables) = &args.variables {
        raw.variables = Some(variables.clone());
    }
    if let Some(latitude) = args.latitude {
        raw.latitude = Some(latitude);
    }
    if let Some(longitude) = args.longitude {
        raw.longitude = Some(longitude);
    }

    let config = raw.validate()?;
    info!(
        timezone = config.timezone.name(),
        latitude = config.location.latitude,
        longitude = config.location.longitude,
        variables = config.variables.len(),
        "Configuration loaded"
    );

    Ok(Pipeline::new(config)?.with_options(IngestOptions {
        require_sorted: args.require_sorted,
    }))
}

/// Builds the Open-Meteo source, authenticated when `OPEN_METEO_API_KEY` is set.
fn open_meteo_source() -> Result<Box<dyn DataSource>> {
    let base_url = std::env::var("OPEN_METEO_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let client = BasicClient::with_timeouts(Duration::from_secs(30), Duration::from_secs(10))?;

    let source: Box<dyn DataSource> = match std::env::var("OPEN_METEO_API_KEY") {
        Ok(key) if !key.is_empty() => Box::new(OpenMeteoSource::with_base_url(
            UrlParam::open_meteo(client, key),
            &base_url,
        )),
        _ => Box::new(OpenMeteoSource::with_base_url(client, &base_url)),
    };
    Ok(source)
}

/// Writes the tables of a successful run; an empty batch is logged, not an error.
fn finish(result: Result<PipelineReport, PipelineError>, args: &PipelineArgs) -> Result<()> {
    let report = match result {
        Ok(report) => report,
        Err(PipelineError::EmptyBatch { dropped }) => {
            info!(dropped, "No observations available for the requested range");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if !report.dropped.is_empty() {
        warn!(dropped = report.dropped.len(), "Malformed records were dropped");
    }

    for flag in &report.exceedances {
        info!(
            variable = %flag.variable,
            statistic = %flag.statistic,
            observed = flag.observed,
            threshold = flag.threshold,
            label = %flag.label,
            period = ?flag.period,
            "Guideline exceeded"
        );
    }

    print_pretty(&report);
    print_json(&report)?;
    write_report(&args.output_dir, &report, args.gzip)?;
    Ok(())
}

/// Loads a saved response from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new();
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}
