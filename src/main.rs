//! CLI entry point for the TfL extraction pipeline.
//!
//! Provides subcommands for loading stop arrivals and line routes into the
//! warehouse, creating the warehouse tables, and snapshotting the raw route
//! catalogue to S3.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tfl_etl::{
    config::Settings,
    extract::{Extractor, LineRouteQuery},
    fetch::{ApiClient, BasicClient, HttpClient, auth::app_credentials},
    load::Loader,
    normalize::resolve::ExactNameResolver,
    output::{append_record, append_records, print_json, print_pretty},
    pipeline::Pipeline,
    snapshot::{DirSink, S3Sink, upload_line_routes},
};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "tfl_etl")]
#[command(about = "Extract TfL arrivals and line routes into a warehouse", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct RouteFilters {
    /// Line ids to keep, filtered client-side (e.g. "central,northern")
    #[arg(long, value_delimiter = ',')]
    line_ids: Option<Vec<String>>,

    /// Transport modes to request (e.g. "tube,dlr")
    #[arg(long, value_delimiter = ',')]
    modes: Option<Vec<String>>,

    /// Service types to request (e.g. "Regular,Night")
    #[arg(long, value_delimiter = ',')]
    service_types: Option<Vec<String>>,
}

impl From<RouteFilters> for LineRouteQuery {
    fn from(f: RouteFilters) -> Self {
        LineRouteQuery {
            line_ids: f.line_ids,
            modes: f.modes,
            service_types: f.service_types,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the warehouse tables if they do not exist
    InitSchema,
    /// Load arrival predictions for one stop point
    Arrivals {
        /// Stop point id (e.g. "2420900042")
        #[arg(long, value_name = "ID")]
        stop_point: String,

        /// CSV file to append the run report to
        #[arg(long)]
        report: Option<String>,

        /// CSV file to append the accepted rows to
        #[arg(long)]
        export: Option<String>,
    },
    /// Load line routes, optionally narrowed to some lines
    Routes {
        #[command(flatten)]
        filters: RouteFilters,

        /// CSV file to append the run report to
        #[arg(long)]
        report: Option<String>,

        /// CSV file to append the accepted rows to
        #[arg(long)]
        export: Option<String>,
    },
    /// Fetch the line route catalogue and upload the raw payload to S3
    SnapshotRoutes {
        #[command(flatten)]
        filters: RouteFilters,

        /// S3 bucket (defaults to TFL_S3_BUCKET)
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Key prefix (defaults to TFL_S3_PREFIX)
        #[arg(long)]
        prefix: Option<String>,

        /// Upload plain JSON instead of gzip
        #[arg(long, default_value_t = false)]
        no_gzip: bool,
    },
}

// Single logical task per run: requests and batches are strictly sequential.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/tfl_etl.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("tfl_etl.log"));

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
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::InitSchema => {
            let loader = Loader::connect(&settings.warehouse_url).await?;
            loader.ensure_schema().await?;
            info!("Warehouse schema ready");
        }
        Commands::Arrivals {
            stop_point,
            report,
            export,
        } => {
            let pipeline = build_pipeline(&settings).await?;
            let out = pipeline.run_arrivals(&stop_point).await?;

            print_pretty(&out.report);
            print_json(&out.report)?;
            if let Some(path) = report {
                append_record(&path, &out.report)?;
            }
            if let Some(path) = export {
                append_records(&path, &out.rows)?;
            }
        }
        Commands::Routes {
            filters,
            report,
            export,
        } => {
            let pipeline = build_pipeline(&settings).await?;
            let out = pipeline.run_routes(&filters.into()).await?;

            print_pretty(&out.report);
            print_json(&out.report)?;
            if let Some(path) = report {
                append_record(&path, &out.report)?;
            }
            if let Some(path) = export {
                append_records(&path, &out.rows)?;
            }
        }
        Commands::SnapshotRoutes {
            filters,
            s3_bucket,
            prefix,
            no_gzip,
        } => {
            let bucket = s3_bucket
                .or_else(|| settings.s3_bucket.clone())
                .context("S3 bucket must be provided via --s3-bucket or TFL_S3_BUCKET")?;
            let prefix = prefix.unwrap_or_else(|| settings.s3_prefix.clone());

            let extractor = Extractor::new(api_client(&settings)?);
            let query: LineRouteQuery = filters.into();
            let names = settings.line_names()?;
            let resolver = ExactNameResolver::with_entries(names.iter());
            let routes = extractor.get_line_routes(&query, &resolver).await?;

            let sink = S3Sink::from_env(&bucket).await;
            let key = upload_line_routes(&sink, &prefix, &routes, !no_gzip).await?;
            info!(
                bucket = %bucket,
                key = %key,
                selected = routes.selected.len(),
                "Uploaded line route payload"
            );
        }
    }

    Ok(())
}

fn api_client(settings: &Settings) -> Result<ApiClient<impl HttpClient>> {
    let credentials = settings.require_credentials()?;
    let session = BasicClient::with_timeout(settings.timeout)?;
    let client = app_credentials(session, &credentials.app_id, &credentials.app_key);
    Ok(ApiClient::new(
        client,
        settings.base_url.clone(),
        settings.retry.clone(),
    ))
}

async fn build_pipeline(settings: &Settings) -> Result<Pipeline<impl HttpClient>> {
    let api = api_client(settings)?;
    let loader = Loader::connect(&settings.warehouse_url).await?;
    loader.ensure_schema().await?;

    let names = settings.line_names()?;
    info!(names = names.len(), "Line name map loaded");

    let mut pipeline = Pipeline::new(Extractor::new(api), loader, names);
    if let Some(dir) = &settings.archive_dir {
        info!(dir = %dir.display(), "Raw payload archive enabled");
        pipeline = pipeline.with_archive(Box::new(DirSink::new(dir)));
    }
    Ok(pipeline)
}
