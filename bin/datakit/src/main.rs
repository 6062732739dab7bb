//! Datakit command-line tool.
//!
//! Uploads line protocol to a dataway, replays the fail cache, and checks workspace tokens.

#![deny(warnings)]
#![deny(missing_docs)]

use std::{path::Path, sync::Arc};

use clap::Parser as _;
use datakit_app::logging::{fatal_and_exit, initialize_logging};
use datakit_config::ConfigurationLoader;
use datakit_dataway::{check_token, Dataway, DatawayConfiguration, Writer};
use datakit_error::{generic_error, ErrorContext as _, GenericError};
use datakit_io::{diskcache::DiskCache, net::dns::DnsWatchRegistry};
use datakit_point::{lineproto, Category};
use tokio::io::AsyncReadExt as _;
use tracing::{error, info};

mod config;
use self::config::{Action, CheckTokenConfig, Cli, DatawayArgs, FlushConfig, UploadConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(Some(cli.log_level())) {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
    }

    let result = match cli.action {
        Action::Upload(config) => upload(config).await,
        Action::Flush(config) => flush(config).await,
        Action::CheckToken(config) => check(config),
    };

    if let Err(e) = result {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn load_configuration(path: &Path) -> Result<DatawayConfiguration, GenericError> {
    let config = ConfigurationLoader::default()
        .try_from_yaml(path)
        .from_environment("DK")?
        .into_typed()?;
    Ok(config)
}

async fn open_dataway(
    args: &DatawayArgs,
) -> Result<(Dataway, Arc<DiskCache>, Option<DnsWatchRegistry>), GenericError> {
    let config = load_configuration(&args.config_path)?;

    let dns_registry = config.dns_watch_interval().map(DnsWatchRegistry::new);
    let dataway = Dataway::new(&config, dns_registry.as_ref()).error_context("Failed to set up dataway.")?;

    let fail_cache = DiskCache::builder(&args.cache_dir)
        .with_capacity(args.cache_capacity.as_u64())
        .open()
        .await
        .with_error_context(|| format!("Failed to open fail cache at '{}'.", args.cache_dir.display()))?;

    Ok((dataway, Arc::new(fail_cache), dns_registry))
}

async fn read_input(config: &UploadConfig) -> Result<String, GenericError> {
    let mut input = String::new();
    match config.file.as_deref().filter(|f| *f != Path::new("-")) {
        Some(path) => {
            input = tokio::fs::read_to_string(path)
                .await
                .with_error_context(|| format!("Failed to read '{}'.", path.display()))?;
        }
        None => {
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .error_context("Failed to read standard input.")?;
        }
    }
    Ok(input)
}

async fn upload(config: UploadConfig) -> Result<(), GenericError> {
    let category = config.category.parse::<Category>()?;
    let points = lineproto::parse(&read_input(&config).await?)?;
    if points.is_empty() {
        info!("No points to upload.");
        return Ok(());
    }

    let (dataway, fail_cache, dns_registry) = open_dataway(&config.dataway).await?;

    let npts = points.len();
    let writer = Writer::new(category)
        .with_points(points)
        .with_gzip(!config.no_gzip)
        .with_fail_cache(fail_cache)
        .with_cache_all(config.cache_all);
    let result = dataway.write(writer).await;
    shutdown_dns(dns_registry);
    result?;

    info!(%category, points = npts, "Upload complete.");
    Ok(())
}

async fn flush(config: FlushConfig) -> Result<(), GenericError> {
    let (dataway, fail_cache, dns_registry) = open_dataway(&config.dataway).await?;

    let result = dataway.flush(fail_cache).await;
    shutdown_dns(dns_registry);

    let handled = result.error_context("Fail cache not fully flushed.")?;
    info!(entries = handled, "Fail cache flushed.");
    Ok(())
}

fn shutdown_dns(dns_registry: Option<DnsWatchRegistry>) {
    if let Some(registry) = dns_registry {
        registry.shutdown();
    }
}

fn check(config: CheckTokenConfig) -> Result<(), GenericError> {
    match check_token(&config.token) {
        Ok(()) => {
            info!(token = %config.token, "Token is valid.");
            Ok(())
        }
        Err(e) => Err(generic_error!("invalid token: {}", e)),
    }
}
