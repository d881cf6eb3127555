mod cli;
mod error;
mod output;
mod utils;

use std::collections::HashMap;
use std::process;
use std::sync::Arc;

use clap::Parser;
use hlsdl_engine::{DownloadSession, ManifestResolver, ManifestResult, build_client};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::utils::parse_headers;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let headers = parse_headers(&args.headers)?;
    if args.list_variants {
        return list_variants(&args, &headers).await;
    }

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling download");
            ctrl_c_token.cancel();
        }
    });

    let bar = output::progress_bar(args.quiet);
    let mut session = DownloadSession::new(args.hls_config())
        .await?
        .with_cancellation(token)
        .on_event(output::progress_listener(bar.clone()));

    let policy = args.selection_policy();
    let result = session.run(&args.url, headers, &policy).await;
    match &result {
        Ok(_) => bar.finish_with_message("Done"),
        Err(_) => bar.abandon(),
    }
    let data = result?;

    let missing = session.failed_segments().len();
    if missing > 0 {
        warn!(missing, "Output is missing segments that could not be downloaded");
    }

    let path = args.output.clone().unwrap_or_else(output::default_output_path);
    output::save(&path, &data).await?;
    info!(path = %path.display(), size = data.len(), "Saved output");
    if !args.quiet {
        println!("Saved {} bytes to {}", data.len(), path.display());
    }
    Ok(())
}

/// Resolves the manifest without downloading anything and prints its variants.
async fn list_variants(args: &Args, headers: &HashMap<String, String>) -> Result<()> {
    let config = args.hls_config();
    let client = build_client(&config.base)?;
    let resolver = ManifestResolver::new(client, Arc::new(config));

    match resolver.resolve(&args.url, headers).await {
        ManifestResult::PlaylistList(variants) => output::print_variants(&variants, args.json),
        ManifestResult::SegmentList(segments) => Err(AppError::InvalidInput(format!(
            "{} is a media playlist with {} segments, it offers no variants",
            args.url,
            segments.len()
        ))),
        ManifestResult::Error(e) => Err(e.into()),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
