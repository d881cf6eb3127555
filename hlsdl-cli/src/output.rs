use std::path::{Path, PathBuf};
use std::sync::Arc;

use hlsdl_engine::{EventListener, SessionEvent, Variant};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

use crate::error::Result;

/// Resolution of the progress bar; session progress is a fraction.
const PROGRESS_STEPS: u64 = 1000;

/// `hls-downloader-YYYY-MM-DD.ts` in the current directory.
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "hls-downloader-{}.ts",
        chrono::Local::now().format("%Y-%m-%d")
    ))
}

pub fn progress_bar(quiet: bool) -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_STEPS);
    if quiet {
        bar.set_draw_target(ProgressDrawTarget::hidden());
        return bar;
    }

    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{bar:40.cyan/blue}] {percent:>3}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━╌");
    bar.set_style(style);
    bar
}

/// Forwards session events to `bar`.
pub fn progress_listener(bar: ProgressBar) -> EventListener {
    Arc::new(move |event: SessionEvent| match event {
        SessionEvent::StateChanged { message, .. } => bar.set_message(message),
        SessionEvent::Progress(fraction) => {
            let position = (fraction.clamp(0.0, 1.0) * PROGRESS_STEPS as f64).round() as u64;
            bar.set_position(position);
        }
    })
}

#[derive(Serialize)]
struct VariantRow<'a> {
    index: usize,
    #[serde(flatten)]
    variant: &'a Variant,
}

pub fn print_variants(variants: &[Variant], json: bool) -> Result<()> {
    if json {
        let rows: Vec<VariantRow<'_>> = variants
            .iter()
            .enumerate()
            .map(|(index, variant)| VariantRow { index, variant })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:>5}  {:<20} {:>12}  {:<11} URI", "INDEX", "NAME", "BANDWIDTH", "RESOLUTION");
    for (index, variant) in variants.iter().enumerate() {
        let resolution = variant
            .resolution
            .map(|r| format!("{}x{}", r.width, r.height))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{index:>5}  {:<20} {:>12}  {resolution:<11} {}",
            variant.name, variant.bandwidth, variant.uri
        );
    }
    Ok(())
}

pub async fn save(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}
