//! CLI handler for converting existing recordings.
//!
//! Runs the same conversion queue the live pipeline uses, over files given
//! on the command line.

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::args::ConvertCliArgs;
use crate::config::Config;
use crate::conversion::{ConversionQueue, FfmpegEncoder};

const PROGRESS_INTERVAL_MS: u64 = 200;

pub async fn handle_convert_command(args: ConvertCliArgs, config: &Config) -> Result<()> {
    let mut settings = config.converter.conversion_settings();
    if let Some(format) = args.format {
        settings.container = format;
    }
    if args.keep_source {
        settings.delete_source_on_success = false;
    }
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        settings.concurrent_limit = jobs;
    }

    let encoder = FfmpegEncoder::locate(config.converter.ffmpeg_directory_path.as_deref())?;
    let queue = ConversionQueue::new(settings, Arc::new(encoder));

    let mut queued = 0;
    for file in &args.files {
        if let Err(reason) = check_input(file) {
            warn!("Skipping {:?}: {}", file, reason);
            continue;
        }
        queue.enqueue_file(file);
        queued += 1;
    }
    if queued == 0 {
        bail!("No convertible files given");
    }

    let pb = (!args.no_progress).then(create_spinner);
    let cancel = CancellationToken::new();
    let poller = queue.start(cancel.clone());

    loop {
        if let Some(pb) = &pb {
            let stats = queue.stats();
            pb.set_message(format!(
                "{}/{} done, {} running, {} waiting",
                stats.completed + stats.failed,
                queued,
                stats.in_flight,
                stats.pending
            ));
        }
        if queue.is_idle() {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let dropped = queue.clear();
                warn!("Interrupted, waiting for running conversions ({} not started)", dropped);
                break;
            }
            _ = sleep(Duration::from_millis(PROGRESS_INTERVAL_MS)) => {}
        }
    }

    cancel.cancel();
    poller.await?;
    queue.wait_for_in_flight().await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let stats = queue.stats();
    println!("Converted {} of {} files.", stats.completed, queued);

    let failures = queue.failures();
    for failure in &failures {
        println!("  failed: {} ({})", failure.task.source_path.display(), failure.reason);
    }
    if !failures.is_empty() {
        bail!("{} conversions failed", failures.len());
    }
    Ok(())
}

fn check_input(path: &Path) -> std::result::Result<(), &'static str> {
    if !path.is_file() {
        return Err("not a file");
    }
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if !is_wav {
        return Err("not a .wav file");
    }
    Ok(())
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_input() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("alice.WAV");
        let txt = dir.path().join("notes.txt");
        std::fs::write(&wav, b"RIFF").unwrap();
        std::fs::write(&txt, b"hi").unwrap();

        assert!(check_input(&wav).is_ok());
        assert_eq!(check_input(&txt), Err("not a .wav file"));
        assert_eq!(check_input(&dir.path().join("missing.wav")), Err("not a file"));
    }
}
