//! CLI handlers for listing and pruning session directories.
//!
//! Terminal presentation only; rotation itself lives in `retention`.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use super::args::{PruneCliArgs, SessionsCliArgs};
use crate::config::Config;
use crate::retention::RetentionManager;

#[derive(Debug, Serialize)]
struct SessionSummary {
    name: String,
    path: PathBuf,
    files: usize,
    size_bytes: u64,
}

pub fn handle_sessions_command(args: SessionsCliArgs, config: &Config) -> Result<()> {
    let root = config.recorder.root_directory()?;
    let retention = RetentionManager::scan(&root)?;

    let sessions: Vec<SessionSummary> = retention
        .directories()
        .map(|dir| SessionSummary {
            name: dir.name(),
            path: dir.path.clone(),
            files: count_recordings(&dir.path),
            size_bytes: dir.size_bytes(),
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    println!("=== Sessions in {} ===\n", root.display());
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    for (i, session) in sessions.iter().enumerate() {
        println!(
            "[{}] {} | {} files | {:.2} MB",
            i,
            session.name,
            session.files,
            session.size_bytes as f64 / (1024.0 * 1024.0)
        );
    }

    let keep = config.recorder.keep_last_sessions;
    if keep > 0 {
        println!("\nKeeping the last {} sessions.", keep);
    }
    Ok(())
}

pub fn handle_prune_command(args: PruneCliArgs, config: &Config) -> Result<()> {
    let root = config.recorder.root_directory()?;
    let keep = args.keep.unwrap_or(config.recorder.keep_last_sessions);
    if keep == 0 {
        println!("Retention is unlimited, nothing to prune.");
        return Ok(());
    }

    let mut retention = RetentionManager::scan(&root)?;

    if args.dry_run {
        let excess = retention.len().saturating_sub(keep);
        for dir in retention.directories().take(excess) {
            println!("Would delete {}", dir.path.display());
        }
        if excess == 0 {
            println!("Nothing to prune ({} sessions).", retention.len());
        }
        return Ok(());
    }

    // One past the limit: nothing new is being added after this prune.
    let removed = retention.prune_to_limit(keep + 1);
    for path in &removed {
        println!("Deleted {}", path.display());
    }
    println!(
        "Pruned {} sessions, {} remaining.",
        removed.len(),
        retention.len()
    );
    Ok(())
}

fn count_recordings(path: &std::path::Path) -> usize {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}
