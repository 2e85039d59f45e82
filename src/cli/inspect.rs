//! CLI handler for reading a recording's WAV header.

use anyhow::{Context, Result};
use serde_json::json;

use super::args::InspectCliArgs;

pub fn handle_inspect_command(args: InspectCliArgs) -> Result<()> {
    let reader = hound::WavReader::open(&args.file)
        .with_context(|| format!("Failed to open {:?} as WAV", args.file))?;
    let spec = reader.spec();
    let frames = reader.duration();
    let duration_secs = frames as f64 / spec.sample_rate as f64;
    let file_size = std::fs::metadata(&args.file)?.len();

    if args.json {
        let info = json!({
            "path": args.file,
            "sample_rate": spec.sample_rate,
            "channels": spec.channels,
            "bits_per_sample": spec.bits_per_sample,
            "frames": frames,
            "duration_secs": duration_secs,
            "file_size": file_size,
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File:        {}", args.file.display());
    println!("Format:      {} Hz, {} ch, {}-bit", spec.sample_rate, spec.channels, spec.bits_per_sample);
    println!("Duration:    {:.2}s ({} frames)", duration_secs, frames);
    println!("Size:        {:.2} MB", file_size as f64 / (1024.0 * 1024.0));
    Ok(())
}
