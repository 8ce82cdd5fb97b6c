//! Summarize an MP4 file.

use std::path::PathBuf;

use storyreel_render_engine::mux::inspect_mp4;

pub fn run(file: PathBuf, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(&file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", file.display()))?;
    let summary = inspect_mp4(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File: {} ({} bytes)", file.display(), bytes.len());
    println!("  Brand: {} ({})", summary.major_brand, summary.compatible_brands.join(", "));
    println!("  Duration: {:.3}s", summary.duration_secs());
    println!(
        "  Layout: moov {} mdat",
        if summary.moov_before_mdat { "before" } else { "after" }
    );

    for track in &summary.tracks {
        println!();
        println!("  Track {} ({}, {})", track.track_id, track.handler, track.sample_entry);
        println!("    Duration: {:.3}s", track.duration_secs());
        println!("    Samples: {}", track.sample_count);
        match track.handler.as_str() {
            "vide" => {
                println!("    Size: {}x{}", track.width, track.height);
                if let Some(profile) = track.avc_profile {
                    println!("    AVC profile: {profile}");
                }
                if let Some(sync) = track.sync_samples {
                    println!("    Keyframes: {sync}");
                }
            }
            "soun" => {
                if let (Some(rate), Some(channels)) = (track.sample_rate, track.channels) {
                    println!("    Audio: {rate} Hz x{channels}");
                }
            }
            _ => {}
        }
    }

    if !summary.samples_within_mdat() {
        println!("\nWarning: some sample offsets point outside the mdat box");
    }

    Ok(())
}
