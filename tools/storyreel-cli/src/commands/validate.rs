//! Validate a scene manifest.

use std::path::PathBuf;

use storyreel_project_model::{DeviceClass, ExportManifest};

pub fn run(manifest: PathBuf) -> anyhow::Result<()> {
    println!("Validating manifest at: {}", manifest.display());

    let loaded = ExportManifest::load(&manifest)
        .map_err(|e| anyhow::anyhow!("Invalid manifest: {e}"))?;

    let title = if loaded.title.is_empty() {
        "(untitled)"
    } else {
        loaded.title.as_str()
    };
    println!("  Title: {title}");
    println!(
        "  Format: {} ({} desktop, {} constrained)",
        loaded.format,
        loaded.format.resolution(DeviceClass::Desktop),
        loaded.format.resolution(DeviceClass::Constrained)
    );
    if let Some(fps) = loaded.fps {
        println!("  FPS: {fps}");
    }
    if let Some(key) = &loaded.storage_key {
        println!("  Storage key: {key}");
    }
    println!("  Scenes: {}", loaded.scenes.len());

    let mut notes = Vec::new();
    for scene in &loaded.scenes {
        let visual = match (scene.video_source(), scene.image_sources().len()) {
            (Some(_), _) => "video".to_string(),
            (None, 0) => "none".to_string(),
            (None, n) => format!("{n} image(s)"),
        };
        let timing = match (scene.audio_source(), scene.declared_duration()) {
            (Some(_), _) => "narration".to_string(),
            (None, Some(secs)) => format!("{secs:.2}s"),
            (None, None) => "default".to_string(),
        };
        println!("    #{:<3} visual: {visual:<12} timing: {timing}", scene.number);

        if !scene.has_any_media() {
            notes.push(format!("scene {} has no media and renders as fill", scene.number));
        } else if scene.video_source().is_some() && !scene.image_sources().is_empty() {
            notes.push(format!("scene {} has a video; its images are ignored", scene.number));
        }
    }

    if notes.is_empty() {
        println!("\nManifest is valid.");
    } else {
        println!("\nNotes:");
        for note in &notes {
            println!("  - {note}");
        }
        println!("\nManifest is valid with {} note(s).", notes.len());
    }

    Ok(())
}
