//! Write a sample manifest.

use std::path::PathBuf;

use storyreel_project_model::{ExportFormat, ExportManifest, Scene};

pub fn run(name: String, output: PathBuf, format: String) -> anyhow::Result<()> {
    let format: ExportFormat = format.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let path = output.join(format!("{}.json", slug.trim_matches('-')));
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let mut manifest = ExportManifest::new(
        format,
        vec![
            Scene::new(1)
                .with_image("https://example.com/scene-1.png")
                .with_audio("https://example.com/scene-1.wav"),
            Scene::new(2)
                .with_images(["https://example.com/scene-2a.png", "https://example.com/scene-2b.png"])
                .with_duration(4.0),
            Scene::new(3).with_video("https://example.com/scene-3.mp4").with_duration(6.0),
        ],
    );
    manifest.title = name.clone();

    std::fs::create_dir_all(&output)?;
    manifest
        .save(&path)
        .map_err(|e| anyhow::anyhow!("Failed to write manifest: {e}"))?;

    println!("Created manifest '{}' at {}", name, path.display());
    println!("  Format: {format}");
    println!("  Scenes: {}", manifest.scenes.len());
    println!();
    println!("Replace the example URLs, then run:");
    println!("  storyreel validate {}", path.display());
    println!("  storyreel export {}", path.display());

    Ok(())
}
