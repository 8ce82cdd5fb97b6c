//! Scene records and the export manifest that orders them.
//!
//! Scenes arrive from the authoring side as JSON with camelCase fields.
//! Playback order is the array order; `number` must agree with it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::format::ExportFormat;

/// One timed unit of narrated visual content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// 1-based position in the project.
    pub number: u32,

    /// Narration text. Informational only; never rendered.
    #[serde(default)]
    pub voiceover: String,

    /// Single still image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Several stills shown in sequence, splitting the scene evenly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,

    /// Motion clip. Takes priority over images when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    /// Narration audio. Its duration is authoritative for the scene length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    /// Nominal length in seconds, used when no audio is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Scene {
    /// A scene with nothing but a number, useful as a builder start.
    pub fn new(number: u32) -> Self {
        Self {
            number,
            voiceover: String::new(),
            image_url: None,
            image_urls: Vec::new(),
            video_url: None,
            audio_url: None,
            duration: None,
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_video(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Some(secs);
        self
    }

    /// Still images to display, in order. The plural list wins when non-empty.
    pub fn image_sources(&self) -> Vec<&str> {
        let plural: Vec<&str> = self
            .image_urls
            .iter()
            .map(String::as_str)
            .filter(|url| !url.trim().is_empty())
            .collect();
        if !plural.is_empty() {
            return plural;
        }
        self.image_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .into_iter()
            .collect()
    }

    pub fn video_source(&self) -> Option<&str> {
        self.video_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn audio_source(&self) -> Option<&str> {
        self.audio_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Whether the scene references any image or video.
    pub fn has_visual_media(&self) -> bool {
        self.video_source().is_some() || !self.image_sources().is_empty()
    }

    /// Whether the scene references any media at all.
    pub fn has_any_media(&self) -> bool {
        self.has_visual_media() || self.audio_source().is_some()
    }

    /// Declared duration when it is usable as a playback length.
    pub fn declared_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Everything needed to start one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    /// Human-readable project title.
    #[serde(default)]
    pub title: String,

    /// Output aspect preset.
    pub format: ExportFormat,

    /// Frame rate override; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,

    /// Durable storage key under which the result should be persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,

    /// Scenes in playback order.
    pub scenes: Vec<Scene>,
}

impl ExportManifest {
    pub fn new(format: ExportFormat, scenes: Vec<Scene>) -> Self {
        Self {
            title: String::new(),
            format,
            fps: None,
            storage_key: None,
            scenes,
        }
    }

    /// Load and validate a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|e| ManifestError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let manifest: Self =
            serde_json::from_str(&content).map_err(|e| ManifestError::ParseError {
                path: path.clone(),
                source: e,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Write the manifest as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let path = path.as_ref().to_path_buf();
        let json = serde_json::to_string_pretty(self).map_err(|e| ManifestError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| ManifestError::IoError { path, source: e })
    }

    /// Check the manifest before any media is touched.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_scenes(&self.scenes)?;
        if let Some(fps) = self.fps {
            if fps == 0 || fps > 120 {
                return Err(ManifestError::invalid(format!(
                    "fps must be in 1..=120, got {fps}"
                )));
            }
        }
        Ok(())
    }
}

/// Validate a scene list: non-empty, ascending unique numbers, sane durations,
/// and at least one scene with media to render.
pub fn validate_scenes(scenes: &[Scene]) -> Result<(), ManifestError> {
    if scenes.is_empty() {
        return Err(ManifestError::invalid("scene list is empty"));
    }

    let mut previous: Option<u32> = None;
    for scene in scenes {
        if scene.number == 0 {
            return Err(ManifestError::invalid("scene numbers are 1-based"));
        }
        if let Some(prev) = previous {
            if scene.number <= prev {
                return Err(ManifestError::invalid(format!(
                    "scene {} follows scene {prev}; scenes must be in ascending order",
                    scene.number
                )));
            }
        }
        previous = Some(scene.number);

        if let Some(duration) = scene.duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err(ManifestError::invalid(format!(
                    "scene {} has invalid duration {duration}",
                    scene.number
                )));
            }
        }
    }

    if !scenes.iter().any(Scene::has_any_media) {
        return Err(ManifestError::invalid(
            "no scene references any image, video or audio",
        ));
    }

    Ok(())
}

/// Errors that can occur when loading or validating a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid manifest: {message}")]
    ValidationError { message: String },
}

impl ManifestError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ValidationError {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_deserializes_camel_case() {
        let json = r#"{
            "number": 1,
            "voiceover": "Hello",
            "imageUrl": "https://cdn/a.png",
            "audioUrl": "https://cdn/a.mp3",
            "duration": 4.5
        }"#;
        let scene: Scene = serde_json::from_str(json).unwrap();
        assert_eq!(scene.number, 1);
        assert_eq!(scene.image_sources(), vec!["https://cdn/a.png"]);
        assert_eq!(scene.audio_source(), Some("https://cdn/a.mp3"));
        assert_eq!(scene.declared_duration(), Some(4.5));
        assert!(scene.video_source().is_none());
    }

    #[test]
    fn test_plural_images_win() {
        let scene = Scene::new(1)
            .with_image("single.png")
            .with_images(["a.png", "", "b.png"]);
        assert_eq!(scene.image_sources(), vec!["a.png", "b.png"]);
    }

    #[test]
    fn test_blank_urls_are_not_media() {
        let mut scene = Scene::new(1).with_duration(3.0);
        scene.image_url = Some("  ".to_string());
        scene.video_url = Some(String::new());
        assert!(!scene.has_visual_media());
        assert!(!scene.has_any_media());
    }

    #[test]
    fn test_zero_duration_is_not_declared() {
        assert_eq!(Scene::new(1).with_duration(0.0).declared_duration(), None);
    }

    #[test]
    fn test_empty_scene_list_rejected() {
        let err = validate_scenes(&[]).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_out_of_order_scenes_rejected() {
        let scenes = vec![
            Scene::new(2).with_image("a.png"),
            Scene::new(1).with_image("b.png"),
        ];
        assert!(validate_scenes(&scenes).is_err());
    }

    #[test]
    fn test_mediafree_scene_list_rejected() {
        let scenes = vec![Scene::new(1).with_duration(5.0), Scene::new(2)];
        let err = validate_scenes(&scenes).unwrap_err();
        assert!(err.to_string().contains("no scene references"));
    }

    #[test]
    fn test_gap_scene_allowed_next_to_media() {
        let scenes = vec![
            Scene::new(1).with_image("a.png").with_duration(2.0),
            Scene::new(2).with_duration(1.0),
        ];
        assert!(validate_scenes(&scenes).is_ok());
    }

    #[test]
    fn test_manifest_load_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = ExportManifest::new(
            ExportFormat::Portrait,
            vec![Scene::new(1).with_image("a.png").with_duration(2.0)],
        );
        manifest.storage_key = Some("exports/demo.mp4".to_string());
        manifest.save(&path).unwrap();

        let loaded = ExportManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"storageKey\""));
        assert!(raw.contains("\"imageUrl\""));
    }

    #[test]
    fn test_manifest_rejects_bad_fps() {
        let mut manifest =
            ExportManifest::new(ExportFormat::Square, vec![Scene::new(1).with_image("a.png")]);
        manifest.fps = Some(0);
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::ValidationError { .. })
        ));
    }
}
