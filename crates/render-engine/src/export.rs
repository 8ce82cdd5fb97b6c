//! Export controller and job management.
//!
//! ```text
//! probe ─► load assets ─► plan timeline ─► negotiate codecs
//!                                              │
//!            ┌─────────── per scene ───────────┤
//!            ▼                                 ▼
//!      frame renderer                    audio renderer
//!            └──────────► encode/mux ◄─────────┘
//!                             │
//!                        finalize ─► (upload) ─► complete
//! ```
//!
//! Progress bands: loading 0-15, rendering 15-90, encoding 90-95,
//! uploading 95-99, complete 100. Retryable failures restart the whole run
//! from loading without lowering progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use storyreel_common::clock::{
    micros_to_secs, samples_to_micros, DriftMeasurement, ExportTimer, YieldPacer,
};
use storyreel_common::config::{AppConfig, TimeoutConfig};
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_platform_core::RuntimeCapabilities;
use storyreel_project_model::{
    validate_scenes, Artifact, DeviceClass, ExportFormat, ExportManifest, ExportOutput,
    ExportState, ExportStatus, FillColor, Resolution, Scene, StateError,
};
use tokio::sync::watch;

use crate::assets::{AssetLoader, SceneAssets};
use crate::audio::AudioRenderer;
use crate::backend::MediaBackend;
use crate::codec::{CodecNegotiator, NegotiatedCodecs};
use crate::encode::{EncodePipeline, EncodeStats, PipelineSettings};
use crate::fetch::AssetFetcher;
use crate::frames::FrameRenderer;
use crate::mux::MuxedOutput;
use crate::store::ArtifactStore;
use crate::timeline::{MediaDurations, Timeline, TimelinePlanner};

const LOADING_END: u8 = 15;
const RENDERING_END: u8 = 90;
const ENCODING_END: u8 = 95;
const UPLOADING_END: u8 = 99;

const MAX_FPS: u32 = 120;

/// Largest tolerated gap between audio and video track lengths.
const MAX_AUDIO_DRIFT_MS: f64 = 20.0;

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the next run can start.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> StoryreelResult<()> {
        if self.is_cancelled() {
            Err(StoryreelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub title: Option<String>,
    pub format: ExportFormat,
    /// Overrides the configured frame rate.
    pub fps: Option<u32>,
    /// Durable key for the artifact store.
    pub storage_key: Option<String>,
    pub scenes: Vec<Scene>,
}

impl ExportRequest {
    pub fn new(format: ExportFormat, scenes: Vec<Scene>) -> Self {
        Self {
            title: None,
            format,
            fps: None,
            storage_key: None,
            scenes,
        }
    }

    pub fn from_manifest(manifest: ExportManifest) -> Self {
        Self {
            title: Some(manifest.title).filter(|t| !t.trim().is_empty()),
            format: manifest.format,
            fps: manifest.fps,
            storage_key: manifest.storage_key,
            scenes: manifest.scenes,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Download name derived from the title.
    pub fn file_name(&self) -> String {
        let slug: String = self
            .title
            .as_deref()
            .unwrap_or_default()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let slug = slug
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            "storyreel-export.mp4".to_string()
        } else {
            format!("{slug}.mp4")
        }
    }
}

/// Controller settings, resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub fps: u32,
    pub audio_chunk_frames: usize,
    pub max_pending_frames: usize,
    pub yield_interval_frames: u32,
    pub yield_interval: Duration,
    pub max_retries: u32,
    pub fallback_scene_secs: f64,
    pub fill: FillColor,
    pub device_class: Option<DeviceClass>,
    pub lookahead_scenes: usize,
    pub timeouts: TimeoutConfig,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            audio_chunk_frames: 1024,
            max_pending_frames: 10,
            yield_interval_frames: 15,
            yield_interval: Duration::from_millis(50),
            max_retries: 2,
            fallback_scene_secs: 5.0,
            fill: FillColor::BLACK,
            device_class: None,
            lookahead_scenes: 2,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ExportSettings {
    pub fn from_config(config: &AppConfig) -> StoryreelResult<Self> {
        let export = &config.export;
        let fill = FillColor::from_hex(&export.fill_color).map_err(StoryreelError::config)?;
        let device_class = export
            .device_class
            .as_deref()
            .map(str::parse::<DeviceClass>)
            .transpose()
            .map_err(StoryreelError::config)?;
        Ok(Self {
            fps: export.fps,
            audio_chunk_frames: export.audio_chunk_frames,
            max_pending_frames: export.max_pending_frames,
            yield_interval_frames: export.yield_interval_frames,
            yield_interval: Duration::from_millis(export.yield_interval_ms),
            max_retries: export.max_retries,
            fallback_scene_secs: export.fallback_scene_secs,
            fill,
            device_class,
            lookahead_scenes: config.fetch.lookahead_scenes,
            timeouts: config.timeouts.clone(),
        })
    }
}

/// Summary of a finished export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub output: ExportOutput,
    pub warning: Option<String>,
    pub attempts: u32,
    pub resolution: Resolution,
    pub fps: u32,
    pub codecs: NegotiatedCodecs,
    pub capabilities: RuntimeCapabilities,
    pub timeline: Timeline,
    pub video_samples: u32,
    pub audio_samples: u32,
    /// Sample frames of audio rendered, 0 without an audio track.
    pub audio_frames: u64,
    pub duration_secs: f64,
    pub stats: EncodeStats,
    pub elapsed_secs: f64,
}

/// Result of one successful attempt, before upload.
struct Attempt {
    muxed: MuxedOutput,
    codecs: NegotiatedCodecs,
    timeline: Timeline,
    audio_frames: u64,
    stats: EncodeStats,
}

/// Runs exports and publishes their state.
pub struct ExportController {
    backend: MediaBackend,
    fetcher: Arc<dyn AssetFetcher>,
    store: Option<Arc<dyn ArtifactStore>>,
    settings: ExportSettings,
    state: watch::Sender<ExportState>,
    cancel: CancelFlag,
    running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn band(start: u8, end: u8, done: u64, total: u64) -> u8 {
    if total == 0 {
        return start;
    }
    let span = (end - start) as u64;
    start + (span * done.min(total) / total) as u8
}

impl ExportController {
    pub fn new(
        backend: MediaBackend,
        fetcher: Arc<dyn AssetFetcher>,
        settings: ExportSettings,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::new());
        Self {
            backend,
            fetcher,
            store: None,
            settings,
            state,
            cancel: CancelFlag::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Upload finished artifacts that carry a storage key.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        tracing::info!("Export cancellation requested");
        self.cancel.cancel();
    }

    /// Run one export to completion, failure or cancellation.
    pub async fn run(&self, request: ExportRequest) -> StoryreelResult<ExportReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StoryreelError::invalid_input("an export is already running"));
        }
        let _guard = RunningGuard(&self.running);
        // A cancel only applies to the run it was raised against.
        self.cancel.reset();
        self.state.send_replace(ExportState::new());

        let timer = ExportTimer::start();
        tracing::info!(
            scenes = request.scenes.len(),
            format = %request.format,
            started = timer.started_wall(),
            "Starting export"
        );

        match self.run_attempts(&request, &timer).await {
            Ok(report) => {
                tracing::info!(
                    file = %report.output.artifact.file_name,
                    size = report.output.artifact.size_bytes,
                    video_samples = report.video_samples,
                    audio_samples = report.audio_samples,
                    attempts = report.attempts,
                    elapsed_secs = report.elapsed_secs,
                    "Export complete"
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.user_message();
                if e.is_cancelled() {
                    tracing::info!("Export cancelled");
                } else {
                    tracing::error!(error = %e, "Export failed");
                }
                if let Err(state_error) = self.transition(|s| s.fail(message)) {
                    tracing::debug!(error = %state_error, "Failure not recorded in state");
                }
                Err(e)
            }
        }
    }

    async fn run_attempts(
        &self,
        request: &ExportRequest,
        timer: &ExportTimer,
    ) -> StoryreelResult<ExportReport> {
        self.cancel.check()?;
        validate_scenes(&request.scenes)
            .map_err(|e| StoryreelError::invalid_input(e.to_string()))?;
        let fps = request.fps.unwrap_or(self.settings.fps);
        if fps == 0 || fps > MAX_FPS {
            return Err(StoryreelError::invalid_input(format!(
                "fps must be between 1 and {MAX_FPS}, got {fps}"
            )));
        }

        let mut capabilities = self.backend.probe.probe();
        if let Some(class) = self.settings.device_class {
            capabilities = capabilities.with_device_class(class);
        }
        let resolution = request.format.resolution(capabilities.device_class);
        tracing::info!(
            backend = %capabilities.backend,
            device_class = ?capabilities.device_class,
            resolution = %resolution,
            fps,
            "Runtime probed"
        );
        if let Some(reason) = capabilities.missing_requirement() {
            return Err(StoryreelError::capability(reason));
        }

        self.transition(|s| s.advance(ExportStatus::Loading, 0))?;

        let max_attempts = self.settings.max_retries + 1;
        let mut attempts = 1;
        let attempt = loop {
            match self.attempt(request, &capabilities, resolution, fps).await {
                Ok(attempt) => break attempt,
                Err(e) if e.is_retryable() && attempts < max_attempts && !self.cancel.is_cancelled() => {
                    tracing::warn!(attempt = attempts, error = %e, "Export attempt failed; retrying");
                    self.transition(|s| s.retry())?;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        };

        self.cancel.check()?;
        let artifact = Artifact::mp4(request.file_name(), attempt.muxed.bytes.clone());
        let remote_ref = self.upload(request, &artifact).await?;
        let output = ExportOutput {
            artifact,
            remote_ref,
        };
        self.transition(|s| s.complete(output.clone()))?;

        Ok(ExportReport {
            output,
            warning: self.state.borrow().warning.clone(),
            attempts,
            resolution,
            fps,
            codecs: attempt.codecs,
            capabilities,
            video_samples: attempt.muxed.video_samples,
            audio_samples: attempt.muxed.audio_samples,
            audio_frames: attempt.audio_frames,
            duration_secs: micros_to_secs(attempt.muxed.duration_us),
            timeline: attempt.timeline,
            stats: attempt.stats,
            elapsed_secs: timer.elapsed_secs(),
        })
    }

    async fn attempt(
        &self,
        request: &ExportRequest,
        capabilities: &RuntimeCapabilities,
        resolution: Resolution,
        fps: u32,
    ) -> StoryreelResult<Attempt> {
        let loader = AssetLoader::new(
            self.fetcher.clone(),
            self.backend.decoder.clone(),
            &self.settings.timeouts,
            self.settings.lookahead_scenes,
        );
        let mut assets = loader
            .load_all(&request.scenes, &self.cancel, |done, total| {
                self.progress(band(0, LOADING_END, done as u64, total as u64));
            })
            .await?;
        for warning in assets.iter().flat_map(|a| a.warnings.iter()) {
            self.warn(warning.clone());
        }

        let media: Vec<MediaDurations> = assets.iter().map(SceneAssets::media_durations).collect();
        let timeline =
            TimelinePlanner::new(fps, self.settings.fallback_scene_secs).plan(&request.scenes, &media)?;
        tracing::info!(
            scenes = timeline.scenes.len(),
            frames = timeline.total_frames,
            duration_secs = timeline.total_duration_secs(),
            audio = timeline.has_audio(),
            "Timeline planned"
        );

        let codecs = CodecNegotiator::new(self.backend.encoders.as_ref(), capabilities).negotiate(
            resolution,
            fps,
            timeline.has_audio(),
        )?;
        if let Some(warning) = &codecs.warning {
            self.warn(warning.clone());
        }

        let mut pipeline = EncodePipeline::open(
            self.backend.encoders.as_ref(),
            &codecs,
            PipelineSettings {
                max_pending_frames: self.settings.max_pending_frames,
                backpressure_timeout: self.settings.timeouts.backpressure(),
            },
        )?;
        self.transition(|s| s.advance(ExportStatus::Rendering, LOADING_END))?;

        let audio_frames = match self
            .render(&timeline, &mut assets, &mut pipeline, &codecs, resolution)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                pipeline.abort();
                return Err(e);
            }
        };

        self.transition(|s| s.advance(ExportStatus::Encoding, RENDERING_END))?;
        let stats = pipeline.stats().clone();
        let muxed = pipeline.finish()?;
        self.progress(ENCODING_END);

        if let Some(audio) = &codecs.audio {
            let drift = DriftMeasurement {
                reference_us: timeline.total_duration_us,
                measured_us: samples_to_micros(audio_frames, audio.sample_rate),
            };
            if drift.exceeds_threshold_ms(MAX_AUDIO_DRIFT_MS) {
                tracing::warn!(drift_ms = drift.drift_ms(), "Audio track drifted from the timeline");
            } else {
                tracing::debug!(drift_ms = drift.drift_ms(), "Audio aligned with timeline");
            }
        }

        Ok(Attempt {
            muxed,
            codecs,
            timeline,
            audio_frames,
            stats,
        })
    }

    /// Render scenes in order: all video frames of a scene, then its audio.
    async fn render(
        &self,
        timeline: &Timeline,
        assets: &mut [SceneAssets],
        pipeline: &mut EncodePipeline,
        codecs: &NegotiatedCodecs,
        resolution: Resolution,
    ) -> StoryreelResult<u64> {
        let mut frames = FrameRenderer::new(
            resolution,
            self.settings.fill,
            YieldPacer::new(self.settings.yield_interval_frames, self.settings.yield_interval),
        );
        let mut audio = codecs
            .audio
            .as_ref()
            .map(|config| AudioRenderer::new(config, self.settings.audio_chunk_frames));
        let total = timeline.total_frames;

        for (plan, scene) in timeline.scenes.iter().zip(assets.iter_mut()) {
            self.cancel.check()?;
            frames
                .render_scene(timeline, scene, pipeline, &self.cancel, |done| {
                    self.progress(band(LOADING_END, RENDERING_END, done, total));
                })
                .await?;
            if let Some(audio) = audio.as_mut() {
                audio.render_scene(plan, scene.audio.as_ref(), pipeline, &self.cancel)?;
            }
            scene.release();
        }

        match audio.as_mut() {
            Some(audio) => {
                audio.finish(pipeline)?;
                Ok(audio.samples_written())
            }
            None => Ok(0),
        }
    }

    /// Upload failures are warnings; the local artifact stays available.
    async fn upload(
        &self,
        request: &ExportRequest,
        artifact: &Artifact,
    ) -> StoryreelResult<Option<String>> {
        let Some(key) = request.storage_key.as_deref() else {
            return Ok(None);
        };
        let Some(store) = self.store.as_ref() else {
            tracing::debug!(key, "No artifact store configured; skipping upload");
            return Ok(None);
        };

        self.transition(|s| s.advance(ExportStatus::Uploading, ENCODING_END))?;
        let limit = self.settings.timeouts.upload();
        let result = tokio::time::timeout(
            limit,
            store.put(key, artifact.bytes.clone(), &artifact.mime_type),
        )
        .await
        .unwrap_or_else(|_| Err(StoryreelError::timeout("uploading the export", limit)));

        match result {
            Ok(remote_ref) => {
                tracing::info!(store = store.name(), key, remote_ref = %remote_ref, "Artifact uploaded");
                self.progress(UPLOADING_END);
                Ok(Some(remote_ref))
            }
            Err(e) => {
                tracing::warn!(store = store.name(), key, error = %e, "Upload failed");
                self.warn(format!("Upload failed; the video is available locally ({e})"));
                Ok(None)
            }
        }
    }

    fn transition(
        &self,
        change: impl FnOnce(&mut ExportState) -> Result<(), StateError>,
    ) -> StoryreelResult<()> {
        let mut result = Ok(());
        self.state.send_modify(|state| result = change(state));
        if result.is_ok() {
            let state = self.state.borrow();
            tracing::debug!(status = %state.status, progress = state.progress, attempt = state.attempt, "Export state");
        }
        result.map_err(|e| StoryreelError::Other(e.into()))
    }

    fn progress(&self, progress: u8) {
        self.state.send_if_modified(|state| {
            let before = state.progress;
            state.set_progress(progress).is_ok() && state.progress != before
        });
    }

    fn warn(&self, message: String) {
        self.state.send_modify(|state| state.warn(message));
    }
}
