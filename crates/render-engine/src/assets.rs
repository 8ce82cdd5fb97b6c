//! Asset loading.
//!
//! Fetches and decodes every scene's stills, video clip and narration.
//! Scenes are loaded a few at a time ahead of the consumer and delivered in
//! order. All decoding goes through one shared decoder guarded by a lock, so
//! at most one decode runs at any moment.
//!
//! Failure policy:
//! - a still that cannot be loaded is skipped with a warning
//! - a video clip or narration that cannot be loaded fails the export and
//!   names the scene

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use image::RgbaImage;
use storyreel_common::config::TimeoutConfig;
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_project_model::Scene;
use tokio::sync::Mutex;

use crate::backend::{DecodeLimits, DecodedAudio, MediaDecoder, VideoClip};
use crate::export::CancelFlag;
use crate::fetch::{AssetFetcher, FetchMode};
use crate::timeline::MediaDurations;

/// Decoded media for one scene.
pub struct SceneAssets {
    pub scene_index: usize,
    pub scene_number: u32,
    pub images: Vec<RgbaImage>,
    pub video: Option<Box<dyn VideoClip>>,
    pub audio: Option<DecodedAudio>,
    /// Non-fatal problems, already phrased for the user.
    pub warnings: Vec<String>,
}

impl SceneAssets {
    pub fn media_durations(&self) -> MediaDurations {
        MediaDurations {
            audio_secs: self
                .audio
                .as_ref()
                .map(|a| a.duration_secs())
                .filter(|secs| *secs > 0.0),
            video_secs: self
                .video
                .as_ref()
                .map(|v| v.duration_secs())
                .filter(|secs| secs.is_finite() && *secs > 0.0),
            image_count: self.images.len(),
        }
    }

    /// Free decoded media once the scene has been rendered.
    pub fn release(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.close();
        }
        self.images = Vec::new();
        self.audio = None;
    }
}

impl std::fmt::Debug for SceneAssets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneAssets")
            .field("scene_number", &self.scene_number)
            .field("images", &self.images.len())
            .field("video", &self.video.as_ref().map(|v| v.duration_secs()))
            .field("audio", &self.audio.as_ref().map(|a| a.duration_secs()))
            .field("warnings", &self.warnings)
            .finish()
    }
}

pub struct AssetLoader {
    fetcher: Arc<dyn AssetFetcher>,
    decoder: Arc<dyn MediaDecoder>,
    decode_lock: Arc<Mutex<()>>,
    limits: DecodeLimits,
    fetch_timeout: Duration,
    lookahead: usize,
}

impl AssetLoader {
    pub fn new(
        fetcher: Arc<dyn AssetFetcher>,
        decoder: Arc<dyn MediaDecoder>,
        timeouts: &TimeoutConfig,
        lookahead: usize,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            decode_lock: Arc::new(Mutex::new(())),
            limits: DecodeLimits {
                metadata: timeouts.metadata(),
                seek: timeouts.seek(),
            },
            fetch_timeout: timeouts.fetch(),
            lookahead: lookahead.max(1),
        }
    }

    /// Load every scene in order. `on_loaded(done, total)` runs after each.
    pub async fn load_all<F>(
        &self,
        scenes: &[Scene],
        cancel: &CancelFlag,
        mut on_loaded: F,
    ) -> StoryreelResult<Vec<SceneAssets>>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = scenes.len();
        let mut loaded = Vec::with_capacity(total);
        let mut pending = stream::iter(
            scenes
                .iter()
                .enumerate()
                .map(|(index, scene)| self.load_scene(index, scene, cancel)),
        )
        .buffered(self.lookahead);

        while let Some(result) = pending.next().await {
            cancel.check()?;
            loaded.push(result?);
            on_loaded(loaded.len(), total);
        }
        Ok(loaded)
    }

    pub async fn load_scene(
        &self,
        index: usize,
        scene: &Scene,
        cancel: &CancelFlag,
    ) -> StoryreelResult<SceneAssets> {
        cancel.check()?;
        let number = scene.number;
        let mut assets = SceneAssets {
            scene_index: index,
            scene_number: number,
            images: Vec::new(),
            video: None,
            audio: None,
            warnings: Vec::new(),
        };

        let audio = async {
            match scene.audio_source() {
                Some(url) => self
                    .load_audio(url)
                    .await
                    .map(Some)
                    .map_err(|e| StoryreelError::for_scene(number, "narration could not be loaded", e)),
                None => Ok(None),
            }
        };

        if let Some(url) = scene.video_source() {
            let video = async {
                self.load_video(url)
                    .await
                    .map_err(|e| StoryreelError::for_scene(number, "video could not be loaded", e))
            };
            let (video, audio) = futures::join!(video, audio);
            assets.video = Some(video?);
            assets.audio = audio?;
            if !scene.image_sources().is_empty() {
                tracing::debug!(scene = number, "Scene has a video; stills ignored");
            }
        } else {
            let stills = futures::future::join_all(
                scene.image_sources().into_iter().map(|url| self.load_image(url)),
            );
            let (stills, audio) = futures::join!(stills, audio);
            assets.audio = audio?;
            for (url, still) in scene.image_sources().into_iter().zip(stills) {
                match still {
                    Ok(image) => assets.images.push(image),
                    Err(e) => {
                        tracing::warn!(scene = number, url, error = %e, "Skipping image");
                        assets
                            .warnings
                            .push(format!("Scene {number}: image {url} skipped ({e})"));
                    }
                }
            }
        }

        tracing::debug!(
            scene = number,
            images = assets.images.len(),
            video = assets.video.is_some(),
            audio = assets.audio.is_some(),
            "Scene assets loaded"
        );
        Ok(assets)
    }

    async fn fetch(&self, url: &str, mode: FetchMode) -> StoryreelResult<Bytes> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url, mode)).await {
            Ok(result) => result,
            Err(_) => Err(StoryreelError::timeout(
                format!("fetching {url}"),
                self.fetch_timeout,
            )),
        }
    }

    /// Try a CORS request first, then a plain one.
    async fn load_image(&self, url: &str) -> StoryreelResult<RgbaImage> {
        let data = match self.fetch(url, FetchMode::Cors).await {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(url, error = %e, "CORS fetch failed; retrying without CORS");
                self.fetch(url, FetchMode::NoCors).await?
            }
        };
        self.decode(move |decoder| decoder.decode_image(&data)).await
    }

    async fn load_video(&self, url: &str) -> StoryreelResult<Box<dyn VideoClip>> {
        let data = self.fetch(url, FetchMode::Cors).await?;
        let limits = self.limits;
        let opened = tokio::time::timeout(
            self.limits.metadata,
            self.decode(move |decoder| decoder.open_video(data, limits)),
        )
        .await;
        match opened {
            Ok(clip) => clip,
            Err(_) => Err(StoryreelError::timeout(
                "reading video metadata",
                self.limits.metadata,
            )),
        }
    }

    async fn load_audio(&self, url: &str) -> StoryreelResult<DecodedAudio> {
        let data = self.fetch(url, FetchMode::Cors).await?;
        let audio = self.decode(move |decoder| decoder.decode_audio(&data)).await?;
        if audio.frames() == 0 {
            return Err(StoryreelError::invalid_input("narration has no samples"));
        }
        Ok(audio)
    }

    /// Run `work` on the blocking pool while holding the decode lock.
    ///
    /// The guard moves into the blocking task, so a caller that gives up on
    /// a slow decode does not let the next decode start alongside it.
    async fn decode<T, W>(&self, work: W) -> StoryreelResult<T>
    where
        T: Send + 'static,
        W: FnOnce(&dyn MediaDecoder) -> StoryreelResult<T> + Send + 'static,
    {
        let guard = self.decode_lock.clone().lock_owned().await;
        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(decoder.as_ref())
        })
        .await
            .map_err(|e| StoryreelError::Other(anyhow::anyhow!("decode task failed: {e}")))?
    }
}
