//! Encode/mux pipeline.
//!
//! Owns the video encoder, the optional audio encoder and the muxer for one
//! export attempt. Encoders report chunks on a channel which is drained into
//! the muxer after every submission.
//!
//! The channel itself is unbounded. Encoders send from inside `encode` and
//! `flush`, on the same task that drains, so a full bounded channel could
//! never be emptied while a flush is in progress. Capacity is bounded one
//! step earlier instead: rendering waits while the video encoder holds more
//! than `max_pending_frames`, and every submission drains what was sent.
//!
//! Shutdown order matters: both encoders are flushed and their remaining
//! output drained before the muxer is finalized, otherwise the tail of the
//! video would be lost.

use std::time::Duration;

use serde::Serialize;
use storyreel_common::error::{StoryreelError, StoryreelResult};

use crate::backend::{
    encoder_channel, AudioChunk, AudioEncoder, EncoderEvent, EncoderEvents, EncoderFactory,
    TrackKind, VideoEncoder, VideoFrame,
};
use crate::codec::NegotiatedCodecs;
use crate::mux::{Mp4Muxer, MuxedOutput};

/// Backpressure limits.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Pause rendering while the video encoder holds more frames than this.
    pub max_pending_frames: usize,
    /// Give up when the queue does not drain within this time.
    pub backpressure_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_pending_frames: 10,
            backpressure_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncodeStats {
    pub video_frames_submitted: u64,
    pub audio_chunks_submitted: u64,
    pub video_chunks_muxed: u64,
    pub audio_chunks_muxed: u64,
    pub backpressure_waits: u64,
    pub max_queue_depth: usize,
}

pub struct EncodePipeline {
    video: Box<dyn VideoEncoder>,
    audio: Option<Box<dyn AudioEncoder>>,
    events: EncoderEvents,
    muxer: Option<Mp4Muxer>,
    settings: PipelineSettings,
    stats: EncodeStats,
    last_video_timestamp: Option<i64>,
    last_audio_timestamp: Option<i64>,
    closed: bool,
}

impl EncodePipeline {
    /// Create encoders for the negotiated configuration.
    pub fn open(
        factory: &dyn EncoderFactory,
        codecs: &NegotiatedCodecs,
        settings: PipelineSettings,
    ) -> StoryreelResult<Self> {
        let (output, events) = encoder_channel();
        let mut video = factory.create_video_encoder(&codecs.video, output.clone())?;
        let audio = match &codecs.audio {
            Some(config) => match factory.create_audio_encoder(config, output) {
                Ok(encoder) => Some(encoder),
                Err(e) => {
                    video.close();
                    return Err(e);
                }
            },
            None => None,
        };

        tracing::info!(
            backend = factory.name(),
            video = %codecs.video.codec,
            audio = codecs.audio.as_ref().map(|a| a.codec.as_str()).unwrap_or("none"),
            "Encode pipeline opened"
        );

        Ok(Self {
            video,
            audio,
            events,
            muxer: Some(Mp4Muxer::new(&codecs.video, codecs.audio.as_ref())),
            settings,
            stats: EncodeStats::default(),
            last_video_timestamp: None,
            last_audio_timestamp: None,
            closed: false,
        })
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    /// Move delivered chunks into the muxer and surface encoder errors.
    pub fn drain(&mut self) -> StoryreelResult<()> {
        loop {
            match self.events.try_recv() {
                Ok(EncoderEvent::Chunk(chunk)) => {
                    let Some(muxer) = self.muxer.as_mut() else {
                        return Err(StoryreelError::mux("chunk delivered after finalize"));
                    };
                    muxer.append(&chunk)?;
                    match chunk.track {
                        TrackKind::Video => self.stats.video_chunks_muxed += 1,
                        TrackKind::Audio => self.stats.audio_chunks_muxed += 1,
                    }
                }
                Ok(EncoderEvent::Error { track, message }) => {
                    return Err(StoryreelError::encoder(format!("{track} encoder: {message}")));
                }
                Err(_) => return Ok(()),
            }
        }
    }

    /// Wait until the video encoder queue is at or below the limit.
    pub async fn wait_for_capacity(&mut self) -> StoryreelResult<()> {
        self.drain()?;
        if self.video.queue_depth() <= self.settings.max_pending_frames {
            return Ok(());
        }

        self.stats.backpressure_waits += 1;
        let deadline = tokio::time::Instant::now() + self.settings.backpressure_timeout;
        while self.video.queue_depth() > self.settings.max_pending_frames {
            if tokio::time::Instant::now() >= deadline {
                return Err(StoryreelError::timeout(
                    "waiting for the video encoder queue to drain",
                    self.settings.backpressure_timeout,
                ));
            }
            self.video.poll()?;
            if let Some(audio) = self.audio.as_mut() {
                audio.poll()?;
            }
            self.drain()?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    pub fn submit_video(&mut self, frame: &VideoFrame<'_>, keyframe: bool) -> StoryreelResult<()> {
        if let Some(last) = self.last_video_timestamp {
            if frame.timestamp_us <= last {
                return Err(StoryreelError::invalid_input(format!(
                    "video frame at {}us submitted after {}us",
                    frame.timestamp_us, last
                )));
            }
        }
        self.video.encode(frame, keyframe)?;
        self.last_video_timestamp = Some(frame.timestamp_us);
        self.stats.video_frames_submitted += 1;
        self.stats.max_queue_depth = self.stats.max_queue_depth.max(self.video.queue_depth());
        self.drain()
    }

    pub fn submit_audio(&mut self, chunk: &AudioChunk) -> StoryreelResult<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Err(StoryreelError::invalid_input(
                "audio submitted to a pipeline without an audio encoder",
            ));
        };
        let timestamp = chunk.timestamp_us();
        if let Some(last) = self.last_audio_timestamp {
            if timestamp <= last {
                return Err(StoryreelError::invalid_input(format!(
                    "audio chunk at {timestamp}us submitted after {last}us"
                )));
            }
        }
        audio.encode(chunk)?;
        self.last_audio_timestamp = Some(timestamp);
        self.stats.audio_chunks_submitted += 1;
        self.drain()
    }

    /// Flush both encoders, drain, close, then write the container.
    pub fn finish(mut self) -> StoryreelResult<MuxedOutput> {
        self.video.flush()?;
        if let Some(audio) = self.audio.as_mut() {
            audio.flush()?;
        }
        self.drain()?;
        self.close_encoders();
        self.drain()?;

        tracing::debug!(
            video_chunks = self.stats.video_chunks_muxed,
            audio_chunks = self.stats.audio_chunks_muxed,
            backpressure_waits = self.stats.backpressure_waits,
            "Encoders drained; finalizing container"
        );

        match self.muxer.take() {
            Some(muxer) => muxer.finalize(),
            None => Err(StoryreelError::mux("container already finalized")),
        }
    }

    /// Close encoders and discard everything muxed so far.
    pub fn abort(mut self) {
        tracing::debug!(
            video_frames = self.stats.video_frames_submitted,
            "Aborting encode pipeline"
        );
        self.close_encoders();
    }

    fn close_encoders(&mut self) {
        if self.closed {
            return;
        }
        self.video.close();
        if let Some(audio) = self.audio.as_mut() {
            audio.close();
        }
        self.closed = true;
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        self.close_encoders();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{SyntheticEncoderFactory, SyntheticOptions};
    use crate::codec::{AudioCodecConfig, H264Profile, VideoCodecConfig};
    use image::RgbaImage;
    use storyreel_project_model::Resolution;

    fn codecs(audio: bool) -> NegotiatedCodecs {
        NegotiatedCodecs {
            video: VideoCodecConfig::h264(H264Profile::Baseline, Resolution::new(64, 36), 30),
            audio: audio.then(|| AudioCodecConfig::aac_lc(48_000, 2)),
            warning: None,
        }
    }

    fn frame(pixels: &RgbaImage, index: i64) -> VideoFrame<'_> {
        VideoFrame {
            pixels,
            timestamp_us: index * 33_333,
            duration_us: 33_333,
        }
    }

    #[tokio::test]
    async fn test_flush_happens_before_finalize() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            latency_frames: 8,
            ..SyntheticOptions::default()
        });
        let mut pipeline =
            EncodePipeline::open(&factory, &codecs(false), PipelineSettings::default()).unwrap();
        let pixels = RgbaImage::new(64, 36);
        for i in 0..20 {
            pipeline.wait_for_capacity().await.unwrap();
            pipeline.submit_video(&frame(&pixels, i), i == 0).unwrap();
        }
        assert_eq!(pipeline.stats().video_chunks_muxed, 12);

        let output = pipeline.finish().unwrap();
        assert_eq!(output.video_samples, 20);
        let log = factory.log();
        assert_eq!(log.flushes, vec![TrackKind::Video]);
        assert_eq!(log.encoders_closed, 1);
    }

    #[tokio::test]
    async fn test_backpressure_waits_for_queue() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            latency_frames: 6,
            ..SyntheticOptions::default()
        });
        let settings = PipelineSettings {
            max_pending_frames: 3,
            backpressure_timeout: Duration::from_secs(5),
        };
        let mut pipeline = EncodePipeline::open(&factory, &codecs(false), settings).unwrap();
        let pixels = RgbaImage::new(64, 36);
        for i in 0..30 {
            pipeline.wait_for_capacity().await.unwrap();
            pipeline.submit_video(&frame(&pixels, i), i == 0).unwrap();
        }
        assert!(pipeline.stats().backpressure_waits > 0);
        assert!(pipeline.stats().max_queue_depth <= 4);
        assert_eq!(pipeline.finish().unwrap().video_samples, 30);
    }

    #[test]
    fn test_flush_burst_beyond_pending_limit_is_muxed() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            latency_frames: 8,
            ..SyntheticOptions::default()
        });
        let settings = PipelineSettings {
            max_pending_frames: 2,
            backpressure_timeout: Duration::from_secs(5),
        };
        let mut pipeline = EncodePipeline::open(&factory, &codecs(false), settings).unwrap();
        let pixels = RgbaImage::new(64, 36);
        for i in 0..8 {
            pipeline.submit_video(&frame(&pixels, i), i == 0).unwrap();
        }
        assert_eq!(pipeline.stats().video_chunks_muxed, 0);

        let output = pipeline.finish().unwrap();
        assert_eq!(output.video_samples, 8);
    }

    #[tokio::test]
    async fn test_encoder_error_surfaces_on_drain() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            fail_video_after_frames: Some(3),
            failing_runs: 1,
            ..SyntheticOptions::default()
        });
        let mut pipeline =
            EncodePipeline::open(&factory, &codecs(false), PipelineSettings::default()).unwrap();
        let pixels = RgbaImage::new(64, 36);
        pipeline.submit_video(&frame(&pixels, 0), true).unwrap();
        pipeline.submit_video(&frame(&pixels, 1), false).unwrap();
        let err = pipeline.submit_video(&frame(&pixels, 2), false).unwrap_err();
        assert!(matches!(err, StoryreelError::Encoder { .. }));
        assert!(err.is_retryable());

        pipeline.abort();
        assert_eq!(factory.log().encoders_closed, 1);
    }

    #[test]
    fn test_non_increasing_timestamps_rejected() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        let mut pipeline =
            EncodePipeline::open(&factory, &codecs(false), PipelineSettings::default()).unwrap();
        let pixels = RgbaImage::new(64, 36);
        pipeline.submit_video(&frame(&pixels, 1), true).unwrap();
        assert!(pipeline.submit_video(&frame(&pixels, 1), false).is_err());
        assert_eq!(factory.log().video_frames.len(), 1);
    }

    #[test]
    fn test_zero_frames_is_empty_output() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        let pipeline =
            EncodePipeline::open(&factory, &codecs(true), PipelineSettings::default()).unwrap();
        assert!(matches!(
            pipeline.finish(),
            Err(StoryreelError::EmptyOutput { .. })
        ));
        assert_eq!(factory.log().encoders_closed, 2);
    }

    #[test]
    fn test_drop_closes_encoders() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        drop(EncodePipeline::open(&factory, &codecs(true), PipelineSettings::default()).unwrap());
        assert_eq!(factory.log().encoders_closed, 2);
    }
}
