//! Deterministic in-process backend.
//!
//! Encoders here do not compress anything. They emit small, well-formed
//! access units with correct timing and keyframe flags so the rest of the
//! pipeline (backpressure, flush ordering, muxing) can be exercised without a
//! codec library. Support flags, query availability, output latency and
//! injected failures are configurable through [`SyntheticOptions`].
//!
//! Video "files" for the synthetic decoder are small JSON descriptors built
//! with [`synthetic_video_bytes`].

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_platform_core::{CapabilityProbe, HostResources, RuntimeCapabilities};
use storyreel_project_model::DeviceClass;

use super::native::NativeDecoder;
use super::{
    AudioChunk, AudioEncoder, DecodeLimits, DecodedAudio, EncodedChunk, EncoderEvent,
    EncoderFactory, EncoderOutput, MediaBackend, MediaDecoder, TrackKind, VideoClip,
    VideoEncoder, VideoFrame,
};
use crate::codec::{AudioCodecConfig, H264Profile, VideoCodecConfig};
use crate::mux::{aac_audio_specific_config, avc_decoder_config};

/// Behaviour switches for the synthetic backend.
#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub video_supported: bool,
    pub audio_supported: bool,
    /// Whether the probe reports a configuration query function.
    pub config_query: bool,
    /// Profiles accepted by the video encoder.
    pub video_profiles: Vec<H264Profile>,
    /// Sample rates accepted by the audio encoder.
    pub audio_sample_rates: Vec<u32>,
    /// Chunks held back inside each encoder until polled or flushed.
    pub latency_frames: usize,
    /// Report an encoder error after this many video frames...
    pub fail_video_after_frames: Option<u64>,
    /// ...in this many encoder instances (then behave normally).
    pub failing_runs: u32,
    pub device_class: DeviceClass,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            video_supported: true,
            audio_supported: true,
            config_query: true,
            video_profiles: H264Profile::ALL.to_vec(),
            audio_sample_rates: vec![48_000, 44_100],
            latency_frames: 0,
            fail_video_after_frames: None,
            failing_runs: 0,
            device_class: DeviceClass::Desktop,
        }
    }
}

/// A frame as the encoder saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedFrame {
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
}

/// An audio chunk as the encoder saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedAudio {
    pub timestamp_us: i64,
    pub start_sample: u64,
    pub frames: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Everything the synthetic encoders observed, for assertions.
#[derive(Debug, Clone, Default)]
pub struct SyntheticLog {
    pub video_encoders_created: u32,
    pub audio_encoders_created: u32,
    pub configure_failures: u32,
    pub encoders_closed: u32,
    pub video_frames: Vec<SubmittedFrame>,
    pub audio_chunks: Vec<SubmittedAudio>,
    pub flushes: Vec<TrackKind>,
    pub max_video_queue_depth: usize,
}

/// Encoder factory with configurable support and failure injection.
///
/// Clones share one log, so a test can keep a handle while the export owns
/// another.
#[derive(Debug, Clone)]
pub struct SyntheticEncoderFactory {
    options: SyntheticOptions,
    log: Arc<Mutex<SyntheticLog>>,
    failures_left: Arc<AtomicU32>,
}

impl SyntheticEncoderFactory {
    pub fn new(options: SyntheticOptions) -> Self {
        let failures_left = Arc::new(AtomicU32::new(options.failing_runs));
        Self {
            options,
            log: Arc::new(Mutex::new(SyntheticLog::default())),
            failures_left,
        }
    }

    /// Snapshot of the shared log.
    pub fn log(&self) -> SyntheticLog {
        lock(&self.log).clone()
    }

    fn video_supported(&self, config: &VideoCodecConfig) -> bool {
        self.options.video_supported && self.options.video_profiles.contains(&config.profile)
    }

    fn audio_supported(&self, config: &AudioCodecConfig) -> bool {
        self.options.audio_supported
            && config.channels == 2
            && self.options.audio_sample_rates.contains(&config.sample_rate)
    }

    fn record_configure_failure(&self) {
        lock(&self.log).configure_failures += 1;
    }
}

fn lock(log: &Mutex<SyntheticLog>) -> std::sync::MutexGuard<'_, SyntheticLog> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EncoderFactory for SyntheticEncoderFactory {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn is_video_config_supported(&self, config: &VideoCodecConfig) -> StoryreelResult<bool> {
        if !self.options.config_query {
            return Err(StoryreelError::unsupported("configuration queries unavailable"));
        }
        Ok(self.video_supported(config))
    }

    fn is_audio_config_supported(&self, config: &AudioCodecConfig) -> StoryreelResult<bool> {
        if !self.options.config_query {
            return Err(StoryreelError::unsupported("configuration queries unavailable"));
        }
        Ok(self.audio_supported(config))
    }

    fn create_video_encoder(
        &self,
        config: &VideoCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn VideoEncoder>> {
        if !self.video_supported(config) {
            self.record_configure_failure();
            return Err(StoryreelError::encoder(format!(
                "unsupported configuration {}",
                config.codec
            )));
        }
        lock(&self.log).video_encoders_created += 1;

        let sps = [
            0x67,
            config.profile.profile_idc(),
            config.profile.constraint_flags(),
            config.level_idc,
            0xAC,
            0xD9,
        ];
        let pps = [0x68, 0xEB, 0xE3, 0xCB];
        Ok(Box::new(SyntheticVideoEncoder {
            output,
            decoder_config: Some(avc_decoder_config(&sps, &pps)),
            pending: VecDeque::new(),
            latency: self.options.latency_frames,
            frames_seen: 0,
            last_timestamp: None,
            fail_after: self.options.fail_video_after_frames,
            failures_left: self.failures_left.clone(),
            log: self.log.clone(),
            closed: false,
        }))
    }

    fn create_audio_encoder(
        &self,
        config: &AudioCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn AudioEncoder>> {
        if !self.audio_supported(config) {
            self.record_configure_failure();
            return Err(StoryreelError::encoder(format!(
                "unsupported configuration {} @ {} Hz",
                config.codec, config.sample_rate
            )));
        }
        lock(&self.log).audio_encoders_created += 1;
        Ok(Box::new(SyntheticAudioEncoder {
            output,
            config: config.clone(),
            decoder_config: Some(aac_audio_specific_config(config.sample_rate, config.channels)),
            pending: VecDeque::new(),
            latency: self.options.latency_frames,
            log: self.log.clone(),
            closed: false,
        }))
    }
}

struct SyntheticVideoEncoder {
    output: EncoderOutput,
    decoder_config: Option<Bytes>,
    pending: VecDeque<EncodedChunk>,
    latency: usize,
    frames_seen: u64,
    last_timestamp: Option<i64>,
    fail_after: Option<u64>,
    failures_left: Arc<AtomicU32>,
    log: Arc<Mutex<SyntheticLog>>,
    closed: bool,
}

impl SyntheticVideoEncoder {
    fn release(&mut self, count: usize) {
        for _ in 0..count {
            match self.pending.pop_front() {
                Some(chunk) => {
                    let _ = self.output.send(EncoderEvent::Chunk(chunk));
                }
                None => break,
            }
        }
    }

    fn should_fail_now(&self) -> bool {
        if self.fail_after != Some(self.frames_seen) {
            return false;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl VideoEncoder for SyntheticVideoEncoder {
    fn encode(&mut self, frame: &VideoFrame<'_>, keyframe: bool) -> StoryreelResult<()> {
        if self.closed {
            return Err(StoryreelError::encoder("video encoder is closed"));
        }
        if let Some(last) = self.last_timestamp {
            if frame.timestamp_us <= last {
                return Err(StoryreelError::encoder(format!(
                    "frame timestamp {} does not follow {last}",
                    frame.timestamp_us
                )));
            }
        }
        self.last_timestamp = Some(frame.timestamp_us);
        self.frames_seen += 1;

        let keyframe = keyframe || self.frames_seen == 1;
        lock(&self.log).video_frames.push(SubmittedFrame {
            timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            keyframe,
            width: frame.pixels.width(),
            height: frame.pixels.height(),
        });

        if self.should_fail_now() {
            let _ = self.output.send(EncoderEvent::Error {
                track: TrackKind::Video,
                message: format!("synthetic failure after {} frames", self.frames_seen),
            });
            return Ok(());
        }

        // One length-prefixed NAL unit: IDR or non-IDR slice plus the frame
        // number, so payloads differ per frame.
        let mut data = BytesMut::with_capacity(16);
        data.put_u32(9);
        data.put_u8(if keyframe { 0x65 } else { 0x41 });
        data.put_u64(self.frames_seen);

        self.pending.push_back(EncodedChunk {
            track: TrackKind::Video,
            data: data.freeze(),
            timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            keyframe,
            decoder_config: self.decoder_config.take(),
        });

        {
            let mut log = lock(&self.log);
            log.max_video_queue_depth = log.max_video_queue_depth.max(self.pending.len());
        }
        let excess = self.pending.len().saturating_sub(self.latency);
        self.release(excess);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    fn poll(&mut self) -> StoryreelResult<()> {
        self.release(1);
        Ok(())
    }

    fn flush(&mut self) -> StoryreelResult<()> {
        lock(&self.log).flushes.push(TrackKind::Video);
        let pending = self.pending.len();
        self.release(pending);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            lock(&self.log).encoders_closed += 1;
        }
    }
}

struct SyntheticAudioEncoder {
    output: EncoderOutput,
    config: AudioCodecConfig,
    decoder_config: Option<Bytes>,
    pending: VecDeque<EncodedChunk>,
    latency: usize,
    log: Arc<Mutex<SyntheticLog>>,
    closed: bool,
}

impl SyntheticAudioEncoder {
    fn release(&mut self, count: usize) {
        for _ in 0..count {
            match self.pending.pop_front() {
                Some(chunk) => {
                    let _ = self.output.send(EncoderEvent::Chunk(chunk));
                }
                None => break,
            }
        }
    }
}

impl AudioEncoder for SyntheticAudioEncoder {
    fn encode(&mut self, chunk: &AudioChunk) -> StoryreelResult<()> {
        if self.closed {
            return Err(StoryreelError::encoder("audio encoder is closed"));
        }
        if chunk.sample_rate != self.config.sample_rate || chunk.channels != self.config.channels
        {
            return Err(StoryreelError::encoder(format!(
                "chunk format {} Hz x{} does not match encoder {} Hz x{}",
                chunk.sample_rate, chunk.channels, self.config.sample_rate, self.config.channels
            )));
        }
        lock(&self.log).audio_chunks.push(SubmittedAudio {
            timestamp_us: chunk.timestamp_us(),
            start_sample: chunk.start_sample,
            frames: chunk.frames(),
            sample_rate: chunk.sample_rate,
            channels: chunk.channels,
        });

        let mut data = BytesMut::with_capacity(8);
        data.put_u8(0x21);
        data.put_u8(0x10);
        data.put_u32(chunk.frames() as u32);
        self.pending.push_back(EncodedChunk {
            track: TrackKind::Audio,
            data: data.freeze(),
            timestamp_us: chunk.timestamp_us(),
            duration_us: chunk.duration_us(),
            keyframe: true,
            decoder_config: self.decoder_config.take(),
        });
        let excess = self.pending.len().saturating_sub(self.latency);
        self.release(excess);
        Ok(())
    }

    fn queue_depth(&self) -> usize {
        self.pending.len()
    }

    fn poll(&mut self) -> StoryreelResult<()> {
        self.release(1);
        Ok(())
    }

    fn flush(&mut self) -> StoryreelResult<()> {
        lock(&self.log).flushes.push(TrackKind::Audio);
        let pending = self.pending.len();
        self.release(pending);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pending.clear();
            lock(&self.log).encoders_closed += 1;
        }
    }
}

/// Capability probe answering from [`SyntheticOptions`].
#[derive(Debug, Clone)]
pub struct SyntheticProbe {
    options: SyntheticOptions,
}

impl SyntheticProbe {
    pub fn new(options: SyntheticOptions) -> Self {
        Self { options }
    }
}

impl CapabilityProbe for SyntheticProbe {
    fn probe(&self) -> RuntimeCapabilities {
        let host = HostResources::detect();
        RuntimeCapabilities {
            backend: "synthetic".to_string(),
            video_encoding: self.options.video_supported,
            audio_encoding: self.options.audio_supported,
            config_query: self.options.config_query,
            video_decoding: true,
            compressed_audio_decoding: false,
            device_class: self.options.device_class,
            cpu_count: host.cpu_count,
            memory_bytes: host.memory_bytes,
        }
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

const SYNTHETIC_VIDEO_MAGIC: &[u8] = b"STORYREEL-SYNTHETIC-VIDEO\n";

/// Parameters of a generated video clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticVideo {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: u32,
}

/// Encode a clip descriptor the synthetic decoder can open.
pub fn synthetic_video_bytes(video: SyntheticVideo) -> Bytes {
    let mut data = BytesMut::from(SYNTHETIC_VIDEO_MAGIC);
    // Serializing four plain numbers cannot fail.
    data.extend_from_slice(&serde_json::to_vec(&video).unwrap_or_default());
    data.freeze()
}

/// Solid-color PNG.
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> StoryreelResult<Bytes> {
    let image = RgbaImage::from_pixel(width, height, Rgba(rgba));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| StoryreelError::Other(anyhow::anyhow!("PNG encode failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// 16-bit PCM WAV containing a sine tone.
pub fn wav_bytes(
    duration_secs: f64,
    sample_rate: u32,
    channels: u16,
    tone_hz: f64,
) -> StoryreelResult<Bytes> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (duration_secs * sample_rate as f64).round() as u64;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| StoryreelError::Other(anyhow::anyhow!("WAV encode failed: {e}")))?;
        for i in 0..frames {
            let t = i as f64 / sample_rate as f64;
            let value = ((t * tone_hz * std::f64::consts::TAU).sin() * 0.25 * i16::MAX as f64)
                as i16;
            for _ in 0..channels {
                writer
                    .write_sample(value)
                    .map_err(|e| StoryreelError::Other(anyhow::anyhow!("WAV encode failed: {e}")))?;
            }
        }
        writer
            .finalize()
            .map_err(|e| StoryreelError::Other(anyhow::anyhow!("WAV encode failed: {e}")))?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}

/// Decoder that understands clip descriptors and delegates everything else
/// to [`NativeDecoder`]. Tracks decode concurrency for assertions.
#[derive(Debug, Default)]
pub struct SyntheticDecoder {
    native: NativeDecoder,
    decode_delay: Duration,
    open_delay: Duration,
    seek_delay: Duration,
    clip_frames: FrameGauge,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    decodes: AtomicUsize,
}

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every audio decode block for `delay`.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Make opening a clip block for `delay` before metadata is known.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make every frame change in opened clips stall for `delay`.
    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    /// Highest number of audio decodes observed running at once.
    pub fn max_concurrent_decodes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    /// Decoded frame buffers currently held by opened clips.
    pub fn live_clip_frames(&self) -> usize {
        self.clip_frames.live.load(Ordering::SeqCst)
    }

    /// Most decoded frame buffers held by opened clips at once.
    pub fn peak_clip_frames(&self) -> usize {
        self.clip_frames.peak.load(Ordering::SeqCst)
    }
}

/// Counts decoded frame buffers shared between a decoder and its clips.
#[derive(Debug, Clone, Default)]
struct FrameGauge {
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FrameGauge {
    fn acquire(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MediaDecoder for SyntheticDecoder {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn decode_image(&self, data: &[u8]) -> StoryreelResult<RgbaImage> {
        self.native.decode_image(data)
    }

    fn decode_audio(&self, data: &[u8]) -> StoryreelResult<DecodedAudio> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.decodes.fetch_add(1, Ordering::SeqCst);
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        let result = self.native.decode_audio(data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn open_video(&self, data: Bytes, limits: DecodeLimits) -> StoryreelResult<Box<dyn VideoClip>> {
        let Some(json) = data.strip_prefix(SYNTHETIC_VIDEO_MAGIC) else {
            return self.native.open_video(data, limits);
        };
        let video: SyntheticVideo = serde_json::from_slice(json)?;
        if video.width == 0 || video.height == 0 || video.fps == 0 {
            return Err(StoryreelError::invalid_input("synthetic clip has zero size"));
        }
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        let mut clip = SyntheticVideoClip::new(video).with_seek_stall(self.seek_delay, limits.seek);
        clip.gauge = self.clip_frames.clone();
        Ok(Box::new(clip))
    }
}

/// Generated clip whose red channel encodes the source frame index.
///
/// Like a real decoder it holds no pixels until the first frame is asked
/// for, and gives them back on close.
pub struct SyntheticVideoClip {
    video: SyntheticVideo,
    frame: Option<RgbaImage>,
    current: Option<u64>,
    seeks: u64,
    seek_delay: Duration,
    seek_limit: Duration,
    gauge: FrameGauge,
}

impl SyntheticVideoClip {
    pub fn new(video: SyntheticVideo) -> Self {
        Self {
            video,
            frame: None,
            current: None,
            seeks: 0,
            seek_delay: Duration::ZERO,
            seek_limit: DecodeLimits::default().seek,
            gauge: FrameGauge::default(),
        }
    }

    /// Stall each frame change for `delay`, giving up after `limit`.
    pub fn with_seek_stall(mut self, delay: Duration, limit: Duration) -> Self {
        self.seek_delay = delay;
        self.seek_limit = limit;
        self
    }

    /// Frame index shown at `secs`.
    pub fn index_at(&self, secs: f64) -> u64 {
        let last = ((self.video.duration_secs * self.video.fps as f64).ceil() as u64).max(1) - 1;
        ((secs * self.video.fps as f64).floor().max(0.0) as u64).min(last)
    }

    /// Number of frame changes performed so far.
    pub fn seeks(&self) -> u64 {
        self.seeks
    }
}

impl VideoClip for SyntheticVideoClip {
    fn duration_secs(&self) -> f64 {
        self.video.duration_secs
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.video.width, self.video.height)
    }

    fn frame_at(&mut self, source_secs: f64) -> StoryreelResult<&RgbaImage> {
        if !source_secs.is_finite()
            || source_secs < 0.0
            || source_secs > self.video.duration_secs + 1e-6
        {
            return Err(StoryreelError::invalid_input(format!(
                "seek to {source_secs:.3}s outside clip of {:.3}s",
                self.video.duration_secs
            )));
        }
        let index = self.index_at(source_secs);
        if self.current != Some(index) {
            if !self.seek_delay.is_zero() {
                if self.seek_delay > self.seek_limit {
                    std::thread::sleep(self.seek_limit);
                    return Err(StoryreelError::timeout(
                        format!("seeking to {source_secs:.3}s"),
                        self.seek_limit,
                    ));
                }
                std::thread::sleep(self.seek_delay);
            }
            if self.frame.is_none() {
                self.gauge.acquire();
                self.frame = Some(RgbaImage::new(self.video.width, self.video.height));
            }
            let color = Rgba([(index % 256) as u8, 128, 64, 255]);
            if let Some(frame) = self.frame.as_mut() {
                for pixel in frame.pixels_mut() {
                    *pixel = color;
                }
            }
            self.current = Some(index);
            self.seeks += 1;
        }
        self.frame
            .as_ref()
            .ok_or_else(|| StoryreelError::invalid_input("synthetic clip has no frame"))
    }

    fn close(&mut self) {
        if self.frame.take().is_some() {
            self.gauge.release();
        }
        self.current = None;
    }
}

impl Drop for SyntheticVideoClip {
    fn drop(&mut self) {
        VideoClip::close(self);
    }
}

/// Synthetic encoders and probe with the descriptor-aware decoder.
pub fn synthetic_backend(options: SyntheticOptions) -> MediaBackend {
    MediaBackend {
        encoders: Arc::new(SyntheticEncoderFactory::new(options.clone())),
        decoder: Arc::new(SyntheticDecoder::new()),
        probe: Arc::new(SyntheticProbe::new(options)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::encoder_channel;
    use storyreel_project_model::Resolution;

    fn video_config() -> VideoCodecConfig {
        VideoCodecConfig::h264(H264Profile::Baseline, Resolution::new(64, 36), 30)
    }

    #[test]
    fn test_latency_holds_chunks_until_flush() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            latency_frames: 3,
            ..SyntheticOptions::default()
        });
        let (tx, mut rx) = encoder_channel();
        let mut encoder = factory.create_video_encoder(&video_config(), tx).unwrap();
        let pixels = RgbaImage::new(64, 36);
        for i in 0..5 {
            let frame = VideoFrame {
                pixels: &pixels,
                timestamp_us: i * 33_333,
                duration_us: 33_333,
            };
            encoder.encode(&frame, i == 0).unwrap();
        }
        assert_eq!(encoder.queue_depth(), 3);
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);

        encoder.flush().unwrap();
        assert_eq!(encoder.queue_depth(), 0);
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 5);
    }

    #[test]
    fn test_first_chunk_carries_decoder_config() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        let (tx, mut rx) = encoder_channel();
        let mut encoder = factory.create_video_encoder(&video_config(), tx).unwrap();
        let pixels = RgbaImage::new(64, 36);
        for i in 0..2 {
            let frame = VideoFrame {
                pixels: &pixels,
                timestamp_us: i * 33_333,
                duration_us: 33_333,
            };
            encoder.encode(&frame, false).unwrap();
        }
        let Ok(EncoderEvent::Chunk(first)) = rx.try_recv() else {
            panic!("expected chunk");
        };
        let Ok(EncoderEvent::Chunk(second)) = rx.try_recv() else {
            panic!("expected chunk");
        };
        assert!(first.keyframe);
        assert_eq!(first.decoder_config.as_ref().unwrap()[1], 66);
        assert!(!second.keyframe);
        assert!(second.decoder_config.is_none());
    }

    #[test]
    fn test_rejects_non_increasing_timestamps() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        let (tx, _rx) = encoder_channel();
        let mut encoder = factory.create_video_encoder(&video_config(), tx).unwrap();
        let pixels = RgbaImage::new(64, 36);
        let frame = VideoFrame {
            pixels: &pixels,
            timestamp_us: 1_000,
            duration_us: 33_333,
        };
        encoder.encode(&frame, true).unwrap();
        assert!(encoder.encode(&frame, false).is_err());
    }

    #[test]
    fn test_clip_descriptor_roundtrip() {
        let bytes = synthetic_video_bytes(SyntheticVideo {
            width: 32,
            height: 18,
            duration_secs: 2.0,
            fps: 10,
        });
        let decoder = SyntheticDecoder::new();
        let mut clip = decoder.open_video(bytes, DecodeLimits::default()).unwrap();
        assert_eq!(clip.dimensions(), (32, 18));
        assert_eq!(clip.frame_at(0.55).unwrap().get_pixel(0, 0)[0], 5);
        assert_eq!(clip.frame_at(2.0).unwrap().get_pixel(0, 0)[0], 19);
        assert!(clip.frame_at(2.5).is_err());
    }

    #[test]
    fn test_clip_only_repaints_on_frame_change() {
        let mut clip = SyntheticVideoClip::new(SyntheticVideo {
            width: 8,
            height: 8,
            duration_secs: 1.0,
            fps: 4,
        });
        for secs in [0.0, 0.1, 0.2, 0.26, 0.3, 0.99] {
            clip.frame_at(secs).unwrap();
        }
        assert_eq!(clip.index_at(0.99), 3);
        assert_eq!(clip.seeks(), 3);
    }

    #[test]
    fn test_stalled_seek_is_bounded() {
        let mut clip = SyntheticVideoClip::new(SyntheticVideo {
            width: 8,
            height: 8,
            duration_secs: 1.0,
            fps: 4,
        })
        .with_seek_stall(Duration::from_millis(200), Duration::from_millis(10));

        let started = std::time::Instant::now();
        let err = clip.frame_at(0.5).unwrap_err();
        assert!(matches!(err, StoryreelError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(clip.seeks(), 0);
    }

    #[test]
    fn test_wav_helper_decodes_to_expected_length() {
        let wav = wav_bytes(0.5, 16_000, 1, 440.0).unwrap();
        let audio = SyntheticDecoder::new().decode_audio(&wav).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.frames(), 8_000);
    }
}
