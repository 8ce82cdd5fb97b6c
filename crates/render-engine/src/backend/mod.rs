//! Media backend seams.
//!
//! The export pipeline never talks to a codec library directly. Encoders,
//! decoders and the capability probe are trait objects supplied by a
//! [`MediaBackend`]:
//!
//! - [`native`]: pure-Rust image and WAV decoding, no encoders
//! - [`gst`]: GStreamer encoders and decoders (feature `gst`)
//! - [`synthetic`]: deterministic in-process stand-ins for tests and dry runs
//!
//! Encoders report output asynchronously through an [`EncoderOutput`]
//! channel; the encode pipeline drains it into the muxer.

pub mod native;
pub mod synthetic;

#[cfg(feature = "gst")]
pub mod gst;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::RgbaImage;
use storyreel_common::clock::samples_to_micros;
use storyreel_common::error::StoryreelResult;
use storyreel_platform_core::CapabilityProbe;
use tokio::sync::mpsc;

use crate::codec::{AudioCodecConfig, VideoCodecConfig};

/// Which output track a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// One compressed access unit produced by an encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub data: Bytes,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub keyframe: bool,
    /// `avcC` / AudioSpecificConfig bytes, carried by the first chunk.
    pub decoder_config: Option<Bytes>,
}

/// Message from an encoder to the pipeline.
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    Chunk(EncodedChunk),
    Error { track: TrackKind, message: String },
}

/// Sending half handed to encoders. Sends never block; the encode
/// pipeline bounds how much can be outstanding.
pub type EncoderOutput = mpsc::UnboundedSender<EncoderEvent>;

/// Receiving half owned by the encode pipeline.
pub type EncoderEvents = mpsc::UnboundedReceiver<EncoderEvent>;

pub fn encoder_channel() -> (EncoderOutput, EncoderEvents) {
    mpsc::unbounded_channel()
}

/// A raw RGBA frame ready for encoding.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub pixels: &'a RgbaImage,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

/// Interleaved PCM block positioned by a running sample counter.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved `f32` samples, `frames * channels` long.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    /// Index of the first frame in the whole output.
    pub start_sample: u64,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn timestamp_us(&self) -> i64 {
        samples_to_micros(self.start_sample, self.sample_rate)
    }

    /// Duration such that consecutive chunks tile the timeline exactly.
    pub fn duration_us(&self) -> i64 {
        samples_to_micros(self.start_sample + self.frames() as u64, self.sample_rate)
            - self.timestamp_us()
    }
}

/// Decoded PCM, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Bounded waits applied by decoders that block.
#[derive(Debug, Clone, Copy)]
pub struct DecodeLimits {
    pub metadata: Duration,
    pub seek: Duration,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(15),
            seek: Duration::from_secs(5),
        }
    }
}

/// H.264 encoder instance configured for one export.
pub trait VideoEncoder: Send {
    /// Queue a frame. Output arrives later on the encoder's channel.
    fn encode(&mut self, frame: &VideoFrame<'_>, keyframe: bool) -> StoryreelResult<()>;

    /// Frames accepted but not yet delivered as chunks.
    fn queue_depth(&self) -> usize;

    /// Give the encoder a chance to make progress and surface errors.
    fn poll(&mut self) -> StoryreelResult<()> {
        Ok(())
    }

    /// Emit every pending chunk. Blocks until the encoder is drained.
    fn flush(&mut self) -> StoryreelResult<()>;

    /// Release the encoder. Safe to call more than once.
    fn close(&mut self);
}

/// AAC encoder instance configured for one export.
pub trait AudioEncoder: Send {
    fn encode(&mut self, chunk: &AudioChunk) -> StoryreelResult<()>;

    fn queue_depth(&self) -> usize;

    fn poll(&mut self) -> StoryreelResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> StoryreelResult<()>;

    fn close(&mut self);
}

/// Creates encoders and answers configuration queries.
pub trait EncoderFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `config` can be encoded, without building an encoder.
    /// Only meaningful when the probe reported `config_query`.
    fn is_video_config_supported(&self, config: &VideoCodecConfig) -> StoryreelResult<bool>;

    fn is_audio_config_supported(&self, config: &AudioCodecConfig) -> StoryreelResult<bool>;

    /// Build a configured encoder. A configuration error means "unsupported".
    fn create_video_encoder(
        &self,
        config: &VideoCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn VideoEncoder>>;

    fn create_audio_encoder(
        &self,
        config: &AudioCodecConfig,
        output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn AudioEncoder>>;
}

/// Randomly seekable decoded video source.
pub trait VideoClip: Send {
    fn duration_secs(&self) -> f64;

    fn dimensions(&self) -> (u32, u32);

    /// Frame displayed at `source_secs` into the clip.
    fn frame_at(&mut self, source_secs: f64) -> StoryreelResult<&RgbaImage>;

    /// Release decoder resources.
    fn close(&mut self) {}
}

/// Shared decode context. Callers serialize decode calls.
pub trait MediaDecoder: Send + Sync {
    fn name(&self) -> &str;

    fn decode_image(&self, data: &[u8]) -> StoryreelResult<RgbaImage>;

    fn decode_audio(&self, data: &[u8]) -> StoryreelResult<DecodedAudio>;

    fn open_video(&self, data: Bytes, limits: DecodeLimits) -> StoryreelResult<Box<dyn VideoClip>>;
}

/// The set of backend services one export uses.
#[derive(Clone)]
pub struct MediaBackend {
    pub encoders: Arc<dyn EncoderFactory>,
    pub decoder: Arc<dyn MediaDecoder>,
    pub probe: Arc<dyn CapabilityProbe>,
}

impl MediaBackend {
    /// Best backend compiled into this build.
    pub fn system() -> StoryreelResult<Self> {
        #[cfg(feature = "gst")]
        {
            gst::gst_backend()
        }
        #[cfg(not(feature = "gst"))]
        {
            Ok(native::native_backend())
        }
    }

    /// Deterministic backend for dry runs and tests.
    pub fn synthetic(options: synthetic::SyntheticOptions) -> Self {
        synthetic::synthetic_backend(options)
    }
}

impl std::fmt::Debug for MediaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBackend")
            .field("encoders", &self.encoders.name())
            .field("decoder", &self.decoder.name())
            .field("probe", &self.probe.name())
            .finish()
    }
}
