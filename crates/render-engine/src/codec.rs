//! Codec negotiation.
//!
//! Video and audio configurations are chosen once per export from fixed,
//! most-compatible-first candidate lists and never renegotiated. The chosen
//! [`AudioCodecConfig`] is the single source of the sample rate and channel
//! count used by the encoder, the offline renderer, chunk timestamps and the
//! container's audio track.

use serde::Serialize;
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_platform_core::RuntimeCapabilities;
use storyreel_project_model::Resolution;

use crate::backend::{encoder_channel, EncoderFactory};

/// H.264 profile, in decreasing order of player compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    /// Constrained Baseline.
    Baseline,
    Main,
    High,
}

impl H264Profile {
    pub const ALL: [H264Profile; 3] = [H264Profile::Baseline, H264Profile::Main, H264Profile::High];

    pub fn profile_idc(self) -> u8 {
        match self {
            H264Profile::Baseline => 66,
            H264Profile::Main => 77,
            H264Profile::High => 100,
        }
    }

    /// `constraint_set` flags byte of the codec string.
    pub fn constraint_flags(self) -> u8 {
        match self {
            H264Profile::Baseline => 0xE0,
            H264Profile::Main => 0x40,
            H264Profile::High => 0x00,
        }
    }

    /// Profile name as GStreamer caps spell it.
    pub fn caps_name(self) -> &'static str {
        match self {
            H264Profile::Baseline => "constrained-baseline",
            H264Profile::Main => "main",
            H264Profile::High => "high",
        }
    }
}

/// H.264 levels: (level_idc, max frame size in macroblocks, max macroblocks/s).
const H264_LEVELS: [(u8, u32, u32); 9] = [
    (30, 1_620, 40_500),
    (31, 3_600, 108_000),
    (32, 5_120, 216_000),
    (40, 8_192, 245_760),
    (41, 8_192, 245_760),
    (42, 8_704, 522_240),
    (50, 22_080, 589_824),
    (51, 36_864, 983_040),
    (52, 36_864, 2_073_600),
];

/// Lowest level that fits `width × height` at `fps`.
pub fn h264_level_for(width: u32, height: u32, fps: u32) -> u8 {
    let mbs = width.div_ceil(16) * height.div_ceil(16);
    let mbps = mbs as u64 * fps as u64;
    H264_LEVELS
        .iter()
        .find(|(_, max_fs, max_mbps)| mbs <= *max_fs && mbps <= *max_mbps as u64)
        .map(|(idc, _, _)| *idc)
        .unwrap_or(52)
}

/// Resolved video encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoCodecConfig {
    /// RFC 6381 codec string, e.g. `avc1.42E028`.
    pub codec: String,
    pub profile: H264Profile,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    /// Maximum distance between keyframes, in frames.
    pub keyframe_interval: u32,
}

impl VideoCodecConfig {
    pub fn h264(profile: H264Profile, resolution: Resolution, fps: u32) -> Self {
        let level_idc = h264_level_for(resolution.width, resolution.height, fps);
        Self {
            codec: format!(
                "avc1.{:02X}{:02X}{:02X}",
                profile.profile_idc(),
                profile.constraint_flags(),
                level_idc
            ),
            profile,
            level_idc,
            width: resolution.width,
            height: resolution.height,
            fps,
            bitrate_bps: default_video_bitrate(resolution, fps),
            keyframe_interval: fps.saturating_mul(2).max(2),
        }
    }
}

/// Roughly 0.1 bits per pixel, clamped to a sane streaming range.
fn default_video_bitrate(resolution: Resolution, fps: u32) -> u32 {
    let bits = resolution.pixel_count() as f64 * fps as f64 * 0.1;
    bits.clamp(1_000_000.0, 20_000_000.0) as u32
}

/// Resolved audio encoder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioCodecConfig {
    /// RFC 6381 codec string, `mp4a.40.2` for AAC-LC.
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u32,
}

impl AudioCodecConfig {
    pub fn aac_lc(sample_rate: u32, channels: u16) -> Self {
        Self {
            codec: "mp4a.40.2".to_string(),
            sample_rate,
            channels,
            bitrate_bps: 128_000,
        }
    }
}

/// Video candidates, most broadly compatible first.
pub fn video_candidates(resolution: Resolution, fps: u32) -> Vec<VideoCodecConfig> {
    H264Profile::ALL
        .iter()
        .map(|profile| VideoCodecConfig::h264(*profile, resolution, fps))
        .collect()
}

/// Audio candidates, preferred first.
pub fn audio_candidates() -> Vec<AudioCodecConfig> {
    vec![
        AudioCodecConfig::aac_lc(48_000, 2),
        AudioCodecConfig::aac_lc(44_100, 2),
    ]
}

/// Warning surfaced when audio had to be dropped.
pub const SILENT_EXPORT_WARNING: &str =
    "Audio encoding is not supported on this device; the video was exported without sound";

/// Outcome of negotiation for one export run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegotiatedCodecs {
    pub video: VideoCodecConfig,
    pub audio: Option<AudioCodecConfig>,
    pub warning: Option<String>,
}

/// Picks encoder configurations against one set of runtime capabilities.
pub struct CodecNegotiator<'a> {
    factory: &'a dyn EncoderFactory,
    caps: &'a RuntimeCapabilities,
}

impl<'a> CodecNegotiator<'a> {
    pub fn new(factory: &'a dyn EncoderFactory, caps: &'a RuntimeCapabilities) -> Self {
        Self { factory, caps }
    }

    /// Choose a video configuration (required) and, when `wants_audio`, an
    /// audio configuration (best effort).
    pub fn negotiate(
        &self,
        resolution: Resolution,
        fps: u32,
        wants_audio: bool,
    ) -> StoryreelResult<NegotiatedCodecs> {
        let video = self.negotiate_video(resolution, fps)?;
        let (audio, warning) = if wants_audio {
            match self.negotiate_audio() {
                Some(audio) => (Some(audio), None),
                None => {
                    tracing::warn!(backend = self.factory.name(), "No supported audio configuration");
                    (None, Some(SILENT_EXPORT_WARNING.to_string()))
                }
            }
        } else {
            (None, None)
        };

        tracing::info!(
            video = %video.codec,
            width = video.width,
            height = video.height,
            audio = audio.as_ref().map(|a| a.codec.as_str()).unwrap_or("none"),
            sample_rate = audio.as_ref().map(|a| a.sample_rate).unwrap_or(0),
            "Negotiated codecs"
        );

        Ok(NegotiatedCodecs {
            video,
            audio,
            warning,
        })
    }

    fn negotiate_video(&self, resolution: Resolution, fps: u32) -> StoryreelResult<VideoCodecConfig> {
        if let Some(reason) = self.caps.missing_requirement() {
            return Err(StoryreelError::capability(reason));
        }

        for candidate in video_candidates(resolution, fps) {
            let supported = if self.caps.config_query {
                self.query(
                    &candidate.codec,
                    self.factory.is_video_config_supported(&candidate),
                )
            } else {
                self.try_video(&candidate)
            };
            if supported {
                return Ok(candidate);
            }
        }

        Err(StoryreelError::capability(format!(
            "No H.264 profile is supported at {resolution} {fps} fps by the '{}' backend",
            self.factory.name()
        )))
    }

    fn negotiate_audio(&self) -> Option<AudioCodecConfig> {
        if !self.caps.audio_encoding {
            return None;
        }
        audio_candidates().into_iter().find(|candidate| {
            if self.caps.config_query {
                self.query(
                    &candidate.codec,
                    self.factory.is_audio_config_supported(candidate),
                )
            } else {
                self.try_audio(candidate)
            }
        })
    }

    fn query(&self, codec: &str, answer: StoryreelResult<bool>) -> bool {
        match answer {
            Ok(supported) => {
                tracing::debug!(codec, supported, "Config query");
                supported
            }
            Err(e) => {
                tracing::debug!(codec, error = %e, "Config query failed; treating as unsupported");
                false
            }
        }
    }

    /// Configure a throwaway encoder; a configuration error means "try next".
    fn try_video(&self, candidate: &VideoCodecConfig) -> bool {
        let (tx, _rx) = encoder_channel();
        match self.factory.create_video_encoder(candidate, tx) {
            Ok(mut encoder) => {
                encoder.close();
                true
            }
            Err(e) => {
                tracing::debug!(codec = %candidate.codec, error = %e, "Trial configure failed");
                false
            }
        }
    }

    fn try_audio(&self, candidate: &AudioCodecConfig) -> bool {
        let (tx, _rx) = encoder_channel();
        match self.factory.create_audio_encoder(candidate, tx) {
            Ok(mut encoder) => {
                encoder.close();
                true
            }
            Err(e) => {
                tracing::debug!(
                    codec = %candidate.codec,
                    sample_rate = candidate.sample_rate,
                    error = %e,
                    "Trial configure failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{SyntheticEncoderFactory, SyntheticOptions};
    use storyreel_project_model::DeviceClass;

    fn caps(query: bool, audio: bool) -> RuntimeCapabilities {
        RuntimeCapabilities {
            backend: "synthetic".to_string(),
            video_encoding: true,
            audio_encoding: audio,
            config_query: query,
            video_decoding: true,
            compressed_audio_decoding: false,
            device_class: DeviceClass::Desktop,
            cpu_count: 8,
            memory_bytes: None,
        }
    }

    const HD: Resolution = Resolution::new(1920, 1080);

    #[test]
    fn test_codec_strings() {
        let candidates = video_candidates(HD, 30);
        let codecs: Vec<&str> = candidates.iter().map(|c| c.codec.as_str()).collect();
        assert_eq!(codecs, vec!["avc1.42E028", "avc1.4D4028", "avc1.640028"]);
        assert_eq!(candidates[0].keyframe_interval, 60);
    }

    #[test]
    fn test_levels() {
        assert_eq!(h264_level_for(1280, 720, 30), 31);
        assert_eq!(h264_level_for(1920, 1080, 30), 40);
        assert_eq!(h264_level_for(1080, 1920, 30), 40);
        assert_eq!(h264_level_for(1920, 1080, 60), 42);
        assert_eq!(h264_level_for(7680, 4320, 60), 52);
    }

    #[test]
    fn test_query_path_picks_first_supported() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            video_profiles: vec![H264Profile::Main, H264Profile::High],
            ..SyntheticOptions::default()
        });
        let caps = caps(true, true);
        let negotiated = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, true)
            .unwrap();
        assert_eq!(negotiated.video.profile, H264Profile::Main);
        assert_eq!(negotiated.audio.unwrap().sample_rate, 48_000);
        assert!(negotiated.warning.is_none());
        assert_eq!(factory.log().video_encoders_created, 0);
    }

    #[test]
    fn test_trial_path_without_query_function() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            config_query: false,
            video_profiles: vec![H264Profile::High],
            audio_sample_rates: vec![44_100],
            ..SyntheticOptions::default()
        });
        let caps = caps(false, true);
        let negotiated = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, true)
            .unwrap();
        assert_eq!(negotiated.video.profile, H264Profile::High);
        assert_eq!(negotiated.audio.unwrap().sample_rate, 44_100);

        let log = factory.log();
        // Baseline and Main rejected, High accepted and closed again.
        assert_eq!(log.configure_failures, 3);
        assert_eq!(log.video_encoders_created, 1);
        assert_eq!(log.encoders_closed, 2);
    }

    #[test]
    fn test_missing_audio_is_a_warning() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            audio_supported: false,
            ..SyntheticOptions::default()
        });
        let caps = caps(true, false);
        let negotiated = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, true)
            .unwrap();
        assert!(negotiated.audio.is_none());
        assert_eq!(negotiated.warning.as_deref(), Some(SILENT_EXPORT_WARNING));
    }

    #[test]
    fn test_no_warning_when_audio_not_requested() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            audio_supported: false,
            ..SyntheticOptions::default()
        });
        let caps = caps(true, false);
        let negotiated = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, false)
            .unwrap();
        assert!(negotiated.audio.is_none());
        assert!(negotiated.warning.is_none());
    }

    #[test]
    fn test_no_video_profile_is_capability_error() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions {
            video_profiles: vec![],
            ..SyntheticOptions::default()
        });
        let caps = caps(true, true);
        let err = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, true)
            .unwrap_err();
        assert!(matches!(err, StoryreelError::Capability { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_video_encoding_short_circuits() {
        let factory = SyntheticEncoderFactory::new(SyntheticOptions::default());
        let mut caps = caps(true, true);
        caps.video_encoding = false;
        let err = CodecNegotiator::new(&factory, &caps)
            .negotiate(HD, 30, true)
            .unwrap_err();
        assert!(matches!(err, StoryreelError::Capability { .. }));
    }
}
