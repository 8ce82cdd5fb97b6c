//! Pure-Rust backend: image and WAV decoding only.
//!
//! There is no H.264 encoder in this backend, so the probe reports
//! `video_encoding: false` and negotiation fails with a capability error.
//! Builds that need real encoding enable the `gst` feature.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbaImage;
use storyreel_common::error::{StoryreelError, StoryreelResult};
use storyreel_platform_core::{CapabilityProbe, HostResources, RuntimeCapabilities};

use super::{
    AudioEncoder, DecodeLimits, DecodedAudio, EncoderFactory, EncoderOutput, MediaBackend,
    MediaDecoder, VideoClip, VideoEncoder,
};
use crate::codec::{AudioCodecConfig, VideoCodecConfig};

/// Decodes PNG/JPEG/WebP stills and PCM WAV narration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDecoder;

impl MediaDecoder for NativeDecoder {
    fn name(&self) -> &str {
        "native"
    }

    fn decode_image(&self, data: &[u8]) -> StoryreelResult<RgbaImage> {
        let image = image::load_from_memory(data)
            .map_err(|e| StoryreelError::invalid_input(format!("Image decode failed: {e}")))?;
        Ok(image.to_rgba8())
    }

    fn decode_audio(&self, data: &[u8]) -> StoryreelResult<DecodedAudio> {
        decode_wav(data)
    }

    fn open_video(&self, _data: Bytes, _limits: DecodeLimits) -> StoryreelResult<Box<dyn VideoClip>> {
        Err(StoryreelError::unsupported(
            "Video clips require the GStreamer backend (build with --features gst)",
        ))
    }
}

/// Decode a RIFF/WAVE file into planar `f32` samples in `[-1, 1]`.
pub fn decode_wav(data: &[u8]) -> StoryreelResult<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(data)).map_err(|e| {
        StoryreelError::unsupported(format!(
            "Audio is not PCM WAV ({e}); compressed audio requires the GStreamer backend"
        ))
    })?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(StoryreelError::invalid_input("WAV header has zero channels or rate"));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(wav_error)?
        }
    };

    let channel_count = spec.channels as usize;
    let frames = interleaved.len() / channel_count;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    tracing::debug!(
        sample_rate = spec.sample_rate,
        channels = channel_count,
        frames,
        "Decoded WAV"
    );

    Ok(DecodedAudio {
        sample_rate: spec.sample_rate,
        channels,
    })
}

fn wav_error(e: hound::Error) -> StoryreelError {
    StoryreelError::invalid_input(format!("WAV decode failed: {e}"))
}

/// Factory for a runtime without encoders.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEncoders;

impl EncoderFactory for UnavailableEncoders {
    fn name(&self) -> &str {
        "native"
    }

    fn is_video_config_supported(&self, _config: &VideoCodecConfig) -> StoryreelResult<bool> {
        Ok(false)
    }

    fn is_audio_config_supported(&self, _config: &AudioCodecConfig) -> StoryreelResult<bool> {
        Ok(false)
    }

    fn create_video_encoder(
        &self,
        config: &VideoCodecConfig,
        _output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn VideoEncoder>> {
        Err(StoryreelError::capability(format!(
            "No encoder available for {}",
            config.codec
        )))
    }

    fn create_audio_encoder(
        &self,
        config: &AudioCodecConfig,
        _output: EncoderOutput,
    ) -> StoryreelResult<Box<dyn AudioEncoder>> {
        Err(StoryreelError::capability(format!(
            "No encoder available for {}",
            config.codec
        )))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProbe;

impl CapabilityProbe for NativeProbe {
    fn probe(&self) -> RuntimeCapabilities {
        let host = HostResources::detect();
        RuntimeCapabilities {
            backend: "native".to_string(),
            video_encoding: false,
            audio_encoding: false,
            config_query: true,
            video_decoding: false,
            compressed_audio_decoding: false,
            device_class: host.device_class(),
            cpu_count: host.cpu_count,
            memory_bytes: host.memory_bytes,
        }
    }

    fn name(&self) -> &str {
        "native"
    }
}

pub fn native_backend() -> MediaBackend {
    MediaBackend {
        encoders: Arc::new(UnavailableEncoders),
        decoder: Arc::new(NativeDecoder),
        probe: Arc::new(NativeProbe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::synthetic::{png_bytes, wav_bytes};

    #[test]
    fn test_decode_png() {
        let png = png_bytes(4, 3, [10, 20, 30, 255]).unwrap();
        let image = NativeDecoder.decode_image(&png).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_image_fails() {
        assert!(NativeDecoder.decode_image(b"not an image").is_err());
    }

    #[test]
    fn test_decode_wav_planar() {
        let wav = wav_bytes(0.25, 8_000, 2, 220.0).unwrap();
        let audio = decode_wav(&wav).unwrap();
        assert_eq!(audio.channel_count(), 2);
        assert_eq!(audio.frames(), 2_000);
        assert!(audio.channels[0].iter().all(|s| s.abs() <= 1.0));
        assert_eq!(audio.channels[0], audio.channels[1]);
    }

    #[test]
    fn test_compressed_audio_is_unsupported() {
        let err = decode_wav(b"ID3\x04\x00 mp3 data").unwrap_err();
        assert!(matches!(err, StoryreelError::Unsupported { .. }));
    }

    #[test]
    fn test_native_backend_cannot_encode() {
        let caps = native_backend().probe.probe();
        assert!(!caps.video_encoding);
        assert!(caps.missing_requirement().is_some());
    }
}
