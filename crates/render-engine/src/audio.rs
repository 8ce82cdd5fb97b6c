//! Audio renderer.
//!
//! Each scene's narration is rendered offline to the negotiated sample rate
//! and channel count, padded with silence to the scene length, and cut into
//! fixed-size chunks on one continuous sample counter. Scenes without
//! narration contribute silence so the audio track never has holes.

use storyreel_common::clock::micros_to_samples;
use storyreel_common::error::StoryreelResult;

use crate::backend::{AudioChunk, DecodedAudio};
use crate::codec::AudioCodecConfig;
use crate::encode::EncodePipeline;
use crate::export::CancelFlag;
use crate::timeline::ScenePlan;

/// Resamples and remaps decoded audio to the output format.
#[derive(Debug, Clone, Copy)]
pub struct OfflineAudioRenderer {
    sample_rate: u32,
    channels: u16,
}

impl OfflineAudioRenderer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Render exactly `frames` interleaved frames of `source`. Output past
    /// the end of the source is silence.
    pub fn render(&self, source: &DecodedAudio, frames: usize) -> Vec<f32> {
        let channels = self.channels as usize;
        let mut out = vec![0.0f32; frames * channels];
        let source_frames = source.frames();
        if source_frames == 0 || source.channel_count() == 0 || source.sample_rate == 0 {
            return out;
        }

        let step = source.sample_rate as f64 / self.sample_rate as f64;
        for frame in 0..frames {
            let position = frame as f64 * step;
            let index = position.floor() as usize;
            if index >= source_frames {
                break;
            }
            let frac = (position - index as f64) as f32;
            for channel in 0..channels {
                let value = self.mapped_sample(source, channel, index, frac);
                out[frame * channels + channel] = value.clamp(-1.0, 1.0);
            }
        }
        out
    }

    pub fn silence(&self, frames: usize) -> Vec<f32> {
        vec![0.0; frames * self.channels as usize]
    }

    /// Mono sources are duplicated, mono outputs average every source
    /// channel, otherwise channels map by index.
    fn mapped_sample(&self, source: &DecodedAudio, channel: usize, index: usize, frac: f32) -> f32 {
        let source_channels = source.channel_count();
        if self.channels == 1 && source_channels > 1 {
            let sum: f32 = source
                .channels
                .iter()
                .map(|samples| interpolate(samples, index, frac))
                .sum();
            return sum / source_channels as f32;
        }
        interpolate(&source.channels[channel % source_channels], index, frac)
    }
}

fn interpolate(samples: &[f32], index: usize, frac: f32) -> f32 {
    let a = samples.get(index).copied().unwrap_or(0.0);
    let b = samples.get(index + 1).copied().unwrap_or(a);
    a + (b - a) * frac
}

/// Cuts a continuous interleaved stream into equal chunks.
#[derive(Debug)]
pub struct AudioChunker {
    sample_rate: u32,
    channels: u16,
    chunk_frames: usize,
    pending: Vec<f32>,
    /// Sample index just past the end of `pending`.
    next_sample: u64,
}

impl AudioChunker {
    pub fn new(sample_rate: u32, channels: u16, chunk_frames: usize) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            chunk_frames: chunk_frames.max(1),
            pending: Vec::new(),
            next_sample: 0,
        }
    }

    /// Samples accepted so far, including the buffered tail.
    pub fn next_sample(&self) -> u64 {
        self.next_sample
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels as usize
    }

    /// Append `samples` starting at `start_sample`. A gap before it is filled
    /// with silence, an overlap with already accepted samples is dropped.
    pub fn push(&mut self, start_sample: u64, samples: &[f32]) -> Vec<AudioChunk> {
        let channels = self.channels as usize;
        let frames = samples.len() / channels;
        let mut skip = 0;
        if start_sample > self.next_sample {
            let gap = (start_sample - self.next_sample) as usize;
            self.pending.resize(self.pending.len() + gap * channels, 0.0);
            self.next_sample = start_sample;
        } else if start_sample < self.next_sample {
            skip = ((self.next_sample - start_sample) as usize).min(frames);
        }

        self.pending
            .extend_from_slice(&samples[skip * channels..frames * channels]);
        self.next_sample += (frames - skip) as u64;
        self.take_full_chunks()
    }

    /// Emit whatever is buffered as a final short chunk.
    pub fn finish(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let start_sample = self.next_sample - self.pending_frames() as u64;
        Some(AudioChunk {
            samples: std::mem::take(&mut self.pending),
            channels: self.channels,
            sample_rate: self.sample_rate,
            start_sample,
        })
    }

    fn take_full_chunks(&mut self) -> Vec<AudioChunk> {
        let chunk_len = self.chunk_frames * self.channels as usize;
        let mut chunks = Vec::new();
        while self.pending.len() >= chunk_len {
            let start_sample = self.next_sample - self.pending_frames() as u64;
            let rest = self.pending.split_off(chunk_len);
            let samples = std::mem::replace(&mut self.pending, rest);
            chunks.push(AudioChunk {
                samples,
                channels: self.channels,
                sample_rate: self.sample_rate,
                start_sample,
            });
        }
        chunks
    }
}

/// Feeds every scene's audio into the encode pipeline.
#[derive(Debug)]
pub struct AudioRenderer {
    offline: OfflineAudioRenderer,
    chunker: AudioChunker,
}

impl AudioRenderer {
    pub fn new(config: &AudioCodecConfig, chunk_frames: usize) -> Self {
        Self {
            offline: OfflineAudioRenderer::new(config.sample_rate, config.channels),
            chunker: AudioChunker::new(config.sample_rate, config.channels, chunk_frames),
        }
    }

    /// Sample span of a scene. Spans derive from the scene boundaries, so
    /// consecutive scenes tile the track without rounding gaps.
    pub fn scene_span(&self, plan: &ScenePlan) -> (u64, usize) {
        let rate = self.offline.sample_rate();
        let start = micros_to_samples(plan.offset_us, rate);
        let end = micros_to_samples(plan.end_us(), rate);
        (start, end.saturating_sub(start) as usize)
    }

    /// Render the scene's narration, or silence, and submit full chunks.
    /// Returns the number of sample frames rendered.
    pub fn render_scene(
        &mut self,
        plan: &ScenePlan,
        narration: Option<&DecodedAudio>,
        pipeline: &mut EncodePipeline,
        cancel: &CancelFlag,
    ) -> StoryreelResult<usize> {
        let (start, frames) = self.scene_span(plan);
        let samples = match narration {
            Some(audio) => self.offline.render(audio, frames),
            None => self.offline.silence(frames),
        };

        tracing::debug!(
            scene = plan.number,
            start_sample = start,
            frames,
            silent = narration.is_none(),
            "Rendering scene audio"
        );

        for chunk in self.chunker.push(start, &samples) {
            cancel.check()?;
            pipeline.submit_audio(&chunk)?;
        }
        Ok(frames)
    }

    /// Submit the buffered tail.
    pub fn finish(&mut self, pipeline: &mut EncodePipeline) -> StoryreelResult<()> {
        if let Some(chunk) = self.chunker.finish() {
            pipeline.submit_audio(&chunk)?;
        }
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.chunker.next_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, channels: usize, frames: usize, value: f32) -> DecodedAudio {
        DecodedAudio {
            sample_rate: rate,
            channels: vec![vec![value; frames]; channels],
        }
    }

    #[test]
    fn test_render_resamples_to_requested_length() {
        let renderer = OfflineAudioRenderer::new(48_000, 2);
        let source = tone(44_100, 1, 44_100, 0.5);
        let out = renderer.render(&source, 48_000);
        assert_eq!(out.len(), 96_000);
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[95_998] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_render_pads_with_silence() {
        let renderer = OfflineAudioRenderer::new(48_000, 1);
        let source = tone(48_000, 1, 100, 0.25);
        let out = renderer.render(&source, 200);
        assert_eq!(out.len(), 200);
        assert!((out[99] - 0.25).abs() < 1e-6);
        assert_eq!(out[150], 0.0);
    }

    #[test]
    fn test_stereo_folds_to_mono() {
        let renderer = OfflineAudioRenderer::new(48_000, 1);
        let source = DecodedAudio {
            sample_rate: 48_000,
            channels: vec![vec![1.0; 10], vec![0.0; 10]],
        };
        let out = renderer.render(&source, 10);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_chunker_keeps_one_counter_across_pushes() {
        let mut chunker = AudioChunker::new(48_000, 2, 1024);
        let first = chunker.push(0, &vec![0.1; 1500 * 2]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].start_sample, 0);

        let second = chunker.push(1500, &vec![0.2; 1000 * 2]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].start_sample, 1024);
        assert_eq!(second[0].frames(), 1024);

        let tail = chunker.finish().unwrap();
        assert_eq!(tail.start_sample, 2048);
        assert_eq!(tail.frames(), 452);
        assert_eq!(chunker.next_sample(), 2500);
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_chunker_fills_gaps_and_drops_overlap() {
        let mut chunker = AudioChunker::new(48_000, 1, 4);
        chunker.push(0, &[1.0, 1.0]);
        let chunks = chunker.push(3, &[2.0, 2.0]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples, vec![1.0, 1.0, 0.0, 2.0]);

        chunker.push(4, &[3.0, 3.0]);
        assert_eq!(chunker.next_sample(), 6);
        let tail = chunker.finish().unwrap();
        assert_eq!(tail.samples, vec![2.0, 3.0]);
        assert_eq!(tail.start_sample, 4);
    }
}
