//! In-memory MP4 muxer.
//!
//! Encoded chunks are appended in arrival order into one `mdat` payload.
//! [`Mp4Muxer::finalize`] writes a progressive (faststart) file:
//!
//! ```text
//! ftyp | moov (mvhd, trak video, [trak audio]) | mdat
//! ```
//!
//! Consecutive samples of one track form a chunk. Sample tables are
//! run-length encoded where the format allows it. Chunk offsets switch to
//! `co64` when the file would not fit 32-bit offsets.

mod boxes;
pub mod inspect;

pub use boxes::{aac_audio_specific_config, avc_decoder_config};
pub use inspect::{inspect_mp4, Mp4Summary, TrackSummary};

use bytes::{BufMut, Bytes, BytesMut};
use storyreel_common::clock::rescale_micros;
use storyreel_common::error::{StoryreelError, StoryreelResult};

use crate::backend::{EncodedChunk, TrackKind};
use crate::codec::{AudioCodecConfig, VideoCodecConfig};
use boxes::{begin_box, begin_full_box, end_box, put_matrix, write_dinf, write_esds, write_hdlr};

/// Video media timescale (ticks per second).
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Movie header timescale.
pub const MOVIE_TIMESCALE: u32 = 1_000;

const VIDEO_TRACK_ID: u32 = 1;
const AUDIO_TRACK_ID: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct Sample {
    /// Offset within the `mdat` payload.
    offset: u64,
    size: u32,
    timestamp_us: i64,
    duration_us: i64,
    keyframe: bool,
}

#[derive(Debug)]
struct Track {
    kind: TrackKind,
    timescale: u32,
    decoder_config: Option<Bytes>,
    samples: Vec<Sample>,
}

impl Track {
    fn new(kind: TrackKind, timescale: u32) -> Self {
        Self {
            kind,
            timescale,
            decoder_config: None,
            samples: Vec::new(),
        }
    }

    /// Per-sample durations in track ticks, derived from rescaled timestamps
    /// so rounding never accumulates.
    fn tick_durations(&self) -> Vec<u32> {
        let mut durations = Vec::with_capacity(self.samples.len());
        for (i, sample) in self.samples.iter().enumerate() {
            let start = rescale_micros(sample.timestamp_us, self.timescale);
            let end = match self.samples.get(i + 1) {
                Some(next) => rescale_micros(next.timestamp_us, self.timescale),
                None => rescale_micros(sample.timestamp_us + sample.duration_us, self.timescale),
            };
            durations.push(end.saturating_sub(start) as u32);
        }
        durations
    }

    /// Media duration in track ticks.
    fn duration_ticks(&self) -> u64 {
        let Some(first) = self.samples.first() else {
            return 0;
        };
        let Some(last) = self.samples.last() else {
            return 0;
        };
        rescale_micros(last.timestamp_us + last.duration_us, self.timescale)
            .saturating_sub(rescale_micros(first.timestamp_us, self.timescale))
    }

    fn end_us(&self) -> i64 {
        self.samples
            .last()
            .map(|s| s.timestamp_us + s.duration_us)
            .unwrap_or(0)
    }

    /// Runs of contiguous samples: (first sample index, sample count).
    fn chunks(&self) -> Vec<(usize, u32)> {
        let mut chunks: Vec<(usize, u32)> = Vec::new();
        let mut expected_offset = None;
        for (i, sample) in self.samples.iter().enumerate() {
            match chunks.last_mut() {
                Some((_, count)) if expected_offset == Some(sample.offset) => *count += 1,
                _ => chunks.push((i, 1)),
            }
            expected_offset = Some(sample.offset + sample.size as u64);
        }
        chunks
    }
}

/// Result of [`Mp4Muxer::finalize`].
#[derive(Debug, Clone)]
pub struct MuxedOutput {
    pub bytes: Bytes,
    pub video_samples: u32,
    pub audio_samples: u32,
    /// Longest track duration.
    pub duration_us: i64,
    pub has_audio: bool,
}

/// Collects encoded chunks and writes the finished container.
#[derive(Debug)]
pub struct Mp4Muxer {
    width: u32,
    height: u32,
    audio: Option<AudioCodecConfig>,
    video_track: Track,
    audio_track: Option<Track>,
    mdat: BytesMut,
}

impl Mp4Muxer {
    /// Create a muxer with a video track and, when `audio` is set, an audio
    /// track whose timescale is the negotiated sample rate.
    pub fn new(video: &VideoCodecConfig, audio: Option<&AudioCodecConfig>) -> Self {
        Self {
            width: video.width,
            height: video.height,
            audio: audio.cloned(),
            video_track: Track::new(TrackKind::Video, VIDEO_TIMESCALE),
            audio_track: audio.map(|a| Track::new(TrackKind::Audio, a.sample_rate)),
            mdat: BytesMut::with_capacity(1 << 20),
        }
    }

    /// Append one encoded chunk to its track.
    pub fn append(&mut self, chunk: &EncodedChunk) -> StoryreelResult<()> {
        let track = match chunk.track {
            TrackKind::Video => &mut self.video_track,
            TrackKind::Audio => self
                .audio_track
                .as_mut()
                .ok_or_else(|| StoryreelError::mux("audio chunk received without an audio track"))?,
        };

        if track.samples.is_empty() && track.kind == TrackKind::Video {
            if !chunk.keyframe {
                return Err(StoryreelError::mux("first video sample is not a keyframe"));
            }
            if chunk.decoder_config.is_none() {
                return Err(StoryreelError::mux(
                    "first video sample carries no decoder configuration",
                ));
            }
        }
        if let Some(last) = track.samples.last() {
            if chunk.timestamp_us <= last.timestamp_us {
                return Err(StoryreelError::mux(format!(
                    "{} timestamp {} does not follow {}",
                    track.kind, chunk.timestamp_us, last.timestamp_us
                )));
            }
        }
        if chunk.data.is_empty() {
            return Err(StoryreelError::mux(format!("empty {} sample", track.kind)));
        }
        if track.decoder_config.is_none() {
            track.decoder_config = chunk.decoder_config.clone();
        }

        track.samples.push(Sample {
            offset: self.mdat.len() as u64,
            size: chunk.data.len() as u32,
            timestamp_us: chunk.timestamp_us,
            duration_us: chunk.duration_us.max(0),
            keyframe: chunk.keyframe,
        });
        self.mdat.extend_from_slice(&chunk.data);
        Ok(())
    }

    /// Write the finished file.
    pub fn finalize(self) -> StoryreelResult<MuxedOutput> {
        if self.video_track.samples.is_empty() {
            return Err(StoryreelError::empty_output("no video samples were produced"));
        }

        let audio_track = match self.audio_track {
            Some(track) if track.samples.is_empty() || track.decoder_config.is_none() => {
                tracing::warn!(
                    samples = track.samples.len(),
                    "Audio track has no usable samples; writing video only"
                );
                None
            }
            other => other,
        };

        let layout = Layout {
            width: self.width,
            height: self.height,
            audio_bitrate: self.audio.as_ref().map_or(128_000, |a| a.bitrate_bps),
            audio_channels: self.audio.as_ref().map_or(2, |a| a.channels),
            video: &self.video_track,
            audio: audio_track.as_ref(),
        };

        let mut ftyp = BytesMut::with_capacity(32);
        write_ftyp(&mut ftyp);

        let payload_len = self.mdat.len() as u64;
        let large_mdat = payload_len + 8 > u32::MAX as u64;
        let mdat_header_len: u64 = if large_mdat { 16 } else { 8 };

        // Measure moov once to learn where the payload will start.
        let probe_len = layout.moov(0, true).len() as u64;
        let use_co64 = ftyp.len() as u64 + probe_len + mdat_header_len + payload_len
            > u32::MAX as u64;
        let moov_len = layout.moov(0, use_co64).len() as u64;
        let payload_start = ftyp.len() as u64 + moov_len + mdat_header_len;
        let moov = layout.moov(payload_start, use_co64);

        let mut out =
            BytesMut::with_capacity(ftyp.len() + moov.len() + mdat_header_len as usize + self.mdat.len());
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        if large_mdat {
            out.put_u32(1);
            out.put_slice(b"mdat");
            out.put_u64(payload_len + 16);
        } else {
            out.put_u32((payload_len + 8) as u32);
            out.put_slice(b"mdat");
        }
        out.extend_from_slice(&self.mdat);

        let duration_us = self
            .video_track
            .end_us()
            .max(audio_track.as_ref().map_or(0, Track::end_us));

        tracing::debug!(
            bytes = out.len(),
            video_samples = self.video_track.samples.len(),
            audio_samples = audio_track.as_ref().map_or(0, |t| t.samples.len()),
            co64 = use_co64,
            "MP4 finalized"
        );

        Ok(MuxedOutput {
            bytes: out.freeze(),
            video_samples: self.video_track.samples.len() as u32,
            audio_samples: audio_track.as_ref().map_or(0, |t| t.samples.len() as u32),
            duration_us,
            has_audio: audio_track.is_some(),
        })
    }
}

fn write_ftyp(buf: &mut BytesMut) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(b"isom"); // major brand
    buf.put_u32(0x200); // minor version
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        buf.put_slice(brand);
    }
    end_box(buf, start);
}

/// Everything needed to write `moov`.
struct Layout<'a> {
    width: u32,
    height: u32,
    audio_bitrate: u32,
    audio_channels: u16,
    video: &'a Track,
    audio: Option<&'a Track>,
}

impl Layout<'_> {
    fn movie_duration(&self) -> u64 {
        let end_us = self
            .video
            .end_us()
            .max(self.audio.map_or(0, Track::end_us));
        rescale_micros(end_us, MOVIE_TIMESCALE)
    }

    fn moov(&self, payload_start: u64, use_co64: bool) -> BytesMut {
        let mut buf = BytesMut::with_capacity(4096);
        let moov = begin_box(&mut buf, b"moov");
        self.write_mvhd(&mut buf);
        self.write_trak(&mut buf, self.video, VIDEO_TRACK_ID, payload_start, use_co64);
        if let Some(audio) = self.audio {
            self.write_trak(&mut buf, audio, AUDIO_TRACK_ID, payload_start, use_co64);
        }
        end_box(&mut buf, moov);
        buf
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        let duration = self.movie_duration();
        let version = u8::from(duration > u32::MAX as u64);
        let start = begin_full_box(buf, b"mvhd", version, 0);
        put_times(buf, version);
        buf.put_u32(MOVIE_TIMESCALE);
        put_duration(buf, version, duration);
        buf.put_u32(0x0001_0000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_u16(0); // reserved
        buf.put_u64(0); // reserved
        put_matrix(buf);
        for _ in 0..6 {
            buf.put_u32(0); // pre_defined
        }
        buf.put_u32(if self.audio.is_some() { 3 } else { 2 }); // next track ID
        end_box(buf, start);
    }

    fn write_trak(
        &self,
        buf: &mut BytesMut,
        track: &Track,
        track_id: u32,
        payload_start: u64,
        use_co64: bool,
    ) {
        let trak = begin_box(buf, b"trak");
        self.write_tkhd(buf, track, track_id);

        let mdia = begin_box(buf, b"mdia");
        write_mdhd(buf, track);
        match track.kind {
            TrackKind::Video => write_hdlr(buf, b"vide", "VideoHandler"),
            TrackKind::Audio => write_hdlr(buf, b"soun", "SoundHandler"),
        }

        let minf = begin_box(buf, b"minf");
        match track.kind {
            TrackKind::Video => {
                let vmhd = begin_full_box(buf, b"vmhd", 0, 1);
                buf.put_u16(0); // graphics mode
                buf.put_slice(&[0; 6]); // opcolor
                end_box(buf, vmhd);
            }
            TrackKind::Audio => {
                let smhd = begin_full_box(buf, b"smhd", 0, 0);
                buf.put_u16(0); // balance
                buf.put_u16(0); // reserved
                end_box(buf, smhd);
            }
        }
        write_dinf(buf);
        self.write_stbl(buf, track, payload_start, use_co64);
        end_box(buf, minf);
        end_box(buf, mdia);
        end_box(buf, trak);
    }

    fn write_tkhd(&self, buf: &mut BytesMut, track: &Track, track_id: u32) {
        let duration = rescale_micros(track.end_us(), MOVIE_TIMESCALE);
        let version = u8::from(duration > u32::MAX as u64);
        let start = begin_full_box(buf, b"tkhd", version, 7); // enabled, in movie, in preview
        put_times(buf, version);
        buf.put_u32(track_id);
        buf.put_u32(0); // reserved
        put_duration(buf, version, duration);
        buf.put_u64(0); // reserved
        buf.put_u16(0); // layer
        buf.put_u16(0); // alternate group
        buf.put_u16(if track.kind == TrackKind::Audio { 0x0100 } else { 0 });
        buf.put_u16(0); // reserved
        put_matrix(buf);
        if track.kind == TrackKind::Video {
            buf.put_u32(self.width << 16);
            buf.put_u32(self.height << 16);
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
        }
        end_box(buf, start);
    }

    fn write_stbl(&self, buf: &mut BytesMut, track: &Track, payload_start: u64, use_co64: bool) {
        let stbl = begin_box(buf, b"stbl");
        match track.kind {
            TrackKind::Video => self.write_avc1_stsd(buf, track),
            TrackKind::Audio => self.write_mp4a_stsd(buf, track),
        }
        write_stts(buf, &track.tick_durations());
        if track.kind == TrackKind::Video {
            write_stss(buf, track);
        }
        let chunks = track.chunks();
        write_stsc(buf, &chunks);
        write_stsz(buf, track);
        write_chunk_offsets(buf, track, &chunks, payload_start, use_co64);
        end_box(buf, stbl);
    }

    fn write_avc1_stsd(&self, buf: &mut BytesMut, track: &Track) {
        let stsd = begin_full_box(buf, b"stsd", 0, 0);
        buf.put_u32(1); // entry count

        let avc1 = begin_box(buf, b"avc1");
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(1); // data reference index
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_slice(&[0; 12]); // pre_defined
        buf.put_u16(self.width as u16);
        buf.put_u16(self.height as u16);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0); // reserved
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1); // pre_defined

        if let Some(avcc) = &track.decoder_config {
            let start = begin_box(buf, b"avcC");
            buf.put_slice(avcc);
            end_box(buf, start);
        }
        end_box(buf, avc1);
        end_box(buf, stsd);
    }

    fn write_mp4a_stsd(&self, buf: &mut BytesMut, track: &Track) {
        let stsd = begin_full_box(buf, b"stsd", 0, 0);
        buf.put_u32(1); // entry count

        let mp4a = begin_box(buf, b"mp4a");
        buf.put_slice(&[0; 6]); // reserved
        buf.put_u16(1); // data reference index
        buf.put_u64(0); // reserved
        buf.put_u16(self.audio_channels);
        buf.put_u16(16); // sample size
        buf.put_u16(0); // pre_defined
        buf.put_u16(0); // reserved
        buf.put_u32(track.timescale << 16);

        if let Some(asc) = &track.decoder_config {
            write_esds(buf, asc, self.audio_bitrate);
        }
        end_box(buf, mp4a);
        end_box(buf, stsd);
    }
}

fn put_times(buf: &mut BytesMut, version: u8) {
    if version == 1 {
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
    } else {
        buf.put_u32(0);
        buf.put_u32(0);
    }
}

fn put_duration(buf: &mut BytesMut, version: u8, duration: u64) {
    if version == 1 {
        buf.put_u64(duration);
    } else {
        buf.put_u32(duration as u32);
    }
}

fn write_mdhd(buf: &mut BytesMut, track: &Track) {
    let duration = track.duration_ticks();
    let version = u8::from(duration > u32::MAX as u64);
    let start = begin_full_box(buf, b"mdhd", version, 0);
    put_times(buf, version);
    buf.put_u32(track.timescale);
    put_duration(buf, version, duration);
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0); // pre_defined
    end_box(buf, start);
}

fn write_stts(buf: &mut BytesMut, durations: &[u32]) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for duration in durations {
        match runs.last_mut() {
            Some((count, delta)) if *delta == *duration => *count += 1,
            _ => runs.push((1, *duration)),
        }
    }
    let start = begin_full_box(buf, b"stts", 0, 0);
    buf.put_u32(runs.len() as u32);
    for (count, delta) in runs {
        buf.put_u32(count);
        buf.put_u32(delta);
    }
    end_box(buf, start);
}

fn write_stss(buf: &mut BytesMut, track: &Track) {
    let sync: Vec<u32> = track
        .samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.keyframe)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    let start = begin_full_box(buf, b"stss", 0, 0);
    buf.put_u32(sync.len() as u32);
    for number in sync {
        buf.put_u32(number);
    }
    end_box(buf, start);
}

fn write_stsc(buf: &mut BytesMut, chunks: &[(usize, u32)]) {
    // (first chunk, samples per chunk), emitted only when the count changes.
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for (i, (_, count)) in chunks.iter().enumerate() {
        if entries.last().map(|(_, c)| c) != Some(count) {
            entries.push((i as u32 + 1, *count));
        }
    }
    let start = begin_full_box(buf, b"stsc", 0, 0);
    buf.put_u32(entries.len() as u32);
    for (first_chunk, samples_per_chunk) in entries {
        buf.put_u32(first_chunk);
        buf.put_u32(samples_per_chunk);
        buf.put_u32(1); // sample description index
    }
    end_box(buf, start);
}

fn write_stsz(buf: &mut BytesMut, track: &Track) {
    let start = begin_full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0); // sizes vary
    buf.put_u32(track.samples.len() as u32);
    for sample in &track.samples {
        buf.put_u32(sample.size);
    }
    end_box(buf, start);
}

fn write_chunk_offsets(
    buf: &mut BytesMut,
    track: &Track,
    chunks: &[(usize, u32)],
    payload_start: u64,
    use_co64: bool,
) {
    let offsets = chunks
        .iter()
        .map(|(first, _)| payload_start + track.samples[*first].offset);
    if use_co64 {
        let start = begin_full_box(buf, b"co64", 0, 0);
        buf.put_u32(chunks.len() as u32);
        for offset in offsets {
            buf.put_u64(offset);
        }
        end_box(buf, start);
    } else {
        let start = begin_full_box(buf, b"stco", 0, 0);
        buf.put_u32(chunks.len() as u32);
        for offset in offsets {
            buf.put_u32(offset as u32);
        }
        end_box(buf, start);
    }
}
