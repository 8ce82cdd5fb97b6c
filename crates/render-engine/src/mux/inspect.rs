//! Read back the structure of a finished MP4.
//!
//! Used by `storyreel inspect` and by tests to check what the muxer wrote.
//! Only the boxes this crate emits are understood.

use serde::Serialize;
use storyreel_common::error::{StoryreelError, StoryreelResult};

/// One parsed track.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackSummary {
    pub track_id: u32,
    /// `vide` or `soun`.
    pub handler: String,
    /// Sample entry type, `avc1` or `mp4a`.
    pub sample_entry: String,
    pub timescale: u32,
    /// Media duration in `timescale` ticks.
    pub duration: u64,
    pub sample_count: u32,
    /// Number of sync samples; `None` when there is no `stss` (all sync).
    pub sync_samples: Option<u32>,
    pub chunk_count: u32,
    /// `(sample_count, sample_delta)` runs from `stts`.
    pub time_to_sample: Vec<(u32, u32)>,
    /// `(first_chunk, samples_per_chunk)` runs from `stsc`.
    pub sample_to_chunk: Vec<(u32, u32)>,
    pub sample_sizes: Vec<u32>,
    pub chunk_offsets: Vec<u64>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// `profile_idc` from `avcC`.
    pub avc_profile: Option<u8>,
}

impl TrackSummary {
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration as f64 / self.timescale as f64
    }

    /// Sum of `stts` deltas, which must equal the media duration.
    pub fn stts_total(&self) -> u64 {
        self.time_to_sample
            .iter()
            .map(|(count, delta)| *count as u64 * *delta as u64)
            .sum()
    }

    /// Absolute file offset of every sample, resolved through `stsc`.
    pub fn sample_offsets(&self) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(self.sample_sizes.len());
        let mut sample = 0usize;
        for (chunk_index, chunk_offset) in self.chunk_offsets.iter().enumerate() {
            let chunk_number = chunk_index as u32 + 1;
            let per_chunk = self
                .sample_to_chunk
                .iter()
                .rev()
                .find(|(first, _)| *first <= chunk_number)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            let mut offset = *chunk_offset;
            for _ in 0..per_chunk {
                let Some(size) = self.sample_sizes.get(sample) else {
                    break;
                };
                offsets.push(offset);
                offset += *size as u64;
                sample += 1;
            }
        }
        offsets
    }
}

/// Structure of an MP4 file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Mp4Summary {
    pub major_brand: String,
    pub compatible_brands: Vec<String>,
    /// `moov` precedes `mdat` (progressive download friendly).
    pub moov_before_mdat: bool,
    /// Movie duration in `movie_timescale` ticks.
    pub movie_duration: u64,
    pub movie_timescale: u32,
    /// File range of the `mdat` payload.
    pub mdat_start: u64,
    pub mdat_end: u64,
    pub tracks: Vec<TrackSummary>,
}

impl Mp4Summary {
    pub fn video(&self) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.handler == "vide")
    }

    pub fn audio(&self) -> Option<&TrackSummary> {
        self.tracks.iter().find(|t| t.handler == "soun")
    }

    pub fn duration_secs(&self) -> f64 {
        if self.movie_timescale == 0 {
            return 0.0;
        }
        self.movie_duration as f64 / self.movie_timescale as f64
    }

    /// Every sample of every track lies inside the `mdat` payload.
    pub fn samples_within_mdat(&self) -> bool {
        self.tracks.iter().all(|track| {
            let offsets = track.sample_offsets();
            offsets.len() == track.sample_sizes.len()
                && offsets.iter().zip(&track.sample_sizes).all(|(offset, size)| {
                    *offset >= self.mdat_start && offset + *size as u64 <= self.mdat_end
                })
        })
    }
}

/// Box header: (fourcc, payload start, box end).
struct BoxHeader {
    fourcc: [u8; 4],
    payload: usize,
    end: usize,
}

fn be_u16(data: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(pos..pos + 2)?.try_into().ok()?))
}

fn be_u32(data: &[u8], pos: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(pos..pos + 4)?.try_into().ok()?))
}

fn be_u64(data: &[u8], pos: usize) -> Option<u64> {
    Some(u64::from_be_bytes(data.get(pos..pos + 8)?.try_into().ok()?))
}

fn malformed(what: &str) -> StoryreelError {
    StoryreelError::invalid_input(format!("malformed MP4: {what}"))
}

/// Iterate the boxes in `data[start..end]`.
fn children(data: &[u8], start: usize, end: usize) -> StoryreelResult<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut pos = start;
    while pos + 8 <= end {
        let size32 = be_u32(data, pos).ok_or_else(|| malformed("truncated box header"))?;
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(&data[pos + 4..pos + 8]);
        let (size, header) = match size32 {
            0 => ((end - pos) as u64, 8),
            1 => (
                be_u64(data, pos + 8).ok_or_else(|| malformed("truncated large size"))?,
                16,
            ),
            n => (n as u64, 8),
        };
        let box_end = pos
            .checked_add(size as usize)
            .filter(|e| *e <= end && size >= header as u64)
            .ok_or_else(|| {
                malformed(&format!(
                    "box {} overruns its parent",
                    String::from_utf8_lossy(&fourcc)
                ))
            })?;
        boxes.push(BoxHeader {
            fourcc,
            payload: pos + header,
            end: box_end,
        });
        pos = box_end;
    }
    Ok(boxes)
}

fn find<'a>(boxes: &'a [BoxHeader], fourcc: &[u8; 4]) -> Option<&'a BoxHeader> {
    boxes.iter().find(|b| &b.fourcc == fourcc)
}

/// Parse the top-level structure and sample tables of an MP4 file.
pub fn inspect_mp4(data: &[u8]) -> StoryreelResult<Mp4Summary> {
    let top = children(data, 0, data.len())?;
    let mut summary = Mp4Summary::default();

    let ftyp = find(&top, b"ftyp").ok_or_else(|| malformed("missing ftyp"))?;
    let brand = data
        .get(ftyp.payload..ftyp.payload + 4)
        .filter(|_| ftyp.payload + 8 <= ftyp.end)
        .ok_or_else(|| malformed("truncated ftyp"))?;
    summary.major_brand = String::from_utf8_lossy(brand).into_owned();
    let mut pos = ftyp.payload + 8;
    while pos + 4 <= ftyp.end {
        summary
            .compatible_brands
            .push(String::from_utf8_lossy(&data[pos..pos + 4]).into_owned());
        pos += 4;
    }

    let moov_index = top.iter().position(|b| &b.fourcc == b"moov");
    let mdat_index = top.iter().position(|b| &b.fourcc == b"mdat");
    let (Some(moov_index), Some(mdat_index)) = (moov_index, mdat_index) else {
        return Err(malformed("missing moov or mdat"));
    };
    summary.moov_before_mdat = moov_index < mdat_index;
    summary.mdat_start = top[mdat_index].payload as u64;
    summary.mdat_end = top[mdat_index].end as u64;

    let moov = &top[moov_index];
    let moov_children = children(data, moov.payload, moov.end)?;
    if let Some(mvhd) = find(&moov_children, b"mvhd") {
        let (timescale, duration) = read_timescale_duration(data, mvhd.payload)?;
        summary.movie_timescale = timescale;
        summary.movie_duration = duration;
    }

    for trak in moov_children.iter().filter(|b| &b.fourcc == b"trak") {
        summary.tracks.push(parse_trak(data, trak)?);
    }
    Ok(summary)
}

/// (timescale, duration) from an `mvhd` or `mdhd` payload.
fn read_timescale_duration(data: &[u8], payload: usize) -> StoryreelResult<(u32, u64)> {
    let version = *data.get(payload).ok_or_else(|| malformed("empty header box"))?;
    let parsed = if version == 1 {
        be_u32(data, payload + 20).zip(be_u64(data, payload + 24))
    } else {
        be_u32(data, payload + 12).zip(be_u32(data, payload + 16).map(u64::from))
    };
    parsed.ok_or_else(|| malformed("truncated header box"))
}

fn parse_trak(data: &[u8], trak: &BoxHeader) -> StoryreelResult<TrackSummary> {
    let mut track = TrackSummary::default();
    let boxes = children(data, trak.payload, trak.end)?;

    if let Some(tkhd) = find(&boxes, b"tkhd") {
        let version = data.get(tkhd.payload).copied().unwrap_or(0);
        let id_pos = if version == 1 { tkhd.payload + 20 } else { tkhd.payload + 12 };
        track.track_id = be_u32(data, id_pos).unwrap_or(0);
        track.width = be_u32(data, tkhd.end - 8).unwrap_or(0) >> 16;
        track.height = be_u32(data, tkhd.end - 4).unwrap_or(0) >> 16;
    }

    let mdia = find(&boxes, b"mdia").ok_or_else(|| malformed("trak without mdia"))?;
    let mdia_boxes = children(data, mdia.payload, mdia.end)?;
    if let Some(mdhd) = find(&mdia_boxes, b"mdhd") {
        let (timescale, duration) = read_timescale_duration(data, mdhd.payload)?;
        track.timescale = timescale;
        track.duration = duration;
    }
    if let Some(hdlr) = find(&mdia_boxes, b"hdlr") {
        if let Some(handler) = data.get(hdlr.payload + 8..hdlr.payload + 12) {
            track.handler = String::from_utf8_lossy(handler).into_owned();
        }
    }

    let minf = find(&mdia_boxes, b"minf").ok_or_else(|| malformed("mdia without minf"))?;
    let minf_boxes = children(data, minf.payload, minf.end)?;
    let stbl = find(&minf_boxes, b"stbl").ok_or_else(|| malformed("minf without stbl"))?;

    for table in children(data, stbl.payload, stbl.end)? {
        let p = table.payload;
        match &table.fourcc {
            b"stsd" => parse_sample_entry(data, &table, &mut track)?,
            b"stts" => track.time_to_sample = read_pairs(data, p, table.end),
            b"stsc" => {
                let count = be_u32(data, p + 4).unwrap_or(0) as usize;
                track.sample_to_chunk = (0..count)
                    .filter_map(|i| {
                        let at = p + 8 + i * 12;
                        be_u32(data, at).zip(be_u32(data, at + 4))
                    })
                    .collect();
            }
            b"stss" => track.sync_samples = be_u32(data, p + 4),
            b"stsz" => {
                let uniform = be_u32(data, p + 4).unwrap_or(0);
                track.sample_count = be_u32(data, p + 8).unwrap_or(0);
                track.sample_sizes = if uniform == 0 {
                    (0..track.sample_count as usize)
                        .filter_map(|i| be_u32(data, p + 12 + i * 4))
                        .collect()
                } else {
                    vec![uniform; track.sample_count as usize]
                };
            }
            b"stco" => {
                track.chunk_count = be_u32(data, p + 4).unwrap_or(0);
                track.chunk_offsets = (0..track.chunk_count as usize)
                    .filter_map(|i| be_u32(data, p + 8 + i * 4).map(u64::from))
                    .collect();
            }
            b"co64" => {
                track.chunk_count = be_u32(data, p + 4).unwrap_or(0);
                track.chunk_offsets = (0..track.chunk_count as usize)
                    .filter_map(|i| be_u64(data, p + 8 + i * 8))
                    .collect();
            }
            _ => {}
        }
    }
    Ok(track)
}

fn read_pairs(data: &[u8], payload: usize, end: usize) -> Vec<(u32, u32)> {
    let count = be_u32(data, payload + 4).unwrap_or(0) as usize;
    (0..count)
        .map(|i| payload + 8 + i * 8)
        .take_while(|at| at + 8 <= end)
        .filter_map(|at| be_u32(data, at).zip(be_u32(data, at + 4)))
        .collect()
}

fn parse_sample_entry(data: &[u8], stsd: &BoxHeader, track: &mut TrackSummary) -> StoryreelResult<()> {
    let entries = children(data, stsd.payload + 8, stsd.end)?;
    let Some(entry) = entries.first() else {
        return Ok(());
    };
    track.sample_entry = String::from_utf8_lossy(&entry.fourcc).into_owned();
    let p = entry.payload;
    match &entry.fourcc {
        b"avc1" => {
            for child in children(data, p + 78, entry.end)? {
                if &child.fourcc == b"avcC" {
                    track.avc_profile = data.get(child.payload + 1).copied();
                }
            }
        }
        b"mp4a" => {
            track.channels = be_u16(data, p + 16);
            track.sample_rate = be_u32(data, p + 24).map(|rate| rate >> 16);
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_mp4() {
        assert!(inspect_mp4(b"definitely not an mp4 file").is_err());
        assert!(inspect_mp4(&[]).is_err());
    }

    #[test]
    fn test_overrunning_box_is_malformed() {
        let mut data = Vec::new();
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(b"isom");
        assert!(inspect_mp4(&data).is_err());
    }
}
