//! ISO BMFF box writing helpers.
//!
//! Boxes are written with a placeholder size that [`end_box`] patches once
//! the payload is complete.

use bytes::{BufMut, Bytes, BytesMut};

/// Identity transform matrix shared by `mvhd` and `tkhd`.
const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// AAC sampling frequency index table (ISO/IEC 14496-3).
const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Start a plain box, returning its offset for [`end_box`].
pub(crate) fn begin_box(buf: &mut BytesMut, fourcc: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(fourcc);
    start
}

/// Start a full box (version + 24-bit flags).
pub(crate) fn begin_full_box(buf: &mut BytesMut, fourcc: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = begin_box(buf, fourcc);
    buf.put_u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
    start
}

/// Patch the size of the box that began at `start`.
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

pub(crate) fn put_matrix(buf: &mut BytesMut) {
    for value in IDENTITY_MATRIX {
        buf.put_u32(value);
    }
}

/// `hdlr` with a null-terminated name.
pub(crate) fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &str) {
    let start = begin_full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler);
    buf.put_u32(0); // reserved
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
    end_box(buf, start);
}

/// `dinf` with a single self-contained `url ` entry.
pub(crate) fn write_dinf(buf: &mut BytesMut) {
    let dinf = begin_box(buf, b"dinf");
    let dref = begin_full_box(buf, b"dref", 0, 0);
    buf.put_u32(1); // entry count
    let url = begin_full_box(buf, b"url ", 0, 1); // flags: self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);
}

/// Two-byte AudioSpecificConfig for AAC-LC.
pub fn aac_audio_specific_config(sample_rate: u32, channels: u16) -> Bytes {
    let freq_index = AAC_SAMPLE_RATES
        .iter()
        .position(|rate| *rate == sample_rate)
        .unwrap_or(3) as u16;
    let object_type: u16 = 2; // AAC-LC
    let config = (object_type << 11) | (freq_index << 7) | ((channels & 0x0F) << 3);
    Bytes::copy_from_slice(&config.to_be_bytes())
}

/// `AVCDecoderConfigurationRecord` holding one SPS and one PPS.
pub fn avc_decoder_config(sps: &[u8], pps: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(1); // configurationVersion
    buf.put_u8(sps.get(1).copied().unwrap_or(66)); // profile_idc
    buf.put_u8(sps.get(2).copied().unwrap_or(0)); // constraint flags
    buf.put_u8(sps.get(3).copied().unwrap_or(30)); // level_idc
    buf.put_u8(0xFF); // 4-byte NAL lengths
    buf.put_u8(0xE1); // one SPS
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(1); // one PPS
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);
    buf.freeze()
}

/// `esds` wrapping an AudioSpecificConfig in MPEG-4 descriptors.
pub(crate) fn write_esds(buf: &mut BytesMut, audio_specific_config: &[u8], bitrate: u32) {
    let asc_len = audio_specific_config.len() as u8;
    let decoder_config_len = 13 + 2 + asc_len;
    let es_len = 3 + (2 + decoder_config_len) + 3;

    let start = begin_full_box(buf, b"esds", 0, 0);
    buf.put_u8(0x03); // ES_Descriptor
    buf.put_u8(es_len);
    buf.put_u16(0); // ES_ID
    buf.put_u8(0); // flags

    buf.put_u8(0x04); // DecoderConfigDescriptor
    buf.put_u8(decoder_config_len);
    buf.put_u8(0x40); // MPEG-4 audio
    buf.put_u8(0x15); // audio stream
    buf.put_slice(&[0, 0, 0]); // bufferSizeDB
    buf.put_u32(bitrate); // maxBitrate
    buf.put_u32(bitrate); // avgBitrate

    buf.put_u8(0x05); // DecoderSpecificInfo
    buf.put_u8(asc_len);
    buf.put_slice(audio_specific_config);

    buf.put_u8(0x06); // SLConfigDescriptor
    buf.put_u8(1);
    buf.put_u8(0x02);
    end_box(buf, start);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_size_is_patched() {
        let mut buf = BytesMut::new();
        let outer = begin_box(&mut buf, b"moov");
        let inner = begin_full_box(&mut buf, b"mvhd", 0, 0);
        buf.put_u32(7);
        end_box(&mut buf, inner);
        end_box(&mut buf, outer);
        assert_eq!(&buf[0..4], &24u32.to_be_bytes());
        assert_eq!(&buf[8..12], &16u32.to_be_bytes());
        assert_eq!(&buf[12..16], b"mvhd");
    }

    #[test]
    fn test_audio_specific_config() {
        assert_eq!(&aac_audio_specific_config(48_000, 2)[..], &[0x11, 0x90]);
        assert_eq!(&aac_audio_specific_config(44_100, 2)[..], &[0x12, 0x10]);
    }

    #[test]
    fn test_avc_decoder_config_layout() {
        let config = avc_decoder_config(&[0x67, 100, 0, 40, 0xAC], &[0x68, 0xEE]);
        assert_eq!(&config[..6], &[1, 100, 0, 40, 0xFF, 0xE1]);
        assert_eq!(&config[6..8], &5u16.to_be_bytes());
        assert_eq!(config.len(), 6 + 2 + 5 + 1 + 2 + 2);
    }

    #[test]
    fn test_esds_lengths_are_consistent() {
        let mut buf = BytesMut::new();
        write_esds(&mut buf, &[0x11, 0x90], 128_000);
        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(size, buf.len());
        // ES_Descriptor length covers the rest of the box.
        assert_eq!(buf[13] as usize, buf.len() - 14);
    }
}
