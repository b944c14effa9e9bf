//! H.264/AVC byte-stream helpers
//!
//! The transcoder reads and writes H.264 in Annex-B form: every NAL unit is
//! preceded by a start code.
//!
//! ```text
//! +-------------+-----------+------------------+
//! | 00 00 00 01 | NAL header| payload ...      |
//! +-------------+-----------+------------------+
//!               |F|NRI| Type|
//!               |1| 2 |  5  |
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Four-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Video codec family of a source track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H264"),
            VideoCodec::H265 => write!(f, "H265"),
        }
    }
}

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice,
    /// Slice data partition A
    SlicePartA,
    /// IDR slice (keyframe)
    Idr,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    Aud,
    /// Any other type (partitions B/C, end of sequence, filler, extensions)
    Other(u8),
}

impl NaluType {
    /// Decode from the first byte of a NAL unit
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            2 => NaluType::SlicePartA,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }

    /// Video coding layer unit (carries picture data)
    pub fn is_vcl(&self) -> bool {
        matches!(self, NaluType::Slice | NaluType::SlicePartA | NaluType::Idr)
    }
}

/// Prefix a NAL unit with the 4-byte start code
pub fn with_start_code(nalu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(START_CODE.len() + nalu.len());
    buf.put_slice(&START_CODE);
    buf.put_slice(nalu);
    buf.freeze()
}

/// Whether a NAL unit has the forbidden-zero bit set
pub fn is_forbidden(nalu: &[u8]) -> bool {
    nalu.first().map(|b| b & 0x80 != 0).unwrap_or(false)
}

/// Whether a VCL NAL unit starts a new picture
///
/// `first_mb_in_slice` is the first ue(v) of the slice header; it is zero
/// exactly when the first bit after the NAL header is set.
pub fn starts_picture(nalu: &[u8]) -> bool {
    nalu.get(1).map(|b| b & 0x80 != 0).unwrap_or(false)
}
