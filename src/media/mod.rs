//! Media handling for transforms
//!
//! This module provides:
//! - H.264 NAL unit helpers (start codes, unit types)
//! - The container decoder seam used by the output pump
//! - An Annex-B decoder for raw H.264 transcoder output

pub mod annexb;
pub mod decoder;
pub mod h264;

pub use annexb::{AnnexBDecoder, AnnexBDecoderFactory};
pub use decoder::{ContainerDecoder, DecoderFactory};
pub use h264::{NaluType, VideoCodec, START_CODE};
