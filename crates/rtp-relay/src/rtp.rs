//! Minimal RTP framing used by the ingest path
//!
//! The relay never parses payloads. It only needs to know that a datagram is
//! long enough to carry the fixed header and where the SSRC lives.

use crate::{Error, Result};

/// Size of the fixed RTP header (RFC 3550 §5.1), without CSRCs or extensions
pub const RTP_HEADER_SIZE: usize = 12;

/// Byte offset of the SSRC field in the fixed header
pub const SSRC_OFFSET: usize = 8;

/// True if the datagram can carry a fixed RTP header
pub fn has_rtp_header(packet: &[u8]) -> bool {
    packet.len() >= RTP_HEADER_SIZE
}

/// Read the SSRC of a packet
pub fn ssrc(packet: &[u8]) -> Result<u32> {
    if !has_rtp_header(packet) {
        return Err(Error::InvalidPacket(format!(
            "{} bytes is shorter than the RTP header",
            packet.len()
        )));
    }

    let mut field = [0u8; 4];
    field.copy_from_slice(&packet[SSRC_OFFSET..SSRC_OFFSET + 4]);
    Ok(u32::from_be_bytes(field))
}

/// Overwrite the SSRC of a packet in place
pub fn stamp_ssrc(packet: &mut [u8], ssrc: u32) -> Result<()> {
    if !has_rtp_header(packet) {
        return Err(Error::InvalidPacket(format!(
            "{} bytes is shorter than the RTP header",
            packet.len()
        )));
    }

    packet[SSRC_OFFSET..SSRC_OFFSET + 4].copy_from_slice(&ssrc.to_be_bytes());
    Ok(())
}
