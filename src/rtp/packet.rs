/// RTP packet handle stored by the stream buffer
///
/// Packets are shared between the receiver, the storage and whoever asks for
/// recovery data, so they travel as `Arc`s. Only the fields the storage and
/// the receiver look at are parsed out of the header.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Size of the fixed RTP header
pub const RTP_HEADER_LEN: usize = 12;

/// Shared, cheaply clonable packet handle
pub type PacketRef<P = RtpPacket> = Arc<P>;

/// Access to the timestamp that drives windowed eviction
pub trait ArrivalTime {
    /// Decoding timestamp if known, otherwise presentation timestamp.
    /// `None` when the packet carries neither.
    fn arrival_time(&self) -> Option<Duration>;
}

impl<T: ArrivalTime + ?Sized> ArrivalTime for Arc<T> {
    fn arrival_time(&self) -> Option<Duration> {
        (**self).arrival_time()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {0} bytes, need at least 12")]
    TooShort(usize),
    #[error("unsupported RTP version {0}")]
    UnsupportedVersion(u8),
    #[error("{what} runs past end of packet ({needed} > {len} bytes)")]
    Truncated {
        what: &'static str,
        needed: usize,
        len: usize,
    },
}

/// A received RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Bytes,
    /// Decoding timestamp
    pub dts: Option<Duration>,
    /// Presentation timestamp
    pub pts: Option<Duration>,
}

impl ArrivalTime for RtpPacket {
    fn arrival_time(&self) -> Option<Duration> {
        self.dts.or(self.pts)
    }
}

impl RtpPacket {
    pub fn new(payload_type: u8, sequence: u16, ssrc: u32, payload: Bytes) -> Self {
        Self {
            payload_type: payload_type & 0x7F,
            marker: false,
            sequence,
            timestamp: 0,
            ssrc,
            payload,
            dts: None,
            pts: None,
        }
    }

    pub fn with_dts(mut self, dts: Duration) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Parse a datagram, stamping it with `dts` as its decoding timestamp
    pub fn parse(data: &[u8], dts: Option<Duration>) -> Result<Self, PacketError> {
        if data.len() < RTP_HEADER_LEN {
            return Err(PacketError::TooShort(data.len()));
        }

        let version = (data[0] >> 6) & 0x03;
        if version != 2 {
            return Err(PacketError::UnsupportedVersion(version));
        }

        let has_padding = (data[0] & 0x20) != 0;
        let has_extension = (data[0] & 0x10) != 0;
        let cc = (data[0] & 0x0F) as usize;

        let mut offset = RTP_HEADER_LEN + cc * 4;
        if offset > data.len() {
            return Err(PacketError::Truncated {
                what: "CSRC list",
                needed: offset,
                len: data.len(),
            });
        }

        if has_extension {
            if offset + 4 > data.len() {
                return Err(PacketError::Truncated {
                    what: "extension header",
                    needed: offset + 4,
                    len: data.len(),
                });
            }
            let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
            if offset > data.len() {
                return Err(PacketError::Truncated {
                    what: "extension body",
                    needed: offset,
                    len: data.len(),
                });
            }
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(PacketError::Truncated {
                    what: "padding",
                    needed: offset + pad,
                    len: data.len(),
                });
            }
            end -= pad;
        }

        Ok(Self {
            payload_type: data[1] & 0x7F,
            marker: (data[1] & 0x80) != 0,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: Bytes::copy_from_slice(&data[offset..end]),
            dts,
            pts: None,
        })
    }

    /// Serialize with a minimal header (no CSRCs, no extension, no padding)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.put_u8(0x80);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let packet = [
            0x80, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x12, 0x34, 0x56, 0x78, 0xAA, 0xBB,
        ];
        let parsed = RtpPacket::parse(&packet, None).unwrap();
        assert_eq!(parsed.payload_type, 0);
        assert_eq!(parsed.sequence, 1);
        assert_eq!(parsed.timestamp, 16);
        assert_eq!(parsed.ssrc, 0x12345678);
        assert_eq!(&parsed.payload[..], &[0xAA, 0xBB]);
        assert!(!parsed.marker);
    }

    #[test]
    fn test_parse_marker_and_payload_type() {
        let mut packet = vec![0x80, 0xE4, 0x12, 0x34];
        packet.extend_from_slice(&[0u8; 8]);
        let parsed = RtpPacket::parse(&packet, None).unwrap();
        assert!(parsed.marker);
        assert_eq!(parsed.payload_type, 100);
        assert_eq!(parsed.sequence, 0x1234);
    }

    #[test]
    fn test_parse_too_short() {
        assert_eq!(RtpPacket::parse(&[0x80; 11], None), Err(PacketError::TooShort(11)));
    }

    #[test]
    fn test_parse_wrong_version() {
        let packet = [0x40u8; 12];
        assert_eq!(
            RtpPacket::parse(&packet, None),
            Err(PacketError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn test_parse_csrc_and_extension() {
        // V=2, X=1, CC=1
        let mut packet = vec![0x91, 0x60, 0x00, 0x05, 0, 0, 0, 0, 0, 0, 0, 1];
        packet.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]); // CSRC
        packet.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // one extension word
        packet.extend_from_slice(&[1, 2, 3, 4]);
        packet.extend_from_slice(&[9, 9]); // payload
        let parsed = RtpPacket::parse(&packet, None).unwrap();
        assert_eq!(parsed.sequence, 5);
        assert_eq!(&parsed.payload[..], &[9, 9]);
    }

    #[test]
    fn test_parse_bogus_extension_length() {
        let packet = [
            0x90, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x01, 0xBE, 0xDE,
            0xFF, 0xFF,
        ];
        assert!(matches!(
            RtpPacket::parse(&packet, None),
            Err(PacketError::Truncated { what: "extension body", .. })
        ));
    }

    #[test]
    fn test_parse_strips_padding() {
        let mut packet = vec![0xA0, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 1];
        packet.extend_from_slice(&[7, 7, 0, 2]);
        let parsed = RtpPacket::parse(&packet, None).unwrap();
        assert_eq!(&parsed.payload[..], &[7, 7]);
    }

    #[test]
    fn test_arrival_time_prefers_dts() {
        let packet = RtpPacket::new(0, 1, 1, Bytes::new()).with_pts(Duration::from_millis(40));
        assert_eq!(packet.arrival_time(), Some(Duration::from_millis(40)));

        let packet = packet.with_dts(Duration::from_millis(20));
        assert_eq!(packet.arrival_time(), Some(Duration::from_millis(20)));

        let packet = RtpPacket::new(0, 1, 1, Bytes::new());
        assert_eq!(packet.arrival_time(), None);
    }

    #[test]
    fn test_to_bytes_parses_back() {
        let mut packet = RtpPacket::new(100, 65535, 0xCAFE, Bytes::from_static(b"fec"));
        packet.marker = true;
        packet.timestamp = 48000;
        let parsed = RtpPacket::parse(&packet.to_bytes(), None).unwrap();
        assert_eq!(parsed, packet);
    }
}
