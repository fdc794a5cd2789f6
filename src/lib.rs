//! rtpstorage library - RTP packet storage for FEC recovery
//!
//! Keeps a time-windowed, sequence-ordered copy of one RTP stream so lost
//! packets can be rebuilt by an FEC decoder or served again as redundant
//! packets.

pub mod cli;
pub mod config;
pub mod rtp;

pub use rtp::{RtpPacket, StreamBuffer};
