use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Longest retention window we accept (one minute of packets)
pub const MAX_SIZE_TIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    // UDP port the RTP stream arrives on
    pub rtp_port: u16,

    // How long packets are kept, measured on arrival time.
    // Zero disables storage.
    pub size_time: Duration,

    // Payload type that marks FEC packets in the stream
    pub fec_payload_type: u8,

    // Upper bound on lost sequence numbers waiting for FEC data
    pub max_pending_losses: usize,

    // How often the receiver logs its counters
    pub stats_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            rtp_port: get("RTP_PORT")
                .unwrap_or_else(|| "5004".to_string())
                .parse()
                .context("RTP_PORT must be a valid port number")?,

            size_time: Duration::from_millis(
                get("STORAGE_SIZE_TIME_MS")
                    .unwrap_or_else(|| "0".to_string())
                    .parse()
                    .context("STORAGE_SIZE_TIME_MS must be a number of milliseconds")?,
            ),

            fec_payload_type: get("FEC_PAYLOAD_TYPE")
                .unwrap_or_else(|| "100".to_string())
                .parse()
                .context("FEC_PAYLOAD_TYPE must be a number")?,

            max_pending_losses: get("MAX_PENDING_LOSSES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),

            stats_interval_secs: get("STATS_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // RTP payload types are 7 bits
        if self.fec_payload_type > 127 {
            errors.push(format!(
                "FEC_PAYLOAD_TYPE={} out of range (0-127).",
                self.fec_payload_type
            ));
        }

        if self.size_time > MAX_SIZE_TIME {
            errors.push(format!(
                "STORAGE_SIZE_TIME_MS={} too long (max: {}).",
                self.size_time.as_millis(),
                MAX_SIZE_TIME.as_millis()
            ));
        }

        if self.max_pending_losses == 0 {
            errors.push("MAX_PENDING_LOSSES must be greater than 0.".to_string());
        }

        if self.stats_interval_secs == 0 {
            errors.push("STATS_INTERVAL_SECS must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Whether packets are stored at all
    pub fn storage_enabled(&self) -> bool {
        !self.size_time.is_zero()
    }
}
