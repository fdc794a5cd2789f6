//! Adversarial Property-Based Tests for Configuration Parsing
//!
//! # Attack Plan
//!
//! 1. **Port Number Attacks**: Negative numbers (as string), overflow, float,
//!    scientific notation, unicode digits.
//!
//! 2. **Window Attacks**: Negative, fractional and overflowing millisecond
//!    values for the retention window.
//!
//! 3. **Payload Type Range**: Values that fit a u8 but not a 7-bit RTP payload type.
//!
//! 4. **Empty vs Missing Fields**: Empty strings should behave differently
//!    than missing environment variables.
//!
//! # Invariants
//!
//! - from_getter never panics on any input
//! - validate() never panics (may return Err)
//! - Strictly parsed fields reject garbage with an error naming the variable
//! - Leniently parsed fields fall back to their defaults

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use rtpstorage::config::{Config, MAX_SIZE_TIME};

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

/// Generate malformed numeric strings
fn malformed_number() -> impl Strategy<Value = String> {
    prop_oneof![
        // Numeric edge cases
        Just("-1".to_string()),
        Just("-0".to_string()),
        Just("99999".to_string()),
        Just("4294967296".to_string()), // u32::MAX + 1
        Just("18446744073709551616".to_string()), // u64::MAX + 1
        // Float
        Just("5004.5".to_string()),
        Just(".5004".to_string()),
        // Scientific notation
        Just("5e3".to_string()),
        // Non-numeric
        Just("".to_string()),
        Just("   ".to_string()),
        Just("abc".to_string()),
        Just("NaN".to_string()),
        // Unicode digits
        Just("٥٠٠٤".to_string()),  // Arabic-Indic digits for 5004
        Just("５００４".to_string()), // Fullwidth digits
        // Injection
        Just("5004\x00hidden".to_string()),
        Just("5004\r\n".to_string()),
        // Leading/trailing
        Just(" 5004".to_string()),
        Just("5004 ".to_string()),
    ]
}

fn parse(vars: &HashMap<&str, String>) -> anyhow::Result<Config> {
    Config::from_getter(|key| vars.get(key).cloned())
}

// ============================================================================
// NEVER PANICS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_from_getter_never_panics_with_malformed_numbers(
        value in malformed_number(),
        key in prop::sample::select(vec![
            "RTP_PORT",
            "STORAGE_SIZE_TIME_MS",
            "FEC_PAYLOAD_TYPE",
            "MAX_PENDING_LOSSES",
            "STATS_INTERVAL_SECS",
        ]),
    ) {
        let mut vars = HashMap::new();
        vars.insert(key, value);
        if let Ok(config) = parse(&vars) {
            let _ = config.validate();
        }
    }

    #[test]
    fn prop_from_getter_never_panics_with_arbitrary_values(
        port in ".*",
        window in ".*",
        pt in ".*",
    ) {
        let mut vars = HashMap::new();
        vars.insert("RTP_PORT", port);
        vars.insert("STORAGE_SIZE_TIME_MS", window);
        vars.insert("FEC_PAYLOAD_TYPE", pt);
        if let Ok(config) = parse(&vars) {
            let _ = config.validate();
        }
    }

    #[test]
    fn prop_window_round_trips(ms in 0u64..=120_000) {
        let mut vars = HashMap::new();
        vars.insert("STORAGE_SIZE_TIME_MS", ms.to_string());
        let config = parse(&vars).unwrap();
        prop_assert_eq!(config.size_time, Duration::from_millis(ms));
        prop_assert_eq!(config.validate().is_ok(), config.size_time <= MAX_SIZE_TIME);
    }

    #[test]
    fn prop_payload_type_validation(pt in any::<u8>()) {
        let mut vars = HashMap::new();
        vars.insert("FEC_PAYLOAD_TYPE", pt.to_string());
        let config = parse(&vars).unwrap();
        prop_assert_eq!(config.validate().is_ok(), pt < 128);
    }
}

// ============================================================================
// STRICT VS LENIENT FIELDS
// ============================================================================

#[test]
fn test_strict_fields_reject_garbage() {
    for key in ["RTP_PORT", "STORAGE_SIZE_TIME_MS", "FEC_PAYLOAD_TYPE"] {
        let mut vars = HashMap::new();
        vars.insert(key, "garbage".to_string());
        let err = parse(&vars).unwrap_err();
        assert!(
            format!("{:#}", err).contains(key),
            "error for {} should name it: {:#}",
            key,
            err
        );
    }
}

#[test]
fn test_lenient_fields_fall_back() {
    let mut vars = HashMap::new();
    vars.insert("MAX_PENDING_LOSSES", "garbage".to_string());
    vars.insert("STATS_INTERVAL_SECS", "-3".to_string());
    let config = parse(&vars).unwrap();
    assert_eq!(config.max_pending_losses, 64);
    assert_eq!(config.stats_interval_secs, 10);
}

#[test]
fn test_empty_string_vs_missing() {
    // Missing -> default
    let config = parse(&HashMap::new()).unwrap();
    assert_eq!(config.rtp_port, 5004);

    // Empty -> parse error
    let mut vars = HashMap::new();
    vars.insert("RTP_PORT", String::new());
    assert!(parse(&vars).is_err());
}

#[test]
fn test_port_boundary_values() {
    for port in ["0", "1", "5004", "65535"] {
        let mut vars = HashMap::new();
        vars.insert("RTP_PORT", port.to_string());
        let config = parse(&vars).unwrap_or_else(|e| panic!("port {} should be valid: {}", port, e));
        assert_eq!(config.rtp_port, port.parse::<u16>().unwrap());
    }
}

#[test]
fn test_zero_window_disables_storage() {
    let mut vars = HashMap::new();
    vars.insert("STORAGE_SIZE_TIME_MS", "0".to_string());
    let config = parse(&vars).unwrap();
    assert!(!config.storage_enabled());
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_parsing_deterministic() {
    let mut vars = HashMap::new();
    vars.insert("RTP_PORT", "6000".to_string());
    vars.insert("STORAGE_SIZE_TIME_MS", "300".to_string());
    vars.insert("FEC_PAYLOAD_TYPE", "117".to_string());

    let a = parse(&vars).unwrap();
    let b = parse(&vars).unwrap();
    assert_eq!(a.rtp_port, b.rtp_port);
    assert_eq!(a.size_time, b.size_time);
    assert_eq!(a.fec_payload_type, b.fec_payload_type);
}
