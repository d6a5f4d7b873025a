//! Normalization of raw device payloads.
//!
//! The sensor firmware sends every value as a string. Numbers must parse;
//! booleans are classified against one fixed set of truthy tokens; the device
//! timestamp is optional and falls back to the server clock when it cannot be
//! read.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::ValidationError;
use crate::models::NewSensorReading;

/// Tokens accepted as `true`, compared case-insensitively after trimming.
pub const TRUTHY_TOKENS: [&str; 6] = ["true", "on", "1", "yes", "presente", "sim"];

/// Naive device timestamp layout, read as UTC.
pub const DEVICE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw ingestion payload as sent by the field node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReadingPayload {
    // ---
    pub timestamp: Option<String>,
    #[serde(alias = "umidade")]
    pub soil_moisture: Option<String>,
    #[serde(alias = "temperatura")]
    pub soil_temperature: Option<String>,
    #[serde(alias = "ph")]
    pub soil_ph: Option<String>,
    #[serde(alias = "fosforo")]
    pub phosphorus: Option<String>,
    #[serde(alias = "potassio")]
    pub potassium: Option<String>,
    #[serde(alias = "rele", alias = "bomba_dagua")]
    pub pump: Option<String>,
}

/// Classify a permissive boolean string.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    TRUTHY_TOKENS.iter().any(|token| token.eq_ignore_ascii_case(value))
}

/// Parse a device timestamp in either accepted format.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` and ISO-8601 (`YYYY-MM-DDTHH:MM:SS[.fff]`
/// with an optional `Z` or `±hh:mm` offset). Naive values are UTC.
pub fn parse_device_timestamp(value: &str) -> Option<DateTime<Utc>> {
    // ---
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, DEVICE_TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn require<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn require_number(value: &Option<String>, field: &'static str) -> Result<f64, ValidationError> {
    // ---
    let raw = require(value, field)?;
    let parsed: f64 = raw.parse().map_err(|_| ValidationError::InvalidNumber {
        field,
        value: raw.to_string(),
    })?;
    if !parsed.is_finite() {
        return Err(ValidationError::NonFinite { field, value: parsed });
    }
    Ok(parsed)
}

impl RawReadingPayload {
    /// Validate and normalize. `server_now` stands in for a missing or
    /// unreadable device timestamp; `received_at` is assigned by storage.
    pub fn normalize(&self, server_now: DateTime<Utc>) -> Result<NewSensorReading, ValidationError> {
        // ---
        let soil_moisture = require_number(&self.soil_moisture, "soil_moisture")?;
        let soil_temperature = require_number(&self.soil_temperature, "soil_temperature")?;
        let soil_ph = require_number(&self.soil_ph, "soil_ph")?;
        let phosphorus_present = parse_flag(require(&self.phosphorus, "phosphorus")?);
        let potassium_present = parse_flag(require(&self.potassium, "potassium")?);
        let pump_on = parse_flag(require(&self.pump, "pump")?);

        if !(0.0..=100.0).contains(&soil_moisture) {
            tracing::warn!("soil_moisture {} outside 0-100, accepting as sent", soil_moisture);
        }
        if !(0.0..=14.0).contains(&soil_ph) {
            tracing::warn!("soil_ph {} outside 0-14, accepting as sent", soil_ph);
        }

        let observed_at = match self.timestamp.as_deref() {
            None => server_now,
            Some(raw) => parse_device_timestamp(raw).unwrap_or_else(|| {
                tracing::debug!("Unreadable device timestamp {:?}, using server time", raw);
                server_now
            }),
        };

        Ok(NewSensorReading {
            observed_at,
            soil_moisture,
            soil_temperature,
            soil_ph,
            phosphorus_present,
            potassium_present,
            pump_on,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn payload() -> RawReadingPayload {
        // ---
        RawReadingPayload {
            timestamp: None,
            soil_moisture: Some("65.5".to_string()),
            soil_temperature: Some("24.2".to_string()),
            soil_ph: Some("6.8".to_string()),
            phosphorus: Some("true".to_string()),
            potassium: Some("false".to_string()),
            pump: Some("false".to_string()),
        }
    }

    fn server_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 9, 15, 0).unwrap()
    }

    /// Every upper/lower-case spelling of `token`.
    fn case_variants(token: &str) -> Vec<String> {
        // ---
        let chars: Vec<char> = token.chars().collect();
        (0..1u32 << chars.len())
            .map(|mask| {
                chars
                    .iter()
                    .enumerate()
                    .map(|(i, c)| if mask & (1 << i) != 0 { c.to_ascii_uppercase() } else { *c })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_every_case_variant_of_truthy_tokens_is_true() {
        // ---
        for token in TRUTHY_TOKENS {
            for variant in case_variants(token) {
                assert!(parse_flag(&variant), "{variant:?} should be true");
                assert!(parse_flag(&format!("  {variant}\n")), "{variant:?} padded should be true");
            }
        }
    }

    #[test]
    fn test_everything_else_is_false() {
        // ---
        let falsy = [
            "", " ", "false", "off", "0", "no", "ausente", "nao", "não", "2", "-1", "truee", "tru",
            "y", "t", "ligado", "null", "none", "1.0", "on on", "yes!", "presentes",
        ];
        for value in falsy {
            assert!(!parse_flag(value), "{value:?} should be false");
        }
    }

    #[test]
    fn test_normalize_valid_payload() {
        // ---
        let reading = payload().normalize(server_now()).unwrap();

        assert_eq!(reading.soil_moisture, 65.5);
        assert_eq!(reading.soil_temperature, 24.2);
        assert_eq!(reading.soil_ph, 6.8);
        assert!(reading.phosphorus_present);
        assert!(!reading.potassium_present);
        assert!(!reading.pump_on);
        assert_eq!(reading.observed_at, server_now());
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        // ---
        let cases: [(fn(&mut RawReadingPayload), &str); 6] = [
            (|p| p.soil_moisture = None, "soil_moisture"),
            (|p| p.soil_temperature = None, "soil_temperature"),
            (|p| p.soil_ph = Some("  ".to_string()), "soil_ph"),
            (|p| p.phosphorus = None, "phosphorus"),
            (|p| p.potassium = None, "potassium"),
            (|p| p.pump = None, "pump"),
        ];
        for (mutate, field) in cases {
            let mut p = payload();
            mutate(&mut p);
            assert_eq!(p.normalize(server_now()), Err(ValidationError::MissingField(field)));
        }
    }

    #[test]
    fn test_unparseable_numbers_are_rejected() {
        // ---
        let mut p = payload();
        p.soil_ph = Some("acidic".to_string());
        assert_eq!(
            p.normalize(server_now()),
            Err(ValidationError::InvalidNumber {
                field: "soil_ph",
                value: "acidic".to_string()
            })
        );

        let mut p = payload();
        p.soil_moisture = Some("NaN".to_string());
        assert!(matches!(
            p.normalize(server_now()),
            Err(ValidationError::NonFinite { field: "soil_moisture", .. })
        ));
    }

    #[test]
    fn test_device_timestamp_formats() {
        // ---
        let expected = Utc.with_ymd_and_hms(2025, 4, 1, 22, 5, 30).unwrap();
        assert_eq!(parse_device_timestamp("2025-04-01 22:05:30"), Some(expected));
        assert_eq!(parse_device_timestamp("2025-04-01T22:05:30"), Some(expected));
        assert_eq!(parse_device_timestamp("2025-04-01T22:05:30Z"), Some(expected));
        assert_eq!(parse_device_timestamp("2025-04-01T19:05:30-03:00"), Some(expected));
        assert!(parse_device_timestamp("2025-04-01T22:05:30.250").is_some());
        assert_eq!(parse_device_timestamp("01/04/2025 22:05"), None);
    }

    #[test]
    fn test_bad_device_timestamp_falls_back_to_server_time() {
        // ---
        let mut p = payload();
        p.timestamp = Some("yesterday".to_string());
        assert_eq!(p.normalize(server_now()).unwrap().observed_at, server_now());

        p.timestamp = Some("2025-04-01 22:05:30".to_string());
        let reading = p.normalize(server_now()).unwrap();
        assert_eq!(reading.observed_at, Utc.with_ymd_and_hms(2025, 4, 1, 22, 5, 30).unwrap());
    }

    #[test]
    fn test_legacy_field_aliases() {
        // ---
        let p: RawReadingPayload = serde_json::from_value(serde_json::json!({
            "umidade": "40.0",
            "temperatura": "25.1",
            "ph": "7",
            "fosforo": "presente",
            "potassio": "ausente",
            "rele": "on"
        }))
        .unwrap();
        let reading = p.normalize(server_now()).unwrap();
        assert!(reading.phosphorus_present);
        assert!(!reading.potassium_present);
        assert!(reading.pump_on);
        assert_eq!(reading.soil_ph, 7.0);
    }
}
