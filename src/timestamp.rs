//! ISO-8601 timestamp helpers shared by records and capture.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_iso8601() -> String {
    iso8601(Utc::now())
}

/// Run id in the `run_YYYYmmdd_HHMMSS` form, local time.
pub fn run_id_now() -> String {
    format!("run_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso8601_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(iso8601(at), "2024-03-01T12:30:05.000000Z");
    }

    #[test]
    fn test_run_id_shape() {
        let id = run_id_now();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), "run_20240301_123005".len());
    }
}
