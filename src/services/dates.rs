//! Calendar date parsing shared by the JSON and spreadsheet inputs
//!
//! Dates are stored as plain calendar dates. Clients send `YYYY-MM-DD`, but
//! full timestamps are accepted and truncated to their date part.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};

use crate::types::{ConvenioError, Result};

/// Parse a date string in any of the accepted layouts
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.date_naive());
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, layout) {
            return Ok(ts.date());
        }
    }

    Err(ConvenioError::BadRequest(format!(
        "Invalid date for {field}: '{value}'"
    )))
}

/// Parse an optional date where an empty string means "no date"
pub fn parse_optional_date(field: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_date(field, v).map(Some),
    }
}

/// Largest serial Excel accepts (9999-12-31)
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

/// Convert an Excel date serial (days since 1899-12-30) to a date
pub fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::try_days(serial.trunc() as i64)?)
}

/// Distinguish an absent field from an explicit `null`
///
/// Used with `#[serde(default, deserialize_with = "double_option")]` on
/// `Option<Option<T>>` fields so updates can clear a value.
pub fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_accepted_layouts() {
        assert_eq!(parse_date("plazo", "2025-06-30").unwrap(), ymd(2025, 6, 30));
        assert_eq!(
            parse_date("plazo", "2025-06-30T00:00:00.000Z").unwrap(),
            ymd(2025, 6, 30)
        );
        assert_eq!(
            parse_date("plazo", "2025-06-30 13:45:00").unwrap(),
            ymd(2025, 6, 30)
        );
    }

    #[test]
    fn test_invalid_date_is_bad_request() {
        let err = parse_date("fechaInicio", "30/06/2025").unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));
        assert!(err.message().contains("fechaInicio"));
    }

    #[test]
    fn test_empty_optional_clears() {
        assert_eq!(parse_optional_date("plazo", Some("")).unwrap(), None);
        assert_eq!(parse_optional_date("plazo", None).unwrap(), None);
        assert!(parse_optional_date("plazo", Some("nope")).is_err());
    }

    #[test]
    fn test_excel_serial() {
        assert_eq!(from_excel_serial(45658.0), Some(ymd(2025, 1, 1)));
        assert_eq!(from_excel_serial(45838.5), Some(ymd(2025, 6, 30)));
        assert_eq!(from_excel_serial(0.0), None);
        assert_eq!(from_excel_serial(2_958_465.0), Some(ymd(9999, 12, 31)));
    }

    #[test]
    fn test_excel_serial_out_of_range() {
        assert_eq!(from_excel_serial(2_958_466.0), None);
        assert_eq!(from_excel_serial(1e15), None);
        assert_eq!(from_excel_serial(f64::MAX), None);
        assert_eq!(from_excel_serial(f64::NAN), None);
        assert_eq!(from_excel_serial(f64::INFINITY), None);
    }

    #[test]
    fn test_double_option() {
        #[derive(Deserialize)]
        struct Patch {
            #[serde(default, deserialize_with = "double_option")]
            plazo: Option<Option<String>>,
        }

        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.plazo, None);
        let null: Patch = serde_json::from_str(r#"{"plazo": null}"#).unwrap();
        assert_eq!(null.plazo, Some(None));
        let set: Patch = serde_json::from_str(r#"{"plazo": "2025-01-01"}"#).unwrap();
        assert_eq!(set.plazo, Some(Some("2025-01-01".into())));
    }
}
