use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::{CoreError, Result};

const FHIR_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parses a full FHIR `date` (`YYYY-MM-DD`). Partial dates are rejected.
pub fn parse_date(s: &str) -> Result<Date> {
    if s.len() != 10 {
        return Err(CoreError::invalid(format!(
            "date '{s}' is not in YYYY-MM-DD form"
        )));
    }
    Date::parse(s, FHIR_DATE)
        .map_err(|e| CoreError::invalid(format!("Failed to parse date '{s}': {e}")))
}

pub fn format_date(date: Date) -> String {
    // Formatting a Date with a date-only description cannot fail
    date.format(FHIR_DATE).unwrap_or_default()
}
