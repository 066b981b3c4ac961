//! Label resolution for source records.

use crate::source::CountryRecord;

/// Resolve the label of a source record.
///
/// The country code wins; the continent code is the fallback. Labels are
/// lowercase. Returns `None` when both codes are missing or empty.
///
/// # Examples
/// ```
/// use sing_geoip::label::resolve_label;
/// use sing_geoip::source::CountryRecord;
///
/// let record = CountryRecord {
///     country: Some("US".to_string()),
///     continent: Some("NA".to_string()),
/// };
/// assert_eq!(resolve_label(&record).as_deref(), Some("us"));
/// ```
pub fn resolve_label(record: &CountryRecord) -> Option<String> {
    [&record.country, &record.continent]
        .into_iter()
        .flatten()
        .find(|code| !code.is_empty())
        .map(|code| code.to_lowercase())
}
