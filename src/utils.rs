use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serializer;

pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = Utc
        .from_utc_datetime(date)
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}

// Tags are stored comma-joined in a single column; the tag filter substring
// matches against this representation.
pub fn join_tags(tags: &[String]) -> String {
    tags.join(",")
}

pub fn split_tags(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}
