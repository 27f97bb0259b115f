use crate::domain::models::{BookingSummary, FriendSpec, Room};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

pub const START_KEYS: [&str; 3] = ["StartDateTime", "startDate", "StartDate"];
pub const END_KEYS: [&str; 3] = ["EndDateTime", "endDate", "EndDate"];
const TITLE_KEYS: [&str; 2] = ["Name", "Title"];
const RESOURCE_NAME_KEYS: [&str; 2] = ["Name", "name"];
const KEY_RESOURCES: &str = "Resources";
const KEY_RESOURCE_NAME: &str = "ResourceName";
const KEY_OWNER: &str = "Owner";
const KEY_EMAIL: &str = "BookerEmailAddress";
const DEFAULT_TITLE: &str = "Booking";
pub const LOCAL_DISPLAY_FORMAT: &str = "%a %d %b %Y %H:%M";

/// Result of probing a record for the first usable field among candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldLookup<'a> {
    Found { key: &'a str, value: &'a Value },
    NotFound,
}

impl<'a> FieldLookup<'a> {
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            FieldLookup::Found { value, .. } => value.as_str(),
            FieldLookup::NotFound => None,
        }
    }
}

/// Which pass of the friend matcher found the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    ConfiguredField,
    FullRecord,
}

/// A JSON value counts as present when it is not null, not `false`, not an empty
/// string and not an empty container.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        _ => true,
    }
}

/// First candidate key, in priority order, whose value is present.
pub fn lookup_first<'a>(record: &'a Value, keys: &[&'a str]) -> FieldLookup<'a> {
    keys.iter()
        .find_map(|&key| {
            record
                .get(key)
                .filter(|value| is_present(value))
                .map(|value| FieldLookup::Found { key, value })
        })
        .unwrap_or(FieldLookup::NotFound)
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Case-insensitive substring match of any friend id against the configured
/// fields, then against the whole serialized record.
pub fn match_friend(record: &Value, friends: &FriendSpec) -> Option<MatchSource> {
    let ids = friends.normalized_ids();
    if ids.is_empty() {
        return None;
    }

    let haystack = friends
        .match_fields
        .iter()
        .map(|field| field_text(record.get(field)))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if ids.iter().any(|id| haystack.contains(id.as_str())) {
        return Some(MatchSource::ConfiguredField);
    }

    let full_record = record.to_string().to_lowercase();
    ids.iter()
        .any(|id| full_record.contains(id.as_str()))
        .then_some(MatchSource::FullRecord)
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// First candidate that is present and parses as an ISO instant.
///
/// Offset-less values are read as UTC. A present but unparsable candidate
/// falls through to the next one.
pub fn parse_booking_datetime(record: &Value, keys: &[&str]) -> Result<DateTime<Utc>, InfraError> {
    for key in keys {
        if let FieldLookup::Found { value, .. } = lookup_first(record, &[*key]) {
            if let Some(parsed) = value.as_str().and_then(parse_instant) {
                return Ok(parsed);
            }
        }
    }
    Err(InfraError::InvalidBooking(format!(
        "none of the datetime keys present: {}",
        keys.join(", ")
    )))
}

/// Room name as the booking itself reports it.
pub fn extract_room_name(record: &Value) -> Option<String> {
    match record.get(KEY_RESOURCES).and_then(Value::as_array) {
        Some(resources) if !resources.is_empty() => {
            lookup_first(&resources[0], &RESOURCE_NAME_KEYS)
                .as_str()
                .map(ToOwned::to_owned)
        }
        _ => lookup_first(record, &[KEY_RESOURCE_NAME])
            .as_str()
            .map(ToOwned::to_owned),
    }
}

pub fn format_local(value: DateTime<Utc>, tz: Tz) -> String {
    value.with_timezone(&tz).format(LOCAL_DISPLAY_FORMAT).to_string()
}

/// Compact summary of one raw booking fetched for `room`.
pub fn summarize_booking(record: &Value, room: &Room, tz: Tz) -> Result<BookingSummary, InfraError> {
    let starts_at = parse_booking_datetime(record, &START_KEYS)?;
    let ends_at = parse_booking_datetime(record, &END_KEYS)?;
    let title = lookup_first(record, &TITLE_KEYS)
        .as_str()
        .unwrap_or(DEFAULT_TITLE)
        .to_string();
    let room_name = extract_room_name(record).unwrap_or_else(|| room.display_name().to_string());

    Ok(BookingSummary {
        title,
        room: room_name,
        room_code: Some(room.code.clone()),
        start_local: format_local(starts_at, tz),
        end_local: format_local(ends_at, tz),
        starts_at,
        ends_at,
        owner: lookup_first(record, &[KEY_OWNER]).as_str().map(ToOwned::to_owned),
        email: lookup_first(record, &[KEY_EMAIL]).as_str().map(ToOwned::to_owned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn friends(ids: &[&str]) -> FriendSpec {
        FriendSpec {
            ids: ids.iter().map(|id| id.to_string()).collect::<BTreeSet<_>>(),
            ..FriendSpec::default()
        }
    }

    fn room() -> Room {
        Room {
            id: "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".to_string(),
            code: "010.05.68".to_string(),
            name: "Swanston Rm 5.68".to_string(),
        }
    }

    fn sample_booking() -> Value {
        json!({
            "Name": "Study Room Booking",
            "Owner": "s4166573",
            "BookerEmailAddress": "someone.else@student.rmit.edu.au",
            "Resources": [{ "Name": "Swanston Library Rm 3.12" }],
            "StartDateTime": "2025-08-08T22:00:00.000Z",
            "EndDateTime": "2025-08-08T23:00:00.000Z"
        })
    }

    #[test]
    fn owner_field_matches_case_insensitively_despite_email_mismatch() {
        let matched = match_friend(&sample_booking(), &friends(&["S4166573", "s9999999"]));
        assert_eq!(matched, Some(MatchSource::ConfiguredField));
    }

    #[test]
    fn id_outside_configured_fields_matches_through_full_record() {
        let booking = json!({
            "Name": "Group study",
            "Attendees": [{ "Login": "s1234567" }],
            "StartDateTime": "2025-08-08T22:00:00Z",
            "EndDateTime": "2025-08-08T23:00:00Z"
        });
        assert_eq!(match_friend(&booking, &friends(&["s1234567"])), Some(MatchSource::FullRecord));
    }

    #[test]
    fn unrelated_booking_and_empty_friend_list_do_not_match() {
        assert_eq!(match_friend(&sample_booking(), &friends(&["s0000000"])), None);
        assert_eq!(match_friend(&sample_booking(), &friends(&[])), None);
    }

    #[test]
    fn lookup_skips_empty_values_in_priority_order() {
        let record = json!({ "Name": "", "Title": "Exam prep" });
        assert_eq!(
            lookup_first(&record, &TITLE_KEYS),
            FieldLookup::Found { key: "Title", value: &json!("Exam prep") }
        );
        assert_eq!(lookup_first(&record, &["Missing"]), FieldLookup::NotFound);
    }

    #[test]
    fn datetime_falls_back_across_candidate_keys() {
        let record = json!({ "StartDateTime": "not a date", "startDate": "2025-08-11T09:30:00" });
        let parsed = parse_booking_datetime(&record, &START_KEYS).expect("parse start");
        assert_eq!(parsed.to_rfc3339(), "2025-08-11T09:30:00+00:00");
    }

    #[test]
    fn missing_datetime_is_invalid_booking() {
        let error = parse_booking_datetime(&json!({ "Name": "x" }), &END_KEYS).expect_err("no end");
        assert!(matches!(error, InfraError::InvalidBooking(message) if message.contains("EndDateTime")));
    }

    #[test]
    fn room_name_prefers_resources_then_resource_name() {
        assert_eq!(extract_room_name(&sample_booking()).as_deref(), Some("Swanston Library Rm 3.12"));
        assert_eq!(
            extract_room_name(&json!({ "Resources": [{ "name": "lower" }] })).as_deref(),
            Some("lower")
        );
        assert_eq!(
            extract_room_name(&json!({ "ResourceName": "Rm 1" })).as_deref(),
            Some("Rm 1")
        );
        assert_eq!(extract_room_name(&json!({ "Resources": [{}], "ResourceName": "x" })), None);
    }

    #[test]
    fn summary_formats_local_melbourne_time() {
        let summary = summarize_booking(&sample_booking(), &room(), chrono_tz::Australia::Melbourne)
            .expect("summarize");
        assert_eq!(summary.title, "Study Room Booking");
        assert_eq!(summary.room, "Swanston Library Rm 3.12");
        assert_eq!(summary.room_code.as_deref(), Some("010.05.68"));
        assert_eq!(summary.start_local, "Sat 09 Aug 2025 08:00");
        assert_eq!(summary.end_local, "Sat 09 Aug 2025 09:00");
        assert_eq!(summary.owner.as_deref(), Some("s4166573"));
    }

    #[test]
    fn summary_defaults_title_and_room_name() {
        let record = json!({
            "StartDate": "2025-08-11T00:00:00Z",
            "EndDate": "2025-08-11T01:00:00Z"
        });
        let summary = summarize_booking(&record, &room(), chrono_tz::UTC).expect("summarize");
        assert_eq!(summary.title, "Booking");
        assert_eq!(summary.room, "Swanston Rm 5.68");
        assert_eq!(summary.start_local, "Mon 11 Aug 2025 00:00");
        assert!(summary.owner.is_none());
    }
}
