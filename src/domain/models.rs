use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of calendar days in the rendered week (Mon..Fri).
pub const WORKWEEK_DAYS: u8 = 5;

/// Label used for a block contributed by an interval without a room code.
pub const MISSING_ROOM_LABEL: &str = "?";

pub const DEFAULT_MATCH_FIELDS: [&str; 4] = ["Owner", "BookerEmailAddress", "BookerName", "Reference"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub name: String,
}

impl Room {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "room.id")?;
        validate_room_code(&self.code)
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.code
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendSpec {
    #[serde(default)]
    pub ids: BTreeSet<String>,
    #[serde(default = "default_match_fields")]
    pub match_fields: Vec<String>,
}

impl Default for FriendSpec {
    fn default() -> Self {
        Self {
            ids: BTreeSet::new(),
            match_fields: default_match_fields(),
        }
    }
}

impl FriendSpec {
    /// Friend ids lowercased for case-insensitive matching.
    pub fn normalized_ids(&self) -> Vec<String> {
        self.ids
            .iter()
            .map(|id| id.trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

fn default_match_fields() -> Vec<String> {
    DEFAULT_MATCH_FIELDS.iter().map(|field| field.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IgnoreList {
    #[serde(default)]
    pub rooms: BTreeSet<String>,
}

impl IgnoreList {
    pub fn contains(&self, room_code: Option<&str>) -> bool {
        room_code.is_some_and(|code| self.rooms.contains(code))
    }
}

/// Outcome of an administrative add/remove against a roster list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterChange {
    Added,
    AlreadyPresent,
    Removed,
    NotPresent,
}

/// How a token whose expiry cannot be decoded is treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTokenPolicy {
    /// Usable but unverified: the fetch itself decides.
    #[default]
    OptimisticFresh,
    /// Treated as stale.
    Pessimistic,
}

/// A friend booking as summarized from the upstream record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingSummary {
    pub title: String,
    pub room: String,
    pub room_code: Option<String>,
    pub start_local: String,
    pub end_local: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub owner: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VisibleHours {
    pub min: f64,
    pub max: f64,
}

impl Default for VisibleHours {
    fn default() -> Self {
        Self { min: 8.0, max: 20.0 }
    }
}

impl VisibleHours {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=24.0).contains(&self.min) || !(0.0..=24.0).contains(&self.max) {
            return Err("visible hours must be within 0..=24".to_string());
        }
        if self.max <= self.min {
            return Err("visible hours max must be greater than min".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interval {
    pub day_index: u8,
    pub start_hour: f64,
    pub end_hour: f64,
    pub room_code: Option<String>,
    pub flagged: bool,
}

impl Interval {
    pub fn new(
        day_index: u8,
        start_hour: f64,
        end_hour: f64,
        room_code: Option<String>,
        flagged: bool,
    ) -> Result<Self, String> {
        let interval = Self {
            day_index,
            start_hour,
            end_hour,
            room_code,
            flagged,
        };
        interval.validate()?;
        Ok(interval)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.day_index > 6 {
            return Err("interval.day_index must be within 0..=6".to_string());
        }
        if !self.start_hour.is_finite() || !self.end_hour.is_finite() {
            return Err("interval hours must be finite".to_string());
        }
        if self.end_hour <= self.start_hour {
            return Err("interval.end_hour must be after interval.start_hour".to_string());
        }
        Ok(())
    }

    /// Clamp into the visible window; `None` when nothing of the interval remains.
    pub fn clamp(&self, hours: VisibleHours) -> Option<Interval> {
        let start = self.start_hour.max(hours.min);
        let end = self.end_hour.min(hours.max);
        if end <= hours.min || start >= hours.max || end <= start {
            return None;
        }
        Some(Interval {
            start_hour: start,
            end_hour: end,
            ..self.clone()
        })
    }
}

/// Union of same-room, same-day intervals. Only the merge engine builds these.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MergedInterval {
    pub day_index: u8,
    pub start_hour: f64,
    pub end_hour: f64,
    pub room_code: Option<String>,
    pub flagged: bool,
}

impl MergedInterval {
    pub(crate) fn from_parts(
        day_index: u8,
        start_hour: f64,
        end_hour: f64,
        room_code: Option<String>,
        flagged: bool,
    ) -> Self {
        Self {
            day_index,
            start_hour,
            end_hour,
            room_code,
            flagged,
        }
    }
}

impl From<MergedInterval> for Interval {
    fn from(value: MergedInterval) -> Self {
        Interval {
            day_index: value.day_index,
            start_hour: value.start_hour,
            end_hour: value.end_hour,
            room_code: value.room_code,
            flagged: value.flagged,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Block {
    pub day_index: u8,
    pub start_hour: f64,
    pub end_hour: f64,
    pub rooms: BTreeSet<String>,
    pub flagged: bool,
}

impl Block {
    pub fn validate(&self) -> Result<(), String> {
        if !self.start_hour.is_finite() || !self.end_hour.is_finite() {
            return Err("block hours must be finite".to_string());
        }
        if self.end_hour <= self.start_hour {
            return Err("block.end_hour must be after block.start_hour".to_string());
        }
        if self.rooms.is_empty() {
            return Err("block.rooms must not be empty".to_string());
        }
        Ok(())
    }

    pub fn rooms_label(&self) -> String {
        self.rooms
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" / ")
    }

    pub fn time_label(&self) -> String {
        format!("{}–{}", format_hour(self.start_hour), format_hour(self.end_hour))
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.day_index == other.day_index
            && self.start_hour < other.end_hour
            && other.start_hour < self.end_hour
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlacedBlock {
    #[serde(flatten)]
    pub block: Block,
    pub lane_index: usize,
    pub lane_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub monday_date: NaiveDate,
}

impl WeekWindow {
    pub fn validate(&self) -> Result<(), String> {
        if self.monday_date.weekday() != Weekday::Mon {
            return Err("week.monday_date must be a Monday".to_string());
        }
        if self.end_utc <= self.start_utc {
            return Err("week.end_utc must be after week.start_utc".to_string());
        }
        Ok(())
    }
}

/// Room codes look like `080.10.04`.
pub fn validate_room_code(value: &str) -> Result<(), String> {
    let parts = value.split('.').collect::<Vec<_>>();
    let valid = parts.len() == 3
        && parts
            .iter()
            .zip([3usize, 2, 2])
            .all(|(part, width)| part.len() == width && part.chars().all(|c| c.is_ascii_digit()));
    if !valid {
        return Err(format!("invalid room code '{value}': expected DDD.DD.DD"));
    }
    Ok(())
}

/// Student numbers look like `s1234567`; returns the lowercased id.
pub fn normalize_friend_id(value: &str) -> Result<String, String> {
    let normalized = value.trim().to_lowercase();
    let mut chars = normalized.chars();
    let valid = chars.next() == Some('s')
        && normalized.len() == 8
        && chars.all(|c| c.is_ascii_digit());
    if !valid {
        return Err(format!("invalid student number '{value}': expected s1234567"));
    }
    Ok(normalized)
}

/// `12.5` -> `12:30`.
pub fn format_hour(hour: f64) -> String {
    let total_minutes = (hour * 60.0).round() as i64;
    format!("{:02}:{:02}", total_minutes / 60, total_minutes.rem_euclid(60))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
