//! Calendar layout engine.
//!
//! Raw intervals flow through [`clamp_intervals`], [`merge_same_room`],
//! [`group_identical_windows`] and finally [`assign_lanes`] once per day.
//! [`layout_week`] runs the whole chain.

use crate::domain::models::{
    Block, Interval, MISSING_ROOM_LABEL, MergedInterval, PlacedBlock, VisibleHours, WORKWEEK_DAYS,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Tolerance under which two same-room intervals count as touching.
pub const MERGE_EPSILON: f64 = 1e-6;
/// Tolerance under which a block may reuse a lane that just ended.
pub const LANE_EPSILON: f64 = 1e-9;
/// Grouping key precision: 4 decimal places of an hour.
const KEY_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayLayout {
    pub day_index: u8,
    pub lane_count: usize,
    pub blocks: Vec<PlacedBlock>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeekLayout {
    pub visible_hours: VisibleHours,
    pub days: Vec<DayLayout>,
}

pub fn clamp_intervals(intervals: &[Interval], hours: VisibleHours) -> Vec<Interval> {
    intervals
        .iter()
        .filter_map(|interval| interval.clamp(hours))
        .collect()
}

/// Union overlapping or touching intervals that share `(day_index, room_code)`.
///
/// Intervals of different rooms are never merged, even with identical spans.
/// A merged interval is flagged when any contributing piece was.
pub fn merge_same_room(intervals: &[Interval]) -> Vec<MergedInterval> {
    let mut groups: BTreeMap<(u8, Option<&str>), Vec<&Interval>> = BTreeMap::new();
    for interval in intervals {
        groups
            .entry((interval.day_index, interval.room_code.as_deref()))
            .or_default()
            .push(interval);
    }

    let mut merged = Vec::new();
    for ((day_index, room_code), mut group) in groups {
        group.sort_by(|left, right| {
            left.start_hour
                .total_cmp(&right.start_hour)
                .then(left.end_hour.total_cmp(&right.end_hour))
        });

        let mut running: Option<(f64, f64, bool)> = None;
        for interval in group {
            running = match running {
                Some((start, end, flagged)) if interval.start_hour <= end + MERGE_EPSILON => {
                    Some((start, end.max(interval.end_hour), flagged || interval.flagged))
                }
                Some((start, end, flagged)) => {
                    merged.push(MergedInterval::from_parts(
                        day_index,
                        start,
                        end,
                        room_code.map(ToOwned::to_owned),
                        flagged,
                    ));
                    Some((interval.start_hour, interval.end_hour, interval.flagged))
                }
                None => Some((interval.start_hour, interval.end_hour, interval.flagged)),
            };
        }
        if let Some((start, end, flagged)) = running {
            merged.push(MergedInterval::from_parts(
                day_index,
                start,
                end,
                room_code.map(ToOwned::to_owned),
                flagged,
            ));
        }
    }
    merged
}

/// Combine merged intervals with the same `(day, start, end, flagged)` into one block.
///
/// Keys are rounded to 4 decimal places of an hour. Output is ordered by
/// `(day_index, start_hour, end_hour)`.
pub fn group_identical_windows(merged: &[MergedInterval]) -> Vec<Block> {
    let mut buckets: BTreeMap<(u8, i64, i64, bool), BTreeSet<String>> = BTreeMap::new();
    for interval in merged {
        let key = (
            interval.day_index,
            round_key(interval.start_hour),
            round_key(interval.end_hour),
            interval.flagged,
        );
        buckets.entry(key).or_default().insert(
            interval
                .room_code
                .clone()
                .unwrap_or_else(|| MISSING_ROOM_LABEL.to_string()),
        );
    }

    buckets
        .into_iter()
        .map(|((day_index, start, end, flagged), rooms)| Block {
            day_index,
            start_hour: start as f64 / KEY_SCALE,
            end_hour: end as f64 / KEY_SCALE,
            rooms,
            flagged,
        })
        .collect()
}

/// Greedy interval-graph colouring of one day's blocks into side-by-side lanes.
///
/// Every block of the day carries the same `lane_count`: the number of lanes
/// opened over the whole day, not the overlap width at the block's own time.
pub fn assign_lanes(blocks: &[Block]) -> Vec<PlacedBlock> {
    let mut ordered = blocks.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| {
        left.start_hour
            .total_cmp(&right.start_hour)
            .then(left.end_hour.total_cmp(&right.end_hour))
    });

    let mut lane_ends: Vec<f64> = Vec::new();
    let mut placed = Vec::with_capacity(ordered.len());
    for block in ordered {
        let lane_index = match lane_ends
            .iter()
            .position(|last_end| block.start_hour >= last_end - LANE_EPSILON)
        {
            Some(index) => {
                lane_ends[index] = block.end_hour;
                index
            }
            None => {
                lane_ends.push(block.end_hour);
                lane_ends.len() - 1
            }
        };
        placed.push((block, lane_index));
    }

    let lane_count = lane_ends.len().max(1);
    placed
        .into_iter()
        .map(|(block, lane_index)| PlacedBlock {
            block: block.clone(),
            lane_index,
            lane_count,
        })
        .collect()
}

/// Full layout of workweek events: clamp, merge, group, then lanes per day.
pub fn layout_week(events: &[Interval], hours: VisibleHours) -> WeekLayout {
    let clamped = clamp_intervals(events, hours);
    let merged = merge_same_room(&clamped);
    let blocks = group_identical_windows(&merged);

    let mut by_day: BTreeMap<u8, Vec<Block>> =
        (0..WORKWEEK_DAYS).map(|day| (day, Vec::new())).collect();
    for block in blocks {
        if let Err(reason) = block.validate() {
            tracing::debug!(day = block.day_index, %reason, "dropping block before lane assignment");
            continue;
        }
        if let Some(day_blocks) = by_day.get_mut(&block.day_index) {
            day_blocks.push(block);
        }
    }

    let days = by_day
        .into_iter()
        .map(|(day_index, day_blocks)| {
            let blocks = assign_lanes(&day_blocks);
            DayLayout {
                day_index,
                lane_count: blocks.first().map_or(0, |placed| placed.lane_count),
                blocks,
            }
        })
        .collect();

    WeekLayout {
        visible_hours: hours,
        days,
    }
}

fn round_key(hour: f64) -> i64 {
    (hour * KEY_SCALE).round() as i64
}
