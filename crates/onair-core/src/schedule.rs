//! The scheduling kernel: turn a flat catalog into one cycle's worth of
//! time-indexed entries, and answer "what is on the air right now".
//!
//! The schedule is rebuilt from scratch on every load — it is a pure
//! function of the catalog and a reference instant, never persisted or
//! patched incrementally, so every client that computes it for the same
//! week sees the same program.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::Episode;
use crate::config::TimingConfig;
use crate::error::ChannelError;

/// One slot in the weekly program.  Immutable once built.
///
/// `idx` is 1-based and gapless; `start` of entry i+1 always equals
/// `start` of entry i plus that entry's effective duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub idx: u32,
    pub episode: Episode,
    pub start: DateTime<Utc>,
    /// Known runtime in seconds, or `None` when the feed did not say.
    pub duration: Option<f64>,
}

impl ScheduleEntry {
    /// Real duration when known, else the fixed fallback slot so an
    /// unknown-length item still occupies a bounded, non-zero slot.
    pub fn effective_duration(&self, fallback_slot_secs: f64) -> f64 {
        self.duration.unwrap_or(fallback_slot_secs)
    }

    /// End of the half-open interval `[start, start + duration)`.
    /// `None` when the duration is unknown (open-ended slot).
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.duration.map(|d| self.start + secs(d))
    }
}

pub type Schedule = Vec<ScheduleEntry>;

/// Strategy for choosing the starting catalog offset of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rotation {
    /// Every week starts the cycle at catalog index 0.
    #[default]
    None,
    /// Rotate the starting offset by `(week_of_month - 1)` blocks of
    /// `catalog_len / weeks_in_month` episodes, so a different part of
    /// the catalog surfaces each week of the month.
    MonthRelative,
}

impl Rotation {
    pub fn start_offset(self, anchor: DateTime<Utc>, catalog_len: usize) -> usize {
        match self {
            Rotation::None => 0,
            Rotation::MonthRelative => month_relative_offset(anchor.date_naive(), catalog_len),
        }
    }
}

fn month_relative_offset(monday: NaiveDate, catalog_len: usize) -> usize {
    if catalog_len == 0 {
        return 0;
    }
    let Some(first_of_month) = monday.with_day(1) else {
        return 0;
    };
    // First Monday of the anchor's month; never after the anchor itself,
    // since the anchor is a Monday in that month.
    let to_monday = (7 - first_of_month.weekday().num_days_from_monday() as i64) % 7;
    let first_monday = first_of_month + Duration::days(to_monday);

    let week_of_month = (monday - first_monday).num_days() / 7 + 1;

    let (next_year, next_month) = if first_of_month.month() == 12 {
        (first_of_month.year() + 1, 1)
    } else {
        (first_of_month.year(), first_of_month.month() + 1)
    };
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(monday);

    let covered_days = last_day.day() as i64 - first_monday.day() as i64 + 1;
    let weeks_in_month = (covered_days + 6) / 7;
    if weeks_in_month <= 0 {
        return 0;
    }

    let per_week = catalog_len as i64 / weeks_in_month;
    (((week_of_month - 1) * per_week).max(0) as usize) % catalog_len
}

/// Start of the current cycle: 00:00 UTC on the most recent Monday at
/// or before `reference`.
pub fn cycle_anchor(reference: DateTime<Utc>) -> DateTime<Utc> {
    let mut day = reference.date_naive();
    while day.weekday() != Weekday::Mon {
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

/// Build one cycle of the program.
///
/// Walks the catalog cyclically from the rotation's starting offset,
/// accumulating effective durations from the cycle anchor until the
/// accumulated time reaches the anchor plus the cycle length.  The last
/// entry may overflow past the boundary; its start never does.
pub fn build_schedule(
    catalog: &[Episode],
    reference: DateTime<Utc>,
    rotation: Rotation,
    timing: &TimingConfig,
) -> Result<Schedule, ChannelError> {
    if catalog.is_empty() {
        return Err(ChannelError::EmptyCatalog);
    }

    let anchor = cycle_anchor(reference);
    let end = anchor + Duration::days(timing.cycle_days as i64);

    let mut cursor = anchor;
    let mut pos = rotation.start_offset(anchor, catalog.len()) % catalog.len();
    let mut idx = 1u32;
    let mut schedule = Vec::new();

    while cursor < end {
        let episode = &catalog[pos];
        let entry = ScheduleEntry {
            idx,
            episode: episode.clone(),
            start: cursor,
            duration: episode.duration,
        };
        cursor += secs(entry.effective_duration(timing.fallback_slot_secs));
        schedule.push(entry);

        pos = (pos + 1) % catalog.len();
        idx += 1;
    }

    debug!(
        "schedule built: anchor={} entries={} rotation={:?}",
        anchor,
        schedule.len(),
        rotation
    );
    Ok(schedule)
}

/// The currently-airing entry and how far into it we are.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Located {
    /// Position in the schedule vec (not the 1-based `idx`).
    pub pos: usize,
    pub elapsed_secs: f64,
}

/// Find what is playing at `instant`.
///
/// Known-duration entries match on their half-open interval, first in
/// ascending index order.  Failing that, the most recently begun
/// open-ended entry counts as still airing.  `None` means nothing is
/// scheduled at that instant (for example, before the cycle anchor).
pub fn locate(schedule: &[ScheduleEntry], instant: DateTime<Utc>) -> Option<Located> {
    for (pos, entry) in schedule.iter().enumerate() {
        if let Some(end) = entry.end() {
            if instant >= entry.start && instant < end {
                return Some(Located {
                    pos,
                    elapsed_secs: elapsed_secs(entry, instant),
                });
            }
        }
    }

    schedule
        .iter()
        .enumerate()
        .filter(|(_, e)| e.duration.is_none() && e.start <= instant)
        .last()
        .map(|(pos, entry)| Located {
            pos,
            elapsed_secs: elapsed_secs(entry, instant),
        })
}

fn elapsed_secs(entry: &ScheduleEntry, instant: DateTime<Utc>) -> f64 {
    ((instant - entry.start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

fn secs(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(url: &str, duration: Option<f64>) -> Episode {
        Episode {
            url: url.to_string(),
            title: String::new(),
            duration,
            air_date: None,
        }
    }

    fn timing() -> TimingConfig {
        TimingConfig::default()
    }

    fn monday() -> DateTime<Utc> {
        // 2025-06-02 is a Monday.
        Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn anchor_is_most_recent_monday_midnight() {
        let thursday = Utc.with_ymd_and_hms(2025, 6, 5, 13, 37, 21).unwrap();
        assert_eq!(cycle_anchor(thursday), monday());
        // Already Monday 00:00 — no stepping.
        assert_eq!(cycle_anchor(monday()), monday());
        // Monday later in the day anchors to that same Monday.
        let monday_noon = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        assert_eq!(cycle_anchor(monday_noon), monday());
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let err = build_schedule(&[], monday(), Rotation::None, &timing()).unwrap_err();
        assert!(matches!(err, ChannelError::EmptyCatalog));
    }

    #[test]
    fn starts_are_strictly_increasing_and_chained() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", None), ep("c.mp3", Some(90.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        assert_eq!(schedule[0].start, monday());
        for pair in schedule.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert_eq!(pair[1].idx, pair[0].idx + 1);
            assert_eq!(
                pair[1].start,
                pair[0].start + secs(pair[0].effective_duration(1800.0))
            );
        }
    }

    #[test]
    fn covers_exactly_one_cycle() {
        let catalog = vec![ep("a.mp3", Some(7200.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();
        let end = monday() + Duration::days(7);

        let last = schedule.last().unwrap();
        assert!(last.start < end);
        // Accumulated time reaches or passes the boundary.
        assert!(last.start + secs(last.effective_duration(1800.0)) >= end);
    }

    #[test]
    fn wraps_catalog_cyclically() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", Some(3600.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        // Entry at position k references the same episode as position 0.
        assert_eq!(schedule[2].episode.url, schedule[0].episode.url);
        assert_eq!(schedule[3].episode.url, schedule[1].episode.url);
    }

    #[test]
    fn unknown_duration_occupies_fallback_slot() {
        let catalog = vec![ep("mystery.mp3", None)];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        assert_eq!(schedule[1].start - schedule[0].start, secs(1800.0));
        // A week of 30-minute slots.
        assert_eq!(schedule.len(), 7 * 48);
    }

    #[test]
    fn build_is_idempotent() {
        let catalog = vec![ep("a.mp3", Some(1234.0)), ep("b.mp3", None)];
        let reference = Utc.with_ymd_and_hms(2025, 6, 4, 9, 30, 0).unwrap();
        let first = build_schedule(&catalog, reference, Rotation::None, &timing()).unwrap();
        let second = build_schedule(&catalog, reference, Rotation::None, &timing()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn two_episode_scenario_table() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", Some(3600.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        assert_eq!(schedule[0].idx, 1);
        assert_eq!(schedule[0].episode.url, "a.mp3");
        assert_eq!(schedule[0].start, monday());

        assert_eq!(schedule[1].idx, 2);
        assert_eq!(schedule[1].episode.url, "b.mp3");
        assert_eq!(schedule[1].start, monday() + secs(1800.0));

        assert_eq!(schedule[2].idx, 3);
        assert_eq!(schedule[2].episode.url, "a.mp3");
        assert_eq!(schedule[2].start, monday() + secs(5400.0));
    }

    #[test]
    fn locate_at_entry_start_is_inclusive() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", Some(3600.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        for pos in 0..4 {
            let hit = locate(&schedule, schedule[pos].start).unwrap();
            assert_eq!(hit.pos, pos);
            assert_eq!(hit.elapsed_secs, 0.0);
        }
    }

    #[test]
    fn locate_at_entry_end_is_exclusive() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", Some(3600.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        let end = schedule[0].end().unwrap();
        let hit = locate(&schedule, end).unwrap();
        assert_ne!(hit.pos, 0);
        assert_eq!(hit.pos, 1);
    }

    #[test]
    fn locate_mid_episode() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", Some(3600.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        // Monday 00:45 is 15 minutes into b.mp3.
        let instant = Utc.with_ymd_and_hms(2025, 6, 2, 0, 45, 0).unwrap();
        let hit = locate(&schedule, instant).unwrap();
        assert_eq!(hit.pos, 1);
        assert_eq!(schedule[hit.pos].episode.url, "b.mp3");
        assert_eq!(hit.elapsed_secs, 900.0);
    }

    #[test]
    fn locate_before_anchor_is_none() {
        let catalog = vec![ep("a.mp3", Some(1800.0))];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        let sunday = Utc.with_ymd_and_hms(2025, 6, 1, 23, 0, 0).unwrap();
        assert!(locate(&schedule, sunday).is_none());
    }

    #[test]
    fn locate_prefers_latest_open_ended_entry() {
        let catalog = vec![ep("a.mp3", Some(1800.0)), ep("b.mp3", None), ep("c.mp3", None)];
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();

        // 01:15 falls in c.mp3's fallback slot (starts 01:00); b.mp3
        // started earlier but c.mp3 is the most recently begun.
        let instant = Utc.with_ymd_and_hms(2025, 6, 2, 1, 15, 0).unwrap();
        let hit = locate(&schedule, instant).unwrap();
        assert_eq!(schedule[hit.pos].episode.url, "c.mp3");
        assert_eq!(hit.elapsed_secs, 900.0);
    }

    #[test]
    fn no_rotation_starts_at_catalog_head() {
        let catalog: Vec<Episode> =
            (0..10).map(|i| ep(&format!("e{i}.mp3"), Some(3600.0))).collect();
        let schedule = build_schedule(&catalog, monday(), Rotation::None, &timing()).unwrap();
        assert_eq!(schedule[0].episode.url, "e0.mp3");
    }

    #[test]
    fn month_relative_rotation_offsets_by_week_of_month() {
        // 2025-06-02 is the first Monday of June 2025 (June 1 is a
        // Sunday): 5 Monday-anchored weeks, 10 episodes, 2 per week.
        let catalog: Vec<Episode> =
            (0..10).map(|i| ep(&format!("e{i}.mp3"), Some(3600.0))).collect();

        let week1 = build_schedule(&catalog, monday(), Rotation::MonthRelative, &timing()).unwrap();
        assert_eq!(week1[0].episode.url, "e0.mp3");

        let second_monday = Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap();
        let week2 =
            build_schedule(&catalog, second_monday, Rotation::MonthRelative, &timing()).unwrap();
        assert_eq!(week2[0].episode.url, "e2.mp3");

        let third_monday = Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap();
        let week3 =
            build_schedule(&catalog, third_monday, Rotation::MonthRelative, &timing()).unwrap();
        assert_eq!(week3[0].episode.url, "e4.mp3");
    }

    #[test]
    fn month_relative_offset_stays_in_bounds() {
        // Tiny catalog: the offset must reduce modulo the length.
        let catalog = vec![ep("a.mp3", Some(3600.0)), ep("b.mp3", Some(3600.0))];
        let fourth_monday = Utc.with_ymd_and_hms(2025, 6, 23, 0, 0, 0).unwrap();
        let schedule =
            build_schedule(&catalog, fourth_monday, Rotation::MonthRelative, &timing()).unwrap();
        assert!(catalog.iter().any(|e| e.url == schedule[0].episode.url));
    }
}
