//! Read-only projections of the schedule for renderers.  The core owns
//! none of the presentation; it only emits these values on every state
//! change and lets a table, card, or log line paint them.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use crate::schedule::ScheduleEntry;

/// How many entries before the current one the table window keeps.
pub const WINDOW_BEFORE: usize = 1;
/// How many entries from the current one onward the table window keeps.
pub const WINDOW_AFTER: usize = 9;

/// Per-entry status column.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryStatus {
    /// Not the current entry.
    Inactive,
    /// Current entry, playback not running yet (loading or blocked).
    Waiting,
    /// Current entry, audio flowing.
    Playing { elapsed_secs: f64 },
}

impl EntryStatus {
    pub fn label(&self) -> String {
        match self {
            EntryStatus::Inactive => "-".to_string(),
            EntryStatus::Waiting => "Waiting".to_string(),
            EntryStatus::Playing { elapsed_secs } => {
                format!("Playing ({})", format_clock(*elapsed_secs))
            }
        }
    }
}

/// One row of the schedule table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRow {
    pub idx: u32,
    pub display_start: String,
    pub label: String,
    pub air_date: String,
    pub status: String,
    /// True for entries the broadcast has already moved past; renderers
    /// dim these.
    pub past: bool,
}

/// Summary of the entry currently on the air.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub idx: u32,
    pub label: String,
    pub air_date: Option<String>,
    pub elapsed_secs: f64,
    pub duration_secs: Option<f64>,
}

impl NowPlaying {
    /// Playback fraction in 0..=1 when the total length is known.
    pub fn progress(&self) -> Option<f64> {
        self.duration_secs
            .filter(|d| *d > 0.0)
            .map(|d| (self.elapsed_secs / d).clamp(0.0, 1.0))
    }
}

/// Project the visible slice of the schedule around the current entry:
/// one entry of context behind, the rest ahead.  With no current entry
/// the whole schedule is visible.
pub fn project_rows(
    schedule: &[ScheduleEntry],
    current: Option<usize>,
    current_status: &EntryStatus,
) -> Vec<EntryRow> {
    let (lo, hi) = match current {
        Some(cur) => (cur.saturating_sub(WINDOW_BEFORE), (cur + WINDOW_AFTER).min(schedule.len())),
        None => (0, schedule.len()),
    };

    schedule[lo..hi]
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let pos = lo + i;
            let status = match current {
                Some(cur) if cur == pos => current_status.label(),
                _ => EntryStatus::Inactive.label(),
            };
            EntryRow {
                idx: entry.idx,
                display_start: format_start_local(entry.start),
                label: entry.episode.label().to_string(),
                air_date: entry
                    .episode
                    .air_date
                    .as_deref()
                    .map(format_air_date)
                    .unwrap_or_else(|| "-".to_string()),
                status,
                past: current.map(|cur| pos < cur).unwrap_or(false),
            }
        })
        .collect()
}

/// The entry scheduled right after `current`, if any.
pub fn up_next(schedule: &[ScheduleEntry], current: usize) -> Option<&ScheduleEntry> {
    schedule.get(current + 1)
}

/// Elapsed-time clock: `mm:ss` under an hour, `h:mm:ss` from there on.
pub fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Entry start instant rendered in the viewer's local time zone.
pub fn format_start_local(start: DateTime<Utc>) -> String {
    start
        .with_timezone(&Local)
        .format("%a %b %e %H:%M:%S")
        .to_string()
}

/// Original air date for display: "July 4, 2019".  Accepts RFC 3339 or
/// a bare date; anything else passes through untouched.
pub fn format_air_date(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.naive_utc().date().format("%B %-d, %Y").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%B %-d, %Y").to_string();
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Episode;
    use crate::config::TimingConfig;
    use crate::schedule::{build_schedule, Rotation};
    use chrono::TimeZone;

    fn sample_schedule(len: usize) -> Vec<ScheduleEntry> {
        let catalog: Vec<Episode> = (0..len)
            .map(|i| Episode {
                url: format!("e{i}.mp3"),
                title: String::new(),
                duration: Some(86400.0 * 7.0 / len as f64),
                air_date: Some("2019-07-04T12:00:00Z".to_string()),
            })
            .collect();
        let monday = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        build_schedule(&catalog, monday, Rotation::None, &TimingConfig::default()).unwrap()
    }

    #[test]
    fn clock_formats() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(59.9), "00:59");
        assert_eq!(format_clock(900.0), "15:00");
        assert_eq!(format_clock(3600.0), "1:00:00");
        assert_eq!(format_clock(3723.0), "1:02:03");
        assert_eq!(format_clock(-5.0), "00:00");
    }

    #[test]
    fn air_date_formats() {
        assert_eq!(format_air_date("2019-07-04T12:00:00Z"), "July 4, 2019");
        assert_eq!(format_air_date("2019-07-04"), "July 4, 2019");
        assert_eq!(format_air_date("not a date"), "not a date");
    }

    #[test]
    fn status_labels() {
        assert_eq!(EntryStatus::Inactive.label(), "-");
        assert_eq!(EntryStatus::Waiting.label(), "Waiting");
        assert_eq!(
            EntryStatus::Playing { elapsed_secs: 3723.0 }.label(),
            "Playing (1:02:03)"
        );
    }

    #[test]
    fn window_slides_around_current() {
        let schedule = sample_schedule(20);
        let rows = project_rows(&schedule, Some(5), &EntryStatus::Waiting);

        assert_eq!(rows.len(), WINDOW_BEFORE + WINDOW_AFTER);
        assert_eq!(rows[0].idx, schedule[4].idx);
        assert!(rows[0].past);
        assert_eq!(rows[1].status, "Waiting");
        assert!(!rows[1].past);
        assert_eq!(rows[2].status, "-");
    }

    #[test]
    fn window_clamps_at_edges() {
        let schedule = sample_schedule(4);
        let head = project_rows(&schedule, Some(0), &EntryStatus::Waiting);
        assert_eq!(head[0].idx, 1);
        assert_eq!(head.len(), 4);

        let tail = project_rows(&schedule, Some(3), &EntryStatus::Waiting);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.last().unwrap().status, "Waiting");
    }

    #[test]
    fn no_current_shows_everything() {
        let schedule = sample_schedule(12);
        let rows = project_rows(&schedule, None, &EntryStatus::Inactive);
        assert_eq!(rows.len(), 12);
        assert!(rows.iter().all(|r| r.status == "-" && !r.past));
    }

    #[test]
    fn up_next_is_the_following_entry() {
        let schedule = sample_schedule(4);
        assert_eq!(up_next(&schedule, 0).unwrap().idx, 2);
        let last = schedule.len() - 1;
        assert!(up_next(&schedule, last).is_none());
    }

    #[test]
    fn progress_fraction() {
        let np = NowPlaying {
            idx: 1,
            label: "x".into(),
            air_date: None,
            elapsed_secs: 900.0,
            duration_secs: Some(3600.0),
        };
        assert_eq!(np.progress(), Some(0.25));

        let open_ended = NowPlaying { duration_secs: None, ..np };
        assert_eq!(open_ended.progress(), None);
    }
}
