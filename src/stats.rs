use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::domain::DatedRecord;
use crate::models::{Habit, MediaItem, MediaStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStats {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub completion_rate: u32,
    pub total_completions: u32,
}

pub fn compute_stats<R: DatedRecord>(records: &[R], habit: &Habit) -> HabitStats {
    compute_stats_in(&Local, Local::now().date_naive(), records, habit)
}

/// [compute_stats_in] with the creation day read in UTC.
pub fn compute_stats_at<R: DatedRecord>(today: NaiveDate, records: &[R], habit: &Habit) -> HabitStats {
    compute_stats_in(&Utc, today, records, habit)
}

/// Streaks and completion rate for one habit's records as of `today`. `zone` decides which
/// calendar day the habit's creation instant falls on.
///
/// The two streaks read gaps differently. The current streak walks back day by day and stops
/// at the first day without a done record. The longest streak only looks at records that
/// exist, so a missing day is skipped and only a record marked not-done resets the run.
pub fn compute_stats_in<Tz: TimeZone, R: DatedRecord>(
    zone: &Tz,
    today: NaiveDate,
    records: &[R],
    habit: &Habit,
) -> HabitStats {
    let completed: HashSet<NaiveDate> = records
        .iter()
        .filter(|record| record.is_done())
        .map(DatedRecord::date)
        .collect();
    let total_completions = records.iter().filter(|record| record.is_done()).count() as u32;

    HabitStats {
        current_streak: current_streak(today, &completed),
        longest_streak: longest_streak(records),
        completion_rate: completion_rate(today, habit.created_on_in(zone), total_completions),
        total_completions,
    }
}

fn current_streak(today: NaiveDate, completed: &HashSet<NaiveDate>) -> u32 {
    // A day not yet done today does not end a streak that ran through yesterday.
    let mut cursor = if completed.contains(&today) {
        Some(today)
    } else {
        today.pred_opt()
    };

    let mut streak = 0;
    while let Some(day) = cursor.filter(|day| completed.contains(day)) {
        streak += 1;
        cursor = day.pred_opt();
    }
    streak
}

fn longest_streak<R: DatedRecord>(records: &[R]) -> u32 {
    let mut sorted: Vec<&R> = records.iter().collect();
    sorted.sort_by_key(|record| record.date());

    let mut longest = 0;
    let mut run = 0;
    for record in sorted {
        if record.is_done() {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

fn completion_rate(today: NaiveDate, created_on: NaiveDate, completions: u32) -> u32 {
    let days = days_inclusive(created_on, today);
    if days <= 0 {
        return 0;
    }
    percentage(completions as u64, days as u64)
}

fn percentage(part: u64, whole: u64) -> u32 {
    (100.0 * part as f64 / whole as f64).round() as u32
}

/// First and last day of `year`.
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapDay {
    pub date: NaiveDate,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub days: Vec<HeatmapDay>,
    pub total: u32,
    pub percentage: u32,
}

/// Done days of `year` as heatmap cells, plus how much of the year they cover.
pub fn year_summary<R: DatedRecord>(records: &[R], year: i32) -> YearSummary {
    let mut days: Vec<HeatmapDay> = records
        .iter()
        .filter(|record| record.is_done() && record.date().year() == year)
        .map(|record| HeatmapDay {
            date: record.date(),
            value: 1,
        })
        .collect();
    days.sort_by_key(|day| day.date);

    let days_in_year = year_bounds(year)
        .map(|(_, last)| last.ordinal())
        .unwrap_or(365);
    let total = days.len() as u32;

    YearSummary {
        year,
        days,
        total,
        percentage: percentage(total as u64, days_in_year as u64),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOverview {
    pub total: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub dropped: u32,
    /// Mean of ratings above zero, one decimal; 0 when nothing is rated.
    pub average_rating: f64,
}

pub fn media_overview(items: &[MediaItem]) -> MediaOverview {
    let count = |pred: &dyn Fn(MediaStatus) -> bool| {
        items.iter().filter(|item| pred(item.status)).count() as u32
    };
    let ratings: Vec<u8> = items
        .iter()
        .filter_map(|item| item.rating)
        .filter(|rating| *rating > 0)
        .collect();
    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        let mean = ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64;
        (mean * 10.0).round() / 10.0
    };

    MediaOverview {
        total: items.len() as u32,
        completed: count(&|status| status == MediaStatus::Completed),
        in_progress: count(&MediaStatus::is_in_progress),
        dropped: count(&|status| status == MediaStatus::Dropped),
        average_rating,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitOverview {
    pub total: u32,
    pub done_today: u32,
    /// Habits with at least one cached record. An approximation of "active streaks", not a
    /// streak computation; see [compute_stats_at] for the real thing.
    pub habits_with_history: u32,
}

pub fn habit_overview_at<R: DatedRecord>(
    today: NaiveDate,
    habits: &[Habit],
    records: &HashMap<String, Vec<R>>,
) -> HabitOverview {
    let records_of = |habit: &Habit| records.get(&habit.id).map(Vec::as_slice).unwrap_or_default();

    HabitOverview {
        total: habits.len() as u32,
        done_today: habits
            .iter()
            .filter(|habit| {
                records_of(habit)
                    .iter()
                    .any(|record| record.date() == today && record.is_done())
            })
            .count() as u32,
        habits_with_history: habits
            .iter()
            .filter(|habit| !records_of(habit).is_empty())
            .count() as u32,
    }
}

/// Days between two dates, inclusive on both ends.
pub fn days_inclusive(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days() + 1
}
