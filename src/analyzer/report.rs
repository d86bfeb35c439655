use crate::extract::records::JoinedActivityRow;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const ROLLING_WINDOW: usize = 7;

const DAY_ORDER: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapRow {
    pub activity: String,
    /// Completion rate per weekday, Monday first; `None` without samples.
    pub rates: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub days: Vec<String>,
    pub rows: Vec<HeatmapRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub completed: u64,
    pub rolling_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPoint {
    pub week_ending: NaiveDate,
    pub samples: u64,
    pub completion_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySeries {
    pub activity: String,
    pub points: Vec<WeeklyPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityAnalysis {
    pub date: String,
    pub generated_at: String,
    pub total_rows: usize,
    pub completed_rows: usize,
    pub completion_rate: Option<f64>,
    pub heatmap: Heatmap,
    pub daily_trend: Vec<DailyPoint>,
    pub weekly: Vec<WeeklySeries>,
}

#[derive(Debug)]
pub struct SavedReport {
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
}

pub fn build_analysis(date: NaiveDate, rows: &[JoinedActivityRow]) -> ActivityAnalysis {
    let generated_at: DateTime<Utc> = Utc::now();
    let completed_rows = rows.iter().filter(|row| row.completed).count();

    ActivityAnalysis {
        date: date.format("%Y-%m-%d").to_string(),
        generated_at: generated_at.to_rfc3339(),
        total_rows: rows.len(),
        completed_rows,
        completion_rate: ratio(completed_rows as u64, rows.len() as u64),
        heatmap: build_heatmap(rows),
        daily_trend: build_daily_trend(rows, ROLLING_WINDOW),
        weekly: build_weekly_rates(rows),
    }
}

pub fn day_of_week(row: &JoinedActivityRow) -> &'static str {
    day_name(row.created_time.weekday())
}

/// Mean completion per (activity, weekday), activities sorted by name.
pub fn build_heatmap(rows: &[JoinedActivityRow]) -> Heatmap {
    let cells = rows.iter().fold(
        BTreeMap::<String, [(u64, u64); 7]>::new(),
        |mut acc, row| {
            let slot = row.created_time.weekday().num_days_from_monday() as usize;
            let entry = &mut acc.entry(row.activity.clone()).or_default()[slot];
            entry.0 += u64::from(row.completed);
            entry.1 += 1;
            acc
        },
    );

    Heatmap {
        days: DAY_ORDER
            .iter()
            .map(|day| day_name(*day).to_string())
            .collect(),
        rows: cells
            .into_iter()
            .map(|(activity, counts)| HeatmapRow {
                activity,
                rates: counts
                    .iter()
                    .map(|(done, total)| ratio(*done, *total))
                    .collect(),
            })
            .collect(),
    }
}

/// Completed rows per calendar day, every day from the first to the last
/// completion, with a trailing mean over `window` samples.
pub fn build_daily_trend(rows: &[JoinedActivityRow], window: usize) -> Vec<DailyPoint> {
    let per_day = rows
        .iter()
        .filter(|row| row.completed)
        .fold(BTreeMap::<NaiveDate, u64>::new(), |mut acc, row| {
            *acc.entry(row.created_time.date_naive()).or_default() += 1;
            acc
        });

    let (Some(first), Some(last)) = (
        per_day.keys().next().copied(),
        per_day.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let counts = first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|day| (day, per_day.get(&day).copied().unwrap_or_default()))
        .collect::<Vec<_>>();

    counts
        .iter()
        .enumerate()
        .map(|(index, (date, completed))| {
            let rolling_average = (window > 0 && index + 1 >= window).then(|| {
                let sum = counts[index + 1 - window..=index]
                    .iter()
                    .map(|(_, count)| *count)
                    .sum::<u64>();
                sum as f64 / window as f64
            });

            DailyPoint {
                date: *date,
                completed: *completed,
                rolling_average,
            }
        })
        .collect()
}

/// Per-activity completion rate in weeks that end on Monday, activities in
/// order of first appearance. Weeks without samples inside the span are kept
/// with no rate.
pub fn build_weekly_rates(rows: &[JoinedActivityRow]) -> Vec<WeeklySeries> {
    let mut order = Vec::<String>::new();
    let mut buckets = HashMap::<String, BTreeMap<NaiveDate, (u64, u64)>>::new();

    for row in rows {
        if !buckets.contains_key(&row.activity) {
            order.push(row.activity.clone());
        }
        let entry = buckets
            .entry(row.activity.clone())
            .or_default()
            .entry(week_ending(row.created_time.date_naive()))
            .or_default();
        entry.0 += u64::from(row.completed);
        entry.1 += 1;
    }

    order
        .into_iter()
        .map(|activity| {
            let weeks = buckets.remove(&activity).unwrap_or_default();
            let points = match (weeks.keys().next(), weeks.keys().next_back()) {
                (Some(first), Some(last)) => {
                    let span = (*last - *first).num_days() / 7;
                    (0..=span)
                        .map(|offset| {
                            let week = *first + Duration::days(offset * 7);
                            let (done, total) = weeks.get(&week).copied().unwrap_or_default();
                            WeeklyPoint {
                                week_ending: week,
                                samples: total,
                                completion_rate: ratio(done, total),
                            }
                        })
                        .collect()
                }
                _ => Vec::new(),
            };

            WeeklySeries { activity, points }
        })
        .collect()
}

/// The Monday closing the week that contains `date`; a Monday closes its own week.
pub fn week_ending(date: NaiveDate) -> NaiveDate {
    let offset = (7 - date.weekday().num_days_from_monday()) % 7;
    date + Duration::days(i64::from(offset))
}

pub fn render_markdown(analysis: &ActivityAnalysis) -> String {
    let heatmap_header = format!(
        "| Activity | {} |\n|----------|{}",
        analysis
            .heatmap
            .days
            .iter()
            .map(|day| &day[..3])
            .collect::<Vec<_>>()
            .join(" | "),
        "-----|".repeat(analysis.heatmap.days.len())
    );
    let heatmap_rows = if analysis.heatmap.rows.is_empty() {
        "| No data |".to_string()
    } else {
        analysis
            .heatmap
            .rows
            .iter()
            .map(|row| {
                format!(
                    "| {} | {} |",
                    row.activity,
                    row.rates
                        .iter()
                        .map(|rate| format_rate(*rate))
                        .collect::<Vec<_>>()
                        .join(" | ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let trend_rows = if analysis.daily_trend.is_empty() {
        "- No completed activities".to_string()
    } else {
        analysis
            .daily_trend
            .iter()
            .rev()
            .take(14)
            .rev()
            .map(|point| {
                format!(
                    "| {} | {} | {} |",
                    point.date,
                    point.completed,
                    point
                        .rolling_average
                        .map(|value| format!("{value:.2}"))
                        .unwrap_or_else(|| "-".to_string())
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let weekly_rows = if analysis.weekly.is_empty() {
        "- No data".to_string()
    } else {
        analysis
            .weekly
            .iter()
            .map(|series| {
                let points = series
                    .points
                    .iter()
                    .map(|point| {
                        format!(
                            "{}: {}",
                            point.week_ending,
                            format_rate(point.completion_rate)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- **{}**: {}", series.activity, points)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "# Activity Completion Report - {}\n\n## Summary\n- Rows analyzed: {}\n- Completed: {}\n- Overall completion rate: {}\n\n## Completion Rate by Day of Week\n{}\n{}\n\n## Completed Activities per Day (last 14 days, {}-day rolling average)\n| Date | Completed | Rolling avg |\n|------|-----------|-------------|\n{}\n\n## Weekly Completion Rate (weeks ending Monday)\n{}\n",
        analysis.date,
        analysis.total_rows,
        analysis.completed_rows,
        format_rate(analysis.completion_rate),
        heatmap_header,
        heatmap_rows,
        ROLLING_WINDOW,
        trend_rows,
        weekly_rows
    )
}

pub fn save_report_files(analysis: &ActivityAnalysis, report_dir: &Path) -> Result<SavedReport> {
    fs::create_dir_all(report_dir).with_context(|| {
        format!(
            "Failed to create report directory: {}",
            report_dir.display()
        )
    })?;

    let date = analysis.date.clone();
    let markdown_path = report_dir.join(format!("{date}-analysis.md"));
    let json_path = report_dir.join(format!("{date}-analysis.json"));

    fs::write(&markdown_path, render_markdown(analysis)).with_context(|| {
        format!(
            "Failed to write Markdown report: {}",
            markdown_path.display()
        )
    })?;

    let json_content =
        serde_json::to_string_pretty(analysis).context("Failed to serialize analysis JSON")?;
    fs::write(&json_path, json_content)
        .with_context(|| format!("Failed to write JSON report: {}", json_path.display()))?;

    Ok(SavedReport {
        markdown_path,
        json_path,
    })
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn ratio(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

fn format_rate(rate: Option<f64>) -> String {
    rate.map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| "-".to_string())
}
