use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::datetime::{day_start, month_start, next_month_start, week_start};
use crate::time_entry::TimeEntry;

/// 集計のグループ化単位。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Day,
    Week,
    Month,
    Project,
    Task,
}

impl FromStr for GroupBy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(GroupBy::Day),
            "week" => Ok(GroupBy::Week),
            "month" => Ok(GroupBy::Month),
            "project" => Ok(GroupBy::Project),
            "task" => Ok(GroupBy::Task),
            _ => Err(anyhow::anyhow!(
                "Unknown grouping: {} (expected day, week, month, project or task)",
                s
            )),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupBy::Day => "day",
            GroupBy::Week => "week",
            GroupBy::Month => "month",
            GroupBy::Project => "project",
            GroupBy::Task => "task",
        };
        write!(f, "{}", name)
    }
}

/// 集計の条件。
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryOptions {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub group_by: GroupBy,
}

/// グループごとの集計結果。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeTrackingSummary {
    pub user_id: String,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_duration: i64,
    pub billable_duration: i64,
    pub non_billable_duration: i64,
    pub billable_amount: Decimal,
    pub currency: String,
    pub entries: Vec<TimeEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Period(DateTime<Utc>),
    Id(String),
}

fn group_key(entry: &TimeEntry, group_by: GroupBy) -> GroupKey {
    match group_by {
        GroupBy::Day => GroupKey::Period(day_start(entry.start_time)),
        GroupBy::Week => GroupKey::Period(week_start(entry.start_time)),
        GroupBy::Month => GroupKey::Period(month_start(entry.start_time)),
        GroupBy::Project => GroupKey::Id(entry.project_id.clone()),
        GroupBy::Task => GroupKey::Id(entry.task_id.clone()),
    }
}

/// time entryをグループ化して集計する。結果はグループのキー順に並ぶ。
///
/// 日・週・月のグループはUTCの暦で区切り、週は日曜日始まりとする。
/// プロジェクト・タスクのグループの期間は指定された集計期間全体とする。
pub fn summarize(
    user_id: &str,
    entries: &[TimeEntry],
    options: &SummaryOptions,
    currency: &str,
) -> Vec<TimeTrackingSummary> {
    let groups: BTreeMap<GroupKey, Vec<TimeEntry>> =
        entries.iter().fold(BTreeMap::new(), |mut acc, entry| {
            acc.entry(group_key(entry, options.group_by))
                .or_default()
                .push(entry.clone());
            acc
        });

    groups
        .into_iter()
        .map(|(key, entries)| {
            let (period_start, period_end) = match &key {
                GroupKey::Period(start) => (*start, period_end(*start, options.group_by)),
                GroupKey::Id(_) => (options.start_date, options.end_date),
            };
            let (project_id, task_id) = match (&key, options.group_by) {
                (GroupKey::Id(id), GroupBy::Project) => (Some(id.clone()), None),
                (GroupKey::Id(id), GroupBy::Task) => (None, Some(id.clone())),
                _ => (None, None),
            };
            let totals = Totals::of(&entries);

            TimeTrackingSummary {
                user_id: user_id.to_string(),
                project_id,
                task_id,
                period_start,
                period_end,
                total_duration: totals.billable + totals.non_billable,
                billable_duration: totals.billable,
                non_billable_duration: totals.non_billable,
                billable_amount: totals.amount,
                currency: currency.to_string(),
                entries,
            }
        })
        .collect()
}

fn period_end(start: DateTime<Utc>, group_by: GroupBy) -> DateTime<Utc> {
    match group_by {
        GroupBy::Week => start + Duration::days(7),
        GroupBy::Month => next_month_start(start),
        _ => start + Duration::days(1),
    }
}

#[derive(Default)]
struct Totals {
    billable: i64,
    non_billable: i64,
    amount: Decimal,
}

impl Totals {
    fn of(entries: &[TimeEntry]) -> Self {
        entries.iter().fold(Totals::default(), |mut totals, entry| {
            if entry.billable {
                totals.billable += entry.duration;
                if let Some(rate) = entry.billable_rate {
                    totals.amount += rate * Decimal::from(entry.duration) / Decimal::from(3600);
                }
            } else {
                totals.non_billable += entry.duration;
            }
            totals
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{summarize, GroupBy, SummaryOptions};
    use crate::time_entry::{EntrySource, TimeEntry};

    fn entry(
        id: &str,
        project: &str,
        start: DateTime<Utc>,
        seconds: i64,
        billable: bool,
        rate: Option<Decimal>,
    ) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            task_id: format!("{}-task", project),
            project_id: project.to_string(),
            user_id: "u1".to_string(),
            description: None,
            start_time: start,
            end_time: Some(start + Duration::seconds(seconds)),
            duration: seconds,
            billable,
            billable_rate: rate,
            invoice_id: None,
            tags: Default::default(),
            source: EntrySource::Manual,
            version: 1,
            created_at: start,
            updated_at: start,
        }
    }

    fn options(group_by: GroupBy) -> SummaryOptions {
        SummaryOptions {
            project_id: None,
            task_id: None,
            start_date: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            group_by,
        }
    }

    fn sample() -> Vec<TimeEntry> {
        let rate = Some(Decimal::new(100, 0));
        vec![
            entry("e1", "p1", Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap(), 3600, true, rate),
            entry("e2", "p2", Utc.with_ymd_and_hms(2024, 3, 11, 13, 0, 0).unwrap(), 1800, false, None),
            entry("e3", "p1", Utc.with_ymd_and_hms(2024, 3, 12, 9, 0, 0).unwrap(), 900, true, rate),
            entry("e4", "p1", Utc.with_ymd_and_hms(2024, 3, 12, 10, 0, 0).unwrap(), 900, true, None),
        ]
    }

    #[test]
    fn test_summarize_by_day() {
        let entries = sample();

        let summaries = summarize("u1", &entries, &options(GroupBy::Day), "USD");

        assert_eq!(summaries.len(), 2);
        let grand_total: i64 = entries.iter().map(|entry| entry.duration).sum();
        assert_eq!(
            summaries.iter().map(|s| s.total_duration).sum::<i64>(),
            grand_total
        );

        let first = &summaries[0];
        assert_eq!(first.period_start, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(first.period_end, Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap());
        assert_eq!(first.billable_duration, 3600);
        assert_eq!(first.non_billable_duration, 1800);
        assert_eq!(first.billable_amount, Decimal::new(100, 0));
        assert_eq!(first.currency, "USD");

        // 単価のないentryは金額に含めない
        let second = &summaries[1];
        assert_eq!(second.billable_duration, 1800);
        assert_eq!(second.billable_amount, Decimal::new(25, 0));
    }

    #[test]
    fn test_summarize_by_week_and_month() {
        let entries = sample();

        let weeks = summarize("u1", &entries, &options(GroupBy::Week), "USD");
        let months = summarize("u1", &entries, &options(GroupBy::Month), "USD");

        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].period_start, Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(weeks[0].period_end, Utc.with_ymd_and_hms(2024, 3, 17, 0, 0, 0).unwrap());
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].period_end, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(months[0].entries.len(), 4);
    }

    #[test]
    fn test_summarize_by_project_uses_requested_range() {
        let entries = sample();
        let options = options(GroupBy::Project);

        let summaries = summarize("u1", &entries, &options, "EUR");

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].project_id.as_deref(), Some("p1"));
        assert_eq!(summaries[0].task_id, None);
        assert_eq!(summaries[0].total_duration, 5400);
        assert_eq!(summaries[0].period_start, options.start_date);
        assert_eq!(summaries[0].period_end, options.end_date);
        assert_eq!(summaries[1].project_id.as_deref(), Some("p2"));
        assert_eq!(summaries[1].billable_amount, Decimal::ZERO);
    }

    #[test]
    fn test_summarize_no_entries() {
        assert!(summarize("u1", &[], &options(GroupBy::Task), "USD").is_empty());
    }
}
