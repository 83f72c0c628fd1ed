use std::io::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::settings::TimeTrackingSettings;
use crate::summary::TimeTrackingSummary;
use crate::time_entry::TimeEntry;

/// Consoleにtime entryを表示するためのtrait。
pub trait ConsolePresenter {
    /// タイムエントリーを表示する。
    ///
    /// # Arguments
    ///
    /// * `time_entries` - 表示するタイムエントリー
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()>;

    /// 集計結果を表示する。
    fn show_summaries(&mut self, summaries: &[TimeTrackingSummary]) -> Result<()>;

    fn show_settings(&mut self, settings: &TimeTrackingSettings) -> Result<()>;
}

/// タイムエントリーをMarkdownのlist形式で表示する。
pub struct ConsoleMarkdownList<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> ConsoleMarkdownList<'a, W> {
    /// 新しい`ConsoleMarkdownList`を返す。
    pub fn new(writer: &'a mut W) -> Self {
        Self { writer }
    }
}

impl<'a, W: Write> ConsolePresenter for ConsoleMarkdownList<'a, W> {
    // time entryを開始時刻順のlist形式で表示する。
    fn show_time_entries(&mut self, time_entries: &[TimeEntry]) -> Result<()> {
        let mut sorted_entries = time_entries.to_vec();
        sorted_entries.sort_by_key(|entry| entry.start_time);

        for entry in sorted_entries {
            writeln!(self.writer, "{}", format_entry(&entry))
                .with_context(|| format!("Failed to write time entry: {:?}", entry))?;
        }

        Ok(())
    }

    // 集計結果は時間単位で表示する。
    fn show_summaries(&mut self, summaries: &[TimeTrackingSummary]) -> Result<()> {
        for summary in summaries {
            let title = match (&summary.project_id, &summary.task_id) {
                (Some(project_id), _) => format!("project {}", project_id),
                (_, Some(task_id)) => format!("task {}", task_id),
                _ => format!(
                    "{} ~ {}",
                    summary.period_start.format("%Y-%m-%d"),
                    summary.period_end.format("%Y-%m-%d")
                ),
            };
            writeln!(
                self.writer,
                "## {}\n- total: {:.2}h\n- billable: {:.2}h\n- non-billable: {:.2}h\n- amount: {} {}",
                title,
                hours(summary.total_duration),
                hours(summary.billable_duration),
                hours(summary.non_billable_duration),
                summary.billable_amount.round_dp(2),
                summary.currency
            )
            .with_context(|| format!("Failed to write summary: {}", title))?;
        }

        Ok(())
    }

    fn show_settings(&mut self, settings: &TimeTrackingSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        writeln!(self.writer, "{}", json).context("Failed to write settings")?;

        Ok(())
    }
}

fn hours(seconds: i64) -> f64 {
    seconds as f64 / 3600.0
}

fn format_entry(entry: &TimeEntry) -> String {
    let start = entry.start_time.with_timezone(&Local);
    let end_str = entry
        .end_time
        .map(|end| end.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "now".to_string());
    let tags = entry
        .tags
        .iter()
        .map(|tag| format!(" #{}", tag))
        .collect::<String>();
    let invoiced = if entry.is_invoiced() { " (invoiced)" } else { "" };

    format!(
        "- {} {} ~ {} [{:.2}h]: {}{}{} `{}` v{}",
        start.format("%Y-%m-%d"),
        start.format("%H:%M"),
        end_str,
        hours(entry.duration),
        entry.description.as_deref().unwrap_or(""),
        tags,
        invoiced,
        entry.id,
        entry.version
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone, Utc};
    use rstest::rstest;
    use rust_decimal::Decimal;

    use super::ConsoleMarkdownList;
    use super::ConsolePresenter;
    use crate::settings::TimeTrackingSettings;
    use crate::summary::TimeTrackingSummary;
    use crate::time_entry::{EntrySource, TimeEntry};

    /// 正常系のテスト。
    #[rstest]
    #[case::no_entry(&[], "")]
    #[case::single(
        &[dummy_entry(1)],
        &expected_output(&dummy_entry(1)),
    )]
    #[case::no_stop(
        &[dummy_entry(4)],
        &expected_output(&dummy_entry(4)),
    )]
    #[case::double(
        &[dummy_entry(1), dummy_entry(2)],
        &[expected_output(&dummy_entry(1)),expected_output(&dummy_entry(2))].join(""),
    )]
    #[case::sort_with_start_time(
        &[dummy_entry(2), dummy_entry(1)],
        &[expected_output(&dummy_entry(1)),expected_output(&dummy_entry(2))].join(""),
    )]
    #[case::no_sort_with_same_start_time(
        &[dummy_entry(3), dummy_entry(2)],
        &[expected_output(&dummy_entry(3)),expected_output(&dummy_entry(2))].join(""),
    )]
    fn test_show_time_entries(#[case] input: &[TimeEntry], #[case] expected: &str) {
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_time_entries(input).unwrap();

        assert_eq!(String::from_utf8(writer).unwrap(), expected);
    }

    #[test]
    fn test_show_entry_with_tags_and_invoice() {
        let mut entry = dummy_entry(1);
        entry.tags = ["b".to_string(), "a".to_string()].into();
        entry.invoice_id = Some("inv-1".to_string());
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_time_entries(&[entry]).unwrap();

        let output = String::from_utf8(writer).unwrap();
        assert!(output.contains("[1.00h]: entry1 #a #b (invoiced) `e1` v1"));
    }

    #[test]
    fn test_show_summaries() {
        let summary = TimeTrackingSummary {
            user_id: "u1".to_string(),
            project_id: Some("p1".to_string()),
            task_id: None,
            period_start: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            period_end: Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap(),
            total_duration: 5400,
            billable_duration: 3600,
            non_billable_duration: 1800,
            billable_amount: Decimal::new(125, 0),
            currency: "USD".to_string(),
            entries: vec![],
        };
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter.show_summaries(&[summary]).unwrap();

        assert_eq!(
            String::from_utf8(writer).unwrap(),
            "## project p1\n- total: 1.50h\n- billable: 1.00h\n- non-billable: 0.50h\n- amount: 125 USD\n"
        );
    }

    #[test]
    fn test_show_settings() {
        let mut writer = Vec::new();
        let mut presenter = ConsoleMarkdownList::new(&mut writer);

        presenter
            .show_settings(&TimeTrackingSettings::defaults_for("u1"))
            .unwrap();

        let output = String::from_utf8(writer).unwrap();
        assert!(output.contains("\"roundingInterval\": 15"));
        assert!(output.contains("\"isWorkDay\": true"));
    }

    /// テスト用にダミーのTimeEntryを作成する。
    fn dummy_entry(pattern: u8) -> TimeEntry {
        let (id, description, start, stop, duration) = match pattern {
            1 => ("e1", "entry1", (2021, 1, 1, 1), Some((2021, 1, 1, 2)), 3600),
            2 => ("e2", "entry2", (2021, 1, 1, 3), Some((2021, 1, 1, 4)), 3600),
            3 => ("e3", "entry3", (2021, 1, 1, 3), Some((2021, 1, 1, 5)), 7200),
            4 => ("e4", "entry3", (2021, 1, 1, 5), None, 0),
            _ => panic!("Invalid pattern: {}", pattern),
        };
        let at = |(y, m, d, h): (i32, u32, u32, u32)| Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();

        TimeEntry {
            id: id.to_string(),
            task_id: "t1".to_string(), // 利用しないのでなんでも良い
            project_id: "p1".to_string(), // 利用しないのでなんでも良い
            user_id: "u1".to_string(),
            description: Some(description.to_string()),
            start_time: at(start),
            end_time: stop.map(at),
            duration,
            billable: true,
            billable_rate: None,
            invoice_id: None,
            tags: Default::default(),
            source: EntrySource::Timer,
            version: 1,
            created_at: at(start),
            updated_at: at(start),
        }
    }

    /// テスト用に出力の1 time entryに対する期待値の文字列を作成する。
    fn expected_output(entry: &TimeEntry) -> String {
        let start = entry.start_time.with_timezone(&Local);
        let end_str = entry
            .end_time
            .map(|stop| stop.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_else(|| "now".to_string());
        format!(
            "- {} {} ~ {} [{:.2}h]: {} `{}` v1\n",
            start.format("%Y-%m-%d"),
            start.format("%H:%M"),
            end_str,
            entry.duration as f64 / 3600.0,
            entry.description.clone().unwrap_or_default(),
            entry.id
        )
    }
}
