use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use log::info;
use rust_decimal::Decimal;

use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::service::TimeEntryService;
use crate::settings::{SettingsUpdate, TimeTrackingSettings, WorkingHours};
use crate::time_entry::Principal;

/// `settings`サブコマンドの引数。何も指定しなければ現在の設定を表示する。
#[derive(Debug, clap::Args)]
pub struct SettingsArgs {
    #[clap(long = "rounding", help = "Rounding interval in minutes; 0 disables rounding")]
    rounding: Option<u32>,

    #[clap(long = "rate", help = "Hourly rate used when a project has no rate")]
    rate: Option<Decimal>,

    #[clap(long = "auto-stop", help = "Minutes of inactivity before a timer stops")]
    auto_stop: Option<u32>,

    #[clap(long = "reminder", help = "Reminder interval in minutes; 0 disables reminders")]
    reminder: Option<u32>,

    #[clap(
        long = "hours",
        help = "Working hours as WEEKDAY=HH:MM-HH:MM (0 is Sunday); may be repeated",
        parse(try_from_str = parse_working_hours),
    )]
    hours: Vec<(u8, WorkingHours)>,

    #[clap(long = "day-off", help = "Weekday without work (0 is Sunday); may be repeated")]
    days_off: Vec<u8>,
}

impl SettingsArgs {
    /// 引数を部分更新に変換する。何も指定されていなければ`None`。
    ///
    /// `--day-off`は`current`の就業時間を残したまま休日にする。
    fn into_update(self, current: &BTreeMap<u8, WorkingHours>) -> Option<SettingsUpdate> {
        let mut working_hours: BTreeMap<u8, WorkingHours> = self.hours.into_iter().collect();
        for weekday in self.days_off {
            let hours = working_hours.entry(weekday).or_insert_with(|| {
                current.get(&weekday).cloned().unwrap_or(WorkingHours {
                    start: NaiveTime::MIN,
                    end: NaiveTime::MIN,
                    is_work_day: false,
                })
            });
            hours.is_work_day = false;
        }

        let update = SettingsUpdate {
            rounding_interval: self.rounding,
            default_billable_rate: self.rate,
            auto_stop_timer_after_inactivity: self.auto_stop,
            reminder_interval: self.reminder,
            working_hours: (!working_hours.is_empty()).then_some(working_hours),
        };
        let is_empty = update.rounding_interval.is_none()
            && update.default_billable_rate.is_none()
            && update.auto_stop_timer_after_inactivity.is_none()
            && update.reminder_interval.is_none()
            && update.working_hours.is_none();

        (!is_empty).then_some(update)
    }
}

/// `WEEKDAY=HH:MM-HH:MM`をパースする。
fn parse_working_hours(s: &str) -> Result<(u8, WorkingHours)> {
    let (weekday, range) = s
        .split_once('=')
        .with_context(|| format!("Expected WEEKDAY=HH:MM-HH:MM: {}", s))?;
    let weekday = weekday
        .parse::<u8>()
        .with_context(|| format!("Failed to parse weekday: {}", weekday))?;
    let (start, end) = range
        .split_once('-')
        .with_context(|| format!("Expected HH:MM-HH:MM: {}", range))?;
    let parse_time = |time: &str| {
        NaiveTime::parse_from_str(time, "%H:%M")
            .with_context(|| format!("Failed to parse time: {}", time))
    };

    Ok((
        weekday,
        WorkingHours {
            start: parse_time(start)?,
            end: parse_time(end)?,
            is_work_day: true,
        },
    ))
}

/// 設定の表示・変更を行うコマンド。
pub struct SettingsCommand<'a, R, C> {
    service: &'a TimeEntryService<R, C>,
    principal: &'a Principal,
}

impl<'a, R: TimeEntryRepository, C: TaskCatalog> SettingsCommand<'a, R, C> {
    pub fn new(service: &'a TimeEntryService<R, C>, principal: &'a Principal) -> Self {
        Self { service, principal }
    }

    pub async fn run(&self, args: SettingsArgs) -> Result<TimeTrackingSettings> {
        let current = self
            .service
            .get_user_settings(self.principal)
            .await
            .context("Failed to read settings")?;
        let Some(update) = args.into_update(&current.working_hours) else {
            return Ok(current);
        };

        let settings = self
            .service
            .update_user_settings(self.principal, update)
            .await
            .context("Failed to update settings")?;
        info!("Settings updated for {}", settings.user_id);

        Ok(settings)
    }
}
