use std::collections::BTreeMap;

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimeEntryError};

/// 1日の就業時間。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub is_work_day: bool,
}

/// ユーザーごとの時間記録の設定。
///
/// `working_hours`のキーは曜日で、0が日曜日、6が土曜日。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeTrackingSettings {
    pub user_id: String,
    /// 丸め単位(分)。0なら丸めない。
    pub rounding_interval: u32,
    pub default_billable_rate: Decimal,
    pub auto_stop_timer_after_inactivity: u32,
    pub reminder_interval: u32,
    pub working_hours: BTreeMap<u8, WorkingHours>,
}

impl TimeTrackingSettings {
    /// 設定が保存されていないユーザー向けの既定値を返す。
    ///
    /// 15分単位の丸め、30分で自動停止、リマインダーなし、月曜から金曜の09:00~17:00。
    pub fn defaults_for(user_id: &str) -> Self {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN);
        let five = NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN);
        let working_hours = (0u8..7)
            .map(|weekday| {
                (
                    weekday,
                    WorkingHours {
                        start: nine,
                        end: five,
                        is_work_day: (1..=5).contains(&weekday),
                    },
                )
            })
            .collect();

        Self {
            user_id: user_id.to_string(),
            rounding_interval: 15,
            default_billable_rate: Decimal::ZERO,
            auto_stop_timer_after_inactivity: 30,
            reminder_interval: 0,
            working_hours,
        }
    }

    /// 部分更新をマージした新しい設定を返す。`user_id`は変わらない。
    pub fn merged(&self, update: SettingsUpdate) -> Result<Self> {
        update.validate()?;

        let mut merged = self.clone();
        if let Some(interval) = update.rounding_interval {
            merged.rounding_interval = interval;
        }
        if let Some(rate) = update.default_billable_rate {
            merged.default_billable_rate = rate;
        }
        if let Some(minutes) = update.auto_stop_timer_after_inactivity {
            merged.auto_stop_timer_after_inactivity = minutes;
        }
        if let Some(minutes) = update.reminder_interval {
            merged.reminder_interval = minutes;
        }
        if let Some(hours) = update.working_hours {
            merged.working_hours.extend(hours);
        }

        Ok(merged)
    }
}

/// 設定の部分更新。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub rounding_interval: Option<u32>,
    pub default_billable_rate: Option<Decimal>,
    pub auto_stop_timer_after_inactivity: Option<u32>,
    pub reminder_interval: Option<u32>,
    pub working_hours: Option<BTreeMap<u8, WorkingHours>>,
}

impl SettingsUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(rate) = self.default_billable_rate {
            if rate.is_sign_negative() {
                return Err(TimeEntryError::validation(
                    "Default billable rate must not be negative",
                ));
            }
        }

        for (weekday, hours) in self.working_hours.iter().flatten() {
            if *weekday > 6 {
                return Err(TimeEntryError::validation(format!(
                    "Invalid weekday {} in working hours",
                    weekday
                )));
            }
            if hours.is_work_day && hours.start >= hours.end {
                return Err(TimeEntryError::validation(format!(
                    "Working hours for weekday {} must start before they end",
                    weekday
                )));
            }
        }

        Ok(())
    }
}
