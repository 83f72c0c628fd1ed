use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 作業の記録1件を表す。
///
/// `end_time`が`None`の間はタイマーが動いている。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub user_id: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// 丸め済みの秒数。動作中は0。
    pub duration: i64,
    pub billable: bool,
    pub billable_rate: Option<Decimal>,
    pub invoice_id: Option<String>,
    pub tags: BTreeSet<String>,
    pub source: EntrySource,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_running(&self) -> bool {
        self.end_time.is_none()
    }

    /// 請求書に紐付いているかどうか。紐付いた後は説明とタグ以外変更できない。
    pub fn is_invoiced(&self) -> bool {
        self.invoice_id.is_some()
    }
}

/// time entryの作成元。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Timer,
    Manual,
}

impl EntrySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySource::Timer => "timer",
            EntrySource::Manual => "manual",
        }
    }
}

/// タスク。必ずいずれかのプロジェクトに属する。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub name: String,
}

/// ユーザー・プロジェクトごとの時間単価。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillableRate {
    pub user_id: String,
    pub project_id: String,
    pub hourly_rate: Decimal,
    pub currency: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Unknown role: {}", s)),
        }
    }
}

/// 認証済みの呼び出し元。サービスの全操作に渡す。
#[derive(Clone, Debug, PartialEq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// タイマー開始の入力。
#[derive(Clone, Debug)]
pub struct StartTimer {
    pub task_id: String,
    pub description: Option<String>,
    pub billable: bool,
    pub tags: BTreeSet<String>,
}

impl StartTimer {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            description: None,
            billable: true,
            tags: BTreeSet::new(),
        }
    }
}

/// 手動入力の入力。`duration`が`None`なら開始・終了時刻から計算する。
#[derive(Clone, Debug)]
pub struct ManualEntry {
    pub task_id: String,
    pub project_id: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Option<i64>,
    pub billable: bool,
    pub billable_rate: Option<Decimal>,
    pub tags: BTreeSet<String>,
}

impl ManualEntry {
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            project_id: project_id.into(),
            description: None,
            start_time,
            end_time,
            duration: None,
            billable: true,
            billable_rate: None,
            tags: BTreeSet::new(),
        }
    }
}

/// time entryの部分更新。
///
/// `version`は呼び出し元が最後に読んだバージョンで、指定された場合はその値で楽観ロックを行う。
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryUpdate {
    pub task_id: Option<String>,
    pub project_id: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub billable: Option<bool>,
    pub billable_rate: Option<Decimal>,
    pub invoice_id: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub version: Option<i64>,
}

impl TimeEntryUpdate {
    /// 請求済みでも変更できるフィールド。
    pub const INVOICE_MUTABLE_FIELDS: [&'static str; 2] = ["description", "tags"];

    /// 値が指定されたフィールド名をJSONの名前で返す。`version`は含めない。
    pub fn changed_fields(&self) -> Vec<&'static str> {
        [
            ("taskId", self.task_id.is_some()),
            ("projectId", self.project_id.is_some()),
            ("description", self.description.is_some()),
            ("startTime", self.start_time.is_some()),
            ("endTime", self.end_time.is_some()),
            ("billable", self.billable.is_some()),
            ("billableRate", self.billable_rate.is_some()),
            ("invoiceId", self.invoice_id.is_some()),
            ("tags", self.tags.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, changed)| changed.then_some(name))
        .collect()
    }
}

/// 一覧取得のフィルター。期間は`start_date <= start_time < end_date`。
#[derive(Clone, Debug, PartialEq)]
pub struct TimeEntryFilter {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub billable: Option<bool>,
    pub page: u32,
    pub limit: u32,
}

impl Default for TimeEntryFilter {
    fn default() -> Self {
        Self {
            project_id: None,
            task_id: None,
            start_date: None,
            end_date: None,
            billable: None,
            page: 1,
            limit: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryPage {
    pub entries: Vec<TimeEntry>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{TimeEntryUpdate, TimeEntry, EntrySource};

    #[test]
    fn test_changed_fields_ignores_version() {
        let update = TimeEntryUpdate {
            billable: Some(false),
            tags: Some(["a".to_string()].into()),
            version: Some(3),
            ..Default::default()
        };

        assert_eq!(update.changed_fields(), vec!["billable", "tags"]);
    }

    #[test]
    fn test_time_entry_serializes_with_camel_case() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let entry = TimeEntry {
            id: "e1".to_string(),
            task_id: "t1".to_string(),
            project_id: "p1".to_string(),
            user_id: "u1".to_string(),
            description: None,
            start_time: start,
            end_time: None,
            duration: 0,
            billable: true,
            billable_rate: None,
            invoice_id: None,
            tags: ["b".to_string(), "a".to_string()].into(),
            source: EntrySource::Timer,
            version: 1,
            created_at: start,
            updated_at: start,
        };

        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["taskId"], json!("t1"));
        assert_eq!(value["endTime"], json!(null));
        assert_eq!(value["source"], json!("timer"));
        assert_eq!(value["tags"], json!(["a", "b"]));
        assert!(entry.is_running());
        assert!(!entry.is_invoiced());
    }
}
