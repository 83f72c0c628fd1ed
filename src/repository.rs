use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::StorageError;
use crate::settings::TimeTrackingSettings;
use crate::time_entry::{BillableRate, Task, TimeEntry, TimeEntryFilter, TimeEntryPage};

/// time entryの永続化を行うリポジトリ。
///
/// 各メソッドは単独でアトミックであること。複数の呼び出しをまたいだ整合性は保証しない。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    async fn get_time_entry(&self, id: &str) -> Result<Option<TimeEntry>, StorageError>;

    /// time entryを保存する。
    ///
    /// 同じユーザーの動作中のtime entryが既にある場合は`ActiveTimerExists`を返す。
    async fn create_time_entry(&self, entry: TimeEntry) -> Result<TimeEntry, StorageError>;

    /// 保存されているバージョンが`expected_version`と一致する場合のみ更新する。
    ///
    /// 更新後のバージョンは`expected_version + 1`になる。
    async fn update_time_entry(
        &self,
        entry: TimeEntry,
        expected_version: i64,
    ) -> Result<TimeEntry, StorageError>;

    async fn delete_time_entry(&self, id: &str) -> Result<(), StorageError>;

    async fn list_time_entries(
        &self,
        user_id: &str,
        filter: &TimeEntryFilter,
    ) -> Result<TimeEntryPage, StorageError>;

    async fn get_current_timer(&self, user_id: &str) -> Result<Option<TimeEntry>, StorageError>;

    async fn get_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<TimeTrackingSettings>, StorageError>;

    /// 設定を保存する。既にあれば置き換える。
    async fn save_settings(
        &self,
        settings: TimeTrackingSettings,
    ) -> Result<TimeTrackingSettings, StorageError>;

    async fn get_billable_rate(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<Option<BillableRate>, StorageError>;
}

/// タスクの参照。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StorageError>;
}
