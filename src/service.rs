use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::datetime;
use crate::duration::{apply_time_rounding, elapsed_seconds};
use crate::error::{Result, TimeEntryError};
use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::retry::{with_retry, RetryPolicy};
use crate::settings::{SettingsUpdate, TimeTrackingSettings};
use crate::summary::{summarize, SummaryOptions, TimeTrackingSummary};
use crate::time_entry::{
    EntrySource, ManualEntry, Principal, StartTimer, Task, TimeEntry, TimeEntryFilter,
    TimeEntryPage, TimeEntryUpdate,
};

/// 集計時に取得するtime entryの上限。
const SUMMARY_ENTRY_LIMIT: u32 = 10_000;

/// `TimeEntryService`の設定。
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub retry: RetryPolicy,
    pub currency: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            currency: "USD".to_string(),
        }
    }
}

/// time entryの操作をまとめたサービス。
///
/// 検証、所有者の確認、時間の丸め、リトライを担当し、永続化は`TimeEntryRepository`に任せる。
/// 動作中タイマーの一意性とバージョンの比較はリポジトリの書き込みで保証する。
pub struct TimeEntryService<R, C> {
    repository: R,
    catalog: C,
    options: ServiceOptions,
}

impl<R: TimeEntryRepository, C: TaskCatalog> TimeEntryService<R, C> {
    /// 新しい`TimeEntryService`を返す。
    ///
    /// # Arguments
    ///
    /// * `repository` - time entryと設定を保存するリポジトリ
    /// * `catalog` - タスクを参照するためのカタログ
    /// * `options` - リトライと通貨の設定
    pub fn new(repository: R, catalog: C, options: ServiceOptions) -> Self {
        Self {
            repository,
            catalog,
            options,
        }
    }

    /// タイマーを開始する。
    ///
    /// 既に動作中のタイマーがある場合は検証エラーになる。
    /// 一時的なストレージの失敗は`RetryPolicy`に従って再試行する。
    pub async fn start_timer(&self, principal: &Principal, request: StartTimer) -> Result<TimeEntry> {
        let request = &request;
        with_retry(&self.options.retry, move || {
            self.try_start_timer(principal, request)
        })
        .await
    }

    async fn try_start_timer(&self, principal: &Principal, request: &StartTimer) -> Result<TimeEntry> {
        require(&principal.user_id)?;
        require(&request.task_id)?;

        if self
            .repository
            .get_current_timer(&principal.user_id)
            .await?
            .is_some()
        {
            return Err(TimeEntryError::validation(
                "You already have an active timer running",
            ));
        }

        let task = self.find_task(&request.task_id).await?;
        let billable_rate = self
            .resolve_billable_rate(&principal.user_id, &task.project_id)
            .await?;
        let now = datetime::now();

        let entry = TimeEntry {
            id: Uuid::new_v4().to_string(),
            task_id: task.id,
            project_id: task.project_id,
            user_id: principal.user_id.clone(),
            description: request.description.clone(),
            start_time: now,
            end_time: None,
            duration: 0,
            billable: request.billable,
            billable_rate,
            invoice_id: None,
            tags: request.tags.clone(),
            source: EntrySource::Timer,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        Ok(self.repository.create_time_entry(entry).await?)
    }

    /// タイマーを停止し、丸めた経過時間を記録する。
    pub async fn stop_timer(
        &self,
        principal: &Principal,
        entry_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        with_retry(&self.options.retry, move || {
            self.try_stop_timer(principal, entry_id, end_time)
        })
        .await
    }

    async fn try_stop_timer(
        &self,
        principal: &Principal,
        entry_id: &str,
        end_time: DateTime<Utc>,
    ) -> Result<TimeEntry> {
        let entry = self.owned_entry(principal, entry_id, "stop this timer").await?;
        if !entry.is_running() {
            return Err(TimeEntryError::validation("This timer is already stopped"));
        }
        if entry.is_invoiced() {
            return Err(TimeEntryError::InvoicedEntryLocked {
                fields: vec!["endTime".to_string()],
            });
        }

        let elapsed = elapsed_seconds(entry.start_time, end_time)?;
        let settings = self.settings_for(&principal.user_id).await?;

        let mut stopped = entry.clone();
        stopped.end_time = Some(end_time);
        stopped.duration = apply_time_rounding(elapsed, settings.rounding_interval.into());
        if stopped.billable && stopped.billable_rate.is_none() {
            stopped.billable_rate = self
                .resolve_billable_rate(&principal.user_id, &entry.project_id)
                .await?;
        }
        stopped.updated_at = datetime::now();

        Ok(self
            .repository
            .update_time_entry(stopped, entry.version)
            .await?)
    }

    /// 手動でtime entryを作成する。
    pub async fn create_manual_entry(
        &self,
        principal: &Principal,
        request: ManualEntry,
    ) -> Result<TimeEntry> {
        let request = &request;
        with_retry(&self.options.retry, move || {
            self.try_create_manual_entry(principal, request)
        })
        .await
    }

    async fn try_create_manual_entry(
        &self,
        principal: &Principal,
        request: &ManualEntry,
    ) -> Result<TimeEntry> {
        require(&principal.user_id)?;
        require(&request.task_id)?;
        require(&request.project_id)?;
        if request.end_time <= request.start_time {
            return Err(TimeEntryError::validation(
                "End time must be after start time",
            ));
        }

        let task = self.find_task(&request.task_id).await?;
        if task.project_id != request.project_id {
            return Err(TimeEntryError::validation(format!(
                "Task {} does not belong to project {}",
                task.id, request.project_id
            )));
        }

        let raw_duration = match request.duration {
            Some(duration) if duration < 0 => {
                return Err(TimeEntryError::validation("Duration must not be negative"));
            }
            Some(duration) => duration,
            None => elapsed_seconds(request.start_time, request.end_time)?,
        };
        let settings = self.settings_for(&principal.user_id).await?;

        let billable_rate = match request.billable_rate {
            Some(rate) => Some(rate),
            None if request.billable => {
                self.resolve_billable_rate(&principal.user_id, &request.project_id)
                    .await?
            }
            None => None,
        };
        let now = datetime::now();

        let entry = TimeEntry {
            id: Uuid::new_v4().to_string(),
            task_id: task.id,
            project_id: request.project_id.clone(),
            user_id: principal.user_id.clone(),
            description: request.description.clone(),
            start_time: request.start_time,
            end_time: Some(request.end_time),
            duration: apply_time_rounding(raw_duration, settings.rounding_interval.into()),
            billable: request.billable,
            billable_rate,
            invoice_id: None,
            tags: request.tags.clone(),
            source: EntrySource::Manual,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        Ok(self.repository.create_time_entry(entry).await?)
    }

    /// time entryを部分更新する。
    ///
    /// 請求済みのtime entryは説明とタグしか変更できない。
    /// `update.version`が指定されていればその値で、なければ読み込んだ時点のバージョンで楽観ロックを行う。
    /// 競合した場合はリトライせずに`Concurrency`を返す。
    pub async fn update_time_entry(
        &self,
        principal: &Principal,
        entry_id: &str,
        update: TimeEntryUpdate,
    ) -> Result<TimeEntry> {
        let entry = self.owned_entry(principal, entry_id, "update this time entry").await?;

        let changed = update.changed_fields();
        if changed.is_empty() {
            return Err(TimeEntryError::validation("No fields to update"));
        }
        if entry.is_invoiced() {
            let locked: Vec<String> = changed
                .into_iter()
                .filter(|field| !TimeEntryUpdate::INVOICE_MUTABLE_FIELDS.contains(field))
                .map(|field| field.to_string())
                .collect();
            if !locked.is_empty() {
                return Err(TimeEntryError::InvoicedEntryLocked { fields: locked });
            }
        }

        let expected_version = update.version.unwrap_or(entry.version);
        let mut updated = entry.clone();

        if update.task_id.is_some() || update.project_id.is_some() {
            let task_id = update.task_id.unwrap_or_else(|| entry.task_id.clone());
            let project_id = update.project_id.unwrap_or_else(|| entry.project_id.clone());
            let task = self.find_task(&task_id).await?;
            if task.project_id != project_id {
                return Err(TimeEntryError::validation(format!(
                    "Task {} does not belong to project {}",
                    task_id, project_id
                )));
            }
            updated.task_id = task_id;
            updated.project_id = project_id;
        }

        if update.start_time.is_some() || update.end_time.is_some() {
            updated.start_time = update.start_time.unwrap_or(entry.start_time);
            updated.end_time = update.end_time.or(entry.end_time);
            if let Some(end_time) = updated.end_time {
                let elapsed = elapsed_seconds(updated.start_time, end_time)?;
                let settings = self.settings_for(&principal.user_id).await?;
                updated.duration = apply_time_rounding(elapsed, settings.rounding_interval.into());
            }
        }

        if let Some(description) = update.description {
            updated.description = Some(description).filter(|text| !text.is_empty());
        }
        if let Some(billable) = update.billable {
            updated.billable = billable;
        }
        if let Some(rate) = update.billable_rate {
            updated.billable_rate = Some(rate);
        }
        if let Some(invoice_id) = update.invoice_id {
            if updated.is_running() {
                return Err(TimeEntryError::validation("Cannot invoice a running time entry"));
            }
            updated.invoice_id = Some(invoice_id);
        }
        if let Some(tags) = update.tags {
            updated.tags = tags;
        }

        // 終了時刻の指定で停止した場合も`stop_timer`と同じく単価を確定する
        if entry.is_running()
            && !updated.is_running()
            && updated.billable
            && updated.billable_rate.is_none()
        {
            updated.billable_rate = self
                .resolve_billable_rate(&principal.user_id, &updated.project_id)
                .await?;
        }
        updated.updated_at = datetime::now();

        Ok(self
            .repository
            .update_time_entry(updated, expected_version)
            .await?)
    }

    /// time entryを削除する。請求済みのものは削除できない。
    pub async fn delete_time_entry(&self, principal: &Principal, entry_id: &str) -> Result<()> {
        let entry = self.owned_entry(principal, entry_id, "delete this time entry").await?;
        if entry.is_invoiced() {
            return Err(TimeEntryError::validation(
                "Cannot delete a time entry that has been invoiced",
            ));
        }

        Ok(self.repository.delete_time_entry(entry_id).await?)
    }

    pub async fn get_user_time_entries(
        &self,
        principal: &Principal,
        filter: TimeEntryFilter,
    ) -> Result<TimeEntryPage> {
        if filter.page == 0 || filter.limit == 0 {
            return Err(TimeEntryError::validation(
                "Page and limit must be at least 1",
            ));
        }

        Ok(self
            .repository
            .list_time_entries(&principal.user_id, &filter)
            .await?)
    }

    /// 期間内のtime entryをグループごとに集計する。
    pub async fn get_time_summary(
        &self,
        principal: &Principal,
        options: SummaryOptions,
    ) -> Result<Vec<TimeTrackingSummary>> {
        if options.end_date <= options.start_date {
            return Err(TimeEntryError::validation(
                "Summary end date must be after start date",
            ));
        }

        let filter = TimeEntryFilter {
            project_id: options.project_id.clone(),
            task_id: options.task_id.clone(),
            start_date: Some(options.start_date),
            end_date: Some(options.end_date),
            billable: None,
            page: 1,
            limit: SUMMARY_ENTRY_LIMIT,
        };
        let page = self
            .repository
            .list_time_entries(&principal.user_id, &filter)
            .await?;

        Ok(summarize(
            &principal.user_id,
            &page.entries,
            &options,
            &self.options.currency,
        ))
    }

    pub async fn get_current_timer(&self, principal: &Principal) -> Result<Option<TimeEntry>> {
        Ok(self
            .repository
            .get_current_timer(&principal.user_id)
            .await?)
    }

    /// 設定を返す。未保存なら既定値を保存してから返す。
    pub async fn get_user_settings(&self, principal: &Principal) -> Result<TimeTrackingSettings> {
        self.settings_for(&principal.user_id).await
    }

    pub async fn update_user_settings(
        &self,
        principal: &Principal,
        update: SettingsUpdate,
    ) -> Result<TimeTrackingSettings> {
        let current = self.settings_for(&principal.user_id).await?;
        let merged = current.merged(update)?;

        Ok(self.repository.save_settings(merged).await?)
    }

    async fn settings_for(&self, user_id: &str) -> Result<TimeTrackingSettings> {
        if let Some(settings) = self.repository.get_settings(user_id).await? {
            return Ok(settings);
        }

        let defaults = TimeTrackingSettings::defaults_for(user_id);
        Ok(self.repository.save_settings(defaults).await?)
    }

    async fn find_task(&self, task_id: &str) -> Result<Task> {
        self.catalog
            .get_task(task_id)
            .await?
            .ok_or_else(|| TimeEntryError::NotFound(format!("Task {}", task_id)))
    }

    /// プロジェクトの単価表、なければ設定の既定単価を使う。どちらもなければ`None`。
    async fn resolve_billable_rate(&self, user_id: &str, project_id: &str) -> Result<Option<Decimal>> {
        if let Some(rate) = self
            .repository
            .get_billable_rate(user_id, project_id)
            .await?
        {
            return Ok(Some(rate.hourly_rate));
        }

        let settings = self.settings_for(user_id).await?;
        Ok(Some(settings.default_billable_rate).filter(|rate| *rate > Decimal::ZERO))
    }

    async fn owned_entry(
        &self,
        principal: &Principal,
        entry_id: &str,
        action: &str,
    ) -> Result<TimeEntry> {
        let entry = self
            .repository
            .get_time_entry(entry_id)
            .await?
            .ok_or_else(|| TimeEntryError::NotFound(format!("Time entry {}", entry_id)))?;
        if entry.user_id != principal.user_id {
            return Err(TimeEntryError::Permission(format!(
                "You do not have permission to {}",
                action
            )));
        }

        Ok(entry)
    }
}

fn require(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TimeEntryError::validation("Missing required fields"));
    }
    Ok(())
}
