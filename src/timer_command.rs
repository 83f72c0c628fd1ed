use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::datetime::{self, parse_datetime};
use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::service::TimeEntryService;
use crate::time_entry::{Principal, StartTimer, TimeEntry};

/// `start`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StartArgs {
    #[clap(short = 't', long = "task", help = "Task to track")]
    task: String,

    #[clap(short = 'd', long = "description")]
    description: Option<String>,

    #[clap(long = "non-billable", help = "Record the time as non-billable")]
    non_billable: bool,

    #[clap(long = "tag", help = "Label for the entry; may be repeated")]
    tags: Vec<String>,
}

/// `stop`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct StopArgs {
    #[clap(long = "id", help = "Entry to stop; defaults to the running timer")]
    id: Option<String>,

    #[clap(
        long = "at",
        help = "End time as RFC3339 or 'YYYY-MM-DD HH:MM'; defaults to now",
        parse(try_from_str = parse_datetime),
    )]
    at: Option<DateTime<Utc>>,
}

/// タイマーの開始・停止を行うコマンド。
pub struct TimerCommand<'a, R, C> {
    service: &'a TimeEntryService<R, C>,
    principal: &'a Principal,
}

impl<'a, R: TimeEntryRepository, C: TaskCatalog> TimerCommand<'a, R, C> {
    /// 新しい`TimerCommand`を返す。
    ///
    /// # Arguments
    /// * `service` - time entryを操作するサービス
    /// * `principal` - 操作するユーザー
    pub fn new(service: &'a TimeEntryService<R, C>, principal: &'a Principal) -> Self {
        Self { service, principal }
    }

    /// `start`サブコマンドの処理を行う。
    pub async fn start(&self, args: StartArgs) -> Result<TimeEntry> {
        let request = StartTimer {
            task_id: args.task,
            description: args.description,
            billable: !args.non_billable,
            tags: args.tags.into_iter().collect(),
        };

        let entry = self
            .service
            .start_timer(self.principal, request)
            .await
            .context("Failed to start timer")?;
        info!("Timer {} started at {}", entry.id, entry.start_time);

        Ok(entry)
    }

    /// `stop`サブコマンドの処理を行う。
    ///
    /// IDが指定されていない場合は動作中のタイマーを停止する。
    pub async fn stop(&self, args: StopArgs) -> Result<TimeEntry> {
        let id = match args.id {
            Some(id) => id,
            None => {
                self.service
                    .get_current_timer(self.principal)
                    .await
                    .context("Failed to look up running timer")?
                    .context("No timer is running")?
                    .id
            }
        };
        let end_time = args.at.unwrap_or_else(datetime::now);

        let entry = self
            .service
            .stop_timer(self.principal, &id, end_time)
            .await
            .with_context(|| format!("Failed to stop timer {}", id))?;
        info!("Timer {} stopped after {}s", entry.id, entry.duration);

        Ok(entry)
    }

    /// `current`サブコマンドの処理を行う。
    pub async fn current(&self) -> Result<Option<TimeEntry>> {
        self.service
            .get_current_timer(self.principal)
            .await
            .context("Failed to look up running timer")
    }
}
