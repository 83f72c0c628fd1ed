use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use rust_decimal::Decimal;

use crate::datetime::{parse_date, parse_datetime};
use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::service::TimeEntryService;
use crate::time_entry::{
    ManualEntry, Principal, TimeEntry, TimeEntryFilter, TimeEntryPage, TimeEntryUpdate,
};

/// `add`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct AddArgs {
    #[clap(short = 't', long = "task")]
    task: String,

    #[clap(short = 'p', long = "project")]
    project: String,

    #[clap(long = "start", parse(try_from_str = parse_datetime))]
    start: DateTime<Utc>,

    #[clap(long = "end", parse(try_from_str = parse_datetime))]
    end: DateTime<Utc>,

    #[clap(long = "duration", help = "Duration in seconds; defaults to end - start")]
    duration: Option<i64>,

    #[clap(short = 'd', long = "description")]
    description: Option<String>,

    #[clap(long = "non-billable")]
    non_billable: bool,

    #[clap(long = "rate", help = "Hourly rate; defaults to the project or user rate")]
    rate: Option<Decimal>,

    #[clap(long = "tag")]
    tags: Vec<String>,
}

/// `edit`サブコマンドの引数。指定したフィールドだけを変更する。
#[derive(Debug, clap::Args)]
pub struct EditArgs {
    id: String,

    #[clap(long = "task")]
    task: Option<String>,

    #[clap(long = "project")]
    project: Option<String>,

    #[clap(short = 'd', long = "description")]
    description: Option<String>,

    #[clap(long = "start", parse(try_from_str = parse_datetime))]
    start: Option<DateTime<Utc>>,

    #[clap(long = "end", parse(try_from_str = parse_datetime))]
    end: Option<DateTime<Utc>>,

    #[clap(long = "billable")]
    billable: Option<bool>,

    #[clap(long = "rate")]
    rate: Option<Decimal>,

    #[clap(long = "invoice")]
    invoice: Option<String>,

    #[clap(long = "tag", help = "Replaces all tags; may be repeated")]
    tags: Vec<String>,

    #[clap(long = "expected-version", help = "Version last seen; rejects the edit if it changed")]
    version: Option<i64>,
}

/// `delete`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct DeleteArgs {
    id: String,
}

/// `list`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct ListArgs {
    #[clap(short = 'p', long = "project")]
    project: Option<String>,

    #[clap(short = 't', long = "task")]
    task: Option<String>,

    #[clap(
        long = "from",
        help = "First day in the format YYYY-MM-DD",
        parse(try_from_str = parse_date),
    )]
    from: Option<DateTime<Utc>>,

    #[clap(
        long = "to",
        help = "Day after the last one in the format YYYY-MM-DD",
        parse(try_from_str = parse_date),
    )]
    to: Option<DateTime<Utc>>,

    #[clap(long = "billable")]
    billable: Option<bool>,

    #[clap(long = "page", default_value = "1")]
    page: u32,

    #[clap(long = "limit", default_value = "50")]
    limit: u32,
}

/// time entryの手動入力・編集・削除・一覧を行うコマンド。
pub struct EntryCommand<'a, R, C> {
    service: &'a TimeEntryService<R, C>,
    principal: &'a Principal,
}

impl<'a, R: TimeEntryRepository, C: TaskCatalog> EntryCommand<'a, R, C> {
    pub fn new(service: &'a TimeEntryService<R, C>, principal: &'a Principal) -> Self {
        Self { service, principal }
    }

    /// `add`サブコマンドの処理を行う。
    pub async fn add(&self, args: AddArgs) -> Result<TimeEntry> {
        let request = ManualEntry {
            task_id: args.task,
            project_id: args.project,
            description: args.description,
            start_time: args.start,
            end_time: args.end,
            duration: args.duration,
            billable: !args.non_billable,
            billable_rate: args.rate,
            tags: args.tags.into_iter().collect(),
        };

        let entry = self
            .service
            .create_manual_entry(self.principal, request)
            .await
            .context("Failed to create time entry")?;
        info!("Time entry {} created", entry.id);

        Ok(entry)
    }

    /// `edit`サブコマンドの処理を行う。
    pub async fn edit(&self, args: EditArgs) -> Result<TimeEntry> {
        let update = TimeEntryUpdate {
            task_id: args.task,
            project_id: args.project,
            description: args.description,
            start_time: args.start,
            end_time: args.end,
            billable: args.billable,
            billable_rate: args.rate,
            invoice_id: args.invoice,
            tags: (!args.tags.is_empty()).then(|| args.tags.into_iter().collect()),
            version: args.version,
        };

        let entry = self
            .service
            .update_time_entry(self.principal, &args.id, update)
            .await
            .with_context(|| format!("Failed to update time entry {}", args.id))?;
        info!("Time entry {} updated to version {}", entry.id, entry.version);

        Ok(entry)
    }

    /// `delete`サブコマンドの処理を行う。
    pub async fn delete(&self, args: DeleteArgs) -> Result<()> {
        self.service
            .delete_time_entry(self.principal, &args.id)
            .await
            .with_context(|| format!("Failed to delete time entry {}", args.id))?;
        info!("Time entry {} deleted", args.id);

        Ok(())
    }

    /// `list`サブコマンドの処理を行う。
    pub async fn list(&self, args: ListArgs) -> Result<TimeEntryPage> {
        let filter = TimeEntryFilter {
            project_id: args.project,
            task_id: args.task,
            start_date: args.from,
            end_date: args.to,
            billable: args.billable,
            page: args.page,
            limit: args.limit,
        };

        let page = self
            .service
            .get_user_time_entries(self.principal, filter)
            .await
            .context("Failed to retrieve time entries")?;
        info!(
            "Time entries retrieved: {} of {} (page {})",
            page.entries.len(),
            page.total,
            page.page
        );

        Ok(page)
    }
}
