use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::datetime::{self, month_start, next_month_start, parse_date};
use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::service::TimeEntryService;
use crate::summary::{GroupBy, SummaryOptions, TimeTrackingSummary};
use crate::time_entry::Principal;

/// `summary`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct SummaryArgs {
    #[clap(
        long = "from",
        help = "First day in the format YYYY-MM-DD; defaults to the start of this month",
        parse(try_from_str = parse_date),
    )]
    from: Option<DateTime<Utc>>,

    #[clap(
        long = "to",
        help = "Day after the last one in the format YYYY-MM-DD; defaults to a month after --from",
        parse(try_from_str = parse_date),
    )]
    to: Option<DateTime<Utc>>,

    #[clap(
        short = 'g',
        long = "group-by",
        default_value = "day",
        help = "day, week, month, project or task"
    )]
    group_by: GroupBy,

    #[clap(short = 'p', long = "project")]
    project: Option<String>,

    #[clap(short = 't', long = "task")]
    task: Option<String>,
}

/// `summary`サブコマンドの処理を行う。
///
/// 期間が指定されていない場合は、現在の月を集計する。
pub struct SummaryCommand<'a, R, C> {
    service: &'a TimeEntryService<R, C>,
    principal: &'a Principal,
}

impl<'a, R: TimeEntryRepository, C: TaskCatalog> SummaryCommand<'a, R, C> {
    pub fn new(service: &'a TimeEntryService<R, C>, principal: &'a Principal) -> Self {
        Self { service, principal }
    }

    pub async fn run(&self, args: SummaryArgs) -> Result<Vec<TimeTrackingSummary>> {
        let start_date = args.from.unwrap_or_else(|| month_start(datetime::now()));
        let end_date = args.to.unwrap_or_else(|| next_month_start(start_date));
        info!("Start at: {}, End at: {}", start_date, end_date);

        let options = SummaryOptions {
            project_id: args.project,
            task_id: args.task,
            start_date,
            end_date,
            group_by: args.group_by,
        };
        let summaries = self
            .service
            .get_time_summary(self.principal, options)
            .await
            .context("Failed to summarize time entries")?;
        info!("{} groups summarized by {}", summaries.len(), args.group_by);

        Ok(summaries)
    }
}
