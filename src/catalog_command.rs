use anyhow::{bail, Context, Result};
use log::info;
use rust_decimal::Decimal;

use crate::sqlite_store::SqliteStore;
use crate::time_entry::{BillableRate, Principal, Role, Task};

/// `project`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct ProjectArgs {
    id: String,

    #[clap(short = 'n', long = "name")]
    name: String,
}

/// `task`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct TaskArgs {
    id: String,

    #[clap(short = 'p', long = "project")]
    project: String,

    #[clap(short = 'n', long = "name")]
    name: String,
}

/// `rate`サブコマンドの引数。
#[derive(Debug, clap::Args)]
pub struct RateArgs {
    #[clap(short = 'p', long = "project")]
    project: String,

    #[clap(long = "hourly")]
    hourly: Decimal,

    #[clap(long = "currency", help = "Defaults to the configured currency")]
    currency: Option<String>,

    #[clap(long = "user", help = "Admins may set the rate of another user")]
    user: Option<String>,
}

/// プロジェクト・タスク・単価をストアに登録するコマンド。
pub struct CatalogCommand<'a> {
    store: &'a SqliteStore,
    principal: &'a Principal,
}

impl<'a> CatalogCommand<'a> {
    pub fn new(store: &'a SqliteStore, principal: &'a Principal) -> Self {
        Self { store, principal }
    }

    pub fn add_project(&self, args: ProjectArgs) -> Result<()> {
        self.store
            .upsert_project(&args.id, &args.name)
            .with_context(|| format!("Failed to save project {}", args.id))?;
        info!("Project {} saved", args.id);

        Ok(())
    }

    pub fn add_task(&self, args: TaskArgs) -> Result<Task> {
        let task = Task {
            id: args.id,
            project_id: args.project,
            name: args.name,
        };
        self.store
            .upsert_task(&task)
            .with_context(|| format!("Failed to save task {}", task.id))?;
        info!("Task {} saved in project {}", task.id, task.project_id);

        Ok(task)
    }

    /// 時間単価を設定する。他のユーザーの単価は管理者のみ設定できる。
    pub fn set_rate(&self, args: RateArgs, default_currency: &str) -> Result<BillableRate> {
        if args.hourly.is_sign_negative() {
            bail!("Hourly rate must not be negative: {}", args.hourly);
        }
        let user_id = match args.user {
            Some(user_id) if user_id != self.principal.user_id => {
                if self.principal.role != Role::Admin {
                    bail!("Only admins can set the rate of another user");
                }
                user_id
            }
            _ => self.principal.user_id.clone(),
        };

        let rate = BillableRate {
            user_id,
            project_id: args.project,
            hourly_rate: args.hourly,
            currency: args.currency.unwrap_or_else(|| default_currency.to_string()),
        };
        self.store
            .set_billable_rate(&rate)
            .with_context(|| format!("Failed to save rate for project {}", rate.project_id))?;
        info!(
            "Rate for {} on {} set to {} {}",
            rate.user_id, rate.project_id, rate.hourly_rate, rate.currency
        );

        Ok(rate)
    }
}
