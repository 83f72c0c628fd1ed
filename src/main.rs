use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use timekeep::catalog_command::{CatalogCommand, ProjectArgs, RateArgs, TaskArgs};
use timekeep::config::{self, Config};
use timekeep::console::{ConsoleMarkdownList, ConsolePresenter};
use timekeep::entry_command::{AddArgs, DeleteArgs, EditArgs, EntryCommand, ListArgs};
use timekeep::logger;
use timekeep::service::TimeEntryService;
use timekeep::settings_command::{SettingsArgs, SettingsCommand};
use timekeep::sqlite_store::SqliteStore;
use timekeep::summary_command::{SummaryArgs, SummaryCommand};
use timekeep::timer_command::{StartArgs, StopArgs, TimerCommand};

/// 作業時間を記録するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- project p1 --name Website
/// $ cargo run -- task t1 --project p1 --name Design
/// $ cargo run -- start --task t1
/// $ cargo run -- stop
/// $ cargo run -- summary --group-by week
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(subcommand)]
    subcommand: SubCommands,

    #[clap(short = 'v', long = "verbose", parse(from_occurrences), global = true)]
    verbose: u64,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// タイマーを開始する
    Start(StartArgs),
    /// タイマーを停止する
    Stop(StopArgs),
    /// 動作中のタイマーを表示する
    Current,
    /// time entryを手動で追加する
    Add(AddArgs),
    /// time entryを変更する
    Edit(EditArgs),
    /// time entryを削除する
    Delete(DeleteArgs),
    /// time entryを一覧表示する
    List(ListArgs),
    /// 期間内の作業時間を集計する
    Summary(SummaryArgs),
    /// 設定を表示・変更する
    Settings(SettingsArgs),
    /// プロジェクトを登録する
    Project(ProjectArgs),
    /// タスクを登録する
    Task(TaskArgs),
    /// 時間単価を設定する
    Rate(RateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logger::init(config::log_level(args.verbose))?;
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Acting as {} ({}), database: {}",
        config.principal.user_id,
        config.principal.role,
        config.database_path.display()
    );

    let store = SqliteStore::open(&config.database_path)?;
    let service = TimeEntryService::new(store.clone(), store.clone(), config.service_options());
    let principal = &config.principal;

    let mut stdout = io::stdout();
    let mut presenter = ConsoleMarkdownList::new(&mut stdout);

    match args.subcommand {
        SubCommands::Start(start) => {
            let entry = TimerCommand::new(&service, principal).start(start).await?;
            presenter.show_time_entries(&[entry])?;
        }
        SubCommands::Stop(stop) => {
            let entry = TimerCommand::new(&service, principal).stop(stop).await?;
            presenter.show_time_entries(&[entry])?;
        }
        SubCommands::Current => {
            let current = TimerCommand::new(&service, principal).current().await?;
            match current {
                Some(entry) => presenter.show_time_entries(&[entry])?,
                None => info!("No timer is running"),
            }
        }
        SubCommands::Add(add) => {
            let entry = EntryCommand::new(&service, principal).add(add).await?;
            presenter.show_time_entries(&[entry])?;
        }
        SubCommands::Edit(edit) => {
            let entry = EntryCommand::new(&service, principal).edit(edit).await?;
            presenter.show_time_entries(&[entry])?;
        }
        SubCommands::Delete(delete) => {
            EntryCommand::new(&service, principal).delete(delete).await?;
        }
        SubCommands::List(list) => {
            let page = EntryCommand::new(&service, principal).list(list).await?;
            presenter.show_time_entries(&page.entries)?;
        }
        SubCommands::Summary(summary) => {
            let summaries = SummaryCommand::new(&service, principal).run(summary).await?;
            presenter.show_summaries(&summaries)?;
        }
        SubCommands::Settings(settings) => {
            let settings = SettingsCommand::new(&service, principal).run(settings).await?;
            presenter.show_settings(&settings)?;
        }
        SubCommands::Project(project) => {
            CatalogCommand::new(&store, principal).add_project(project)?;
        }
        SubCommands::Task(task) => {
            CatalogCommand::new(&store, principal).add_task(task)?;
        }
        SubCommands::Rate(rate) => {
            CatalogCommand::new(&store, principal).set_rate(rate, &config.currency)?;
        }
    }

    Ok(())
}
