//! 作業時間を記録するためのライブラリ。
//!
//! タイマーと手動入力によるtime entryの作成、請求済みエントリーの保護、
//! バージョンによる楽観ロック、期間・プロジェクトごとの集計を提供する。

pub mod catalog_command;
pub mod config;
pub mod console;
pub mod datetime;
pub mod duration;
pub mod entry_command;
pub mod error;
pub mod logger;
pub mod repository;
pub mod retry;
pub mod service;
pub mod settings;
pub mod settings_command;
pub mod sqlite_store;
pub mod summary;
pub mod summary_command;
pub mod time_entry;
pub mod timer_command;
