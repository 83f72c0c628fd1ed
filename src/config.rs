use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;

use crate::retry::RetryPolicy;
use crate::service::ServiceOptions;
use crate::time_entry::{Principal, Role};

/// 環境変数から読み込む設定。
///
/// | 環境変数 | 既定値 |
/// | --- | --- |
/// | `TIMEKEEP_DATABASE` | `<data_dir>/timekeep/timekeep.db` |
/// | `TIMEKEEP_USER` | `USER` |
/// | `TIMEKEEP_ROLE` | `member` |
/// | `TIMEKEEP_CURRENCY` | `USD` |
/// | `TIMEKEEP_RETRY_DELAY_MS` | `1000` |
#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub principal: Principal,
    pub currency: String,
    pub retry_delay: Duration,
}

impl Config {
    /// 環境変数から設定を読み込む。
    ///
    /// ユーザーが特定できない場合はエラーを返す。
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = match lookup("TIMEKEEP_DATABASE") {
            Some(path) => PathBuf::from(path),
            None => dirs::data_dir()
                .context("Failed to locate data directory; set TIMEKEEP_DATABASE")?
                .join("timekeep")
                .join("timekeep.db"),
        };
        let user_id = lookup("TIMEKEEP_USER")
            .or_else(|| lookup("USER"))
            .filter(|user| !user.is_empty())
            .context("TIMEKEEP_USER or USER must be set")?;
        let role = match lookup("TIMEKEEP_ROLE") {
            Some(role) => role
                .parse::<Role>()
                .context("TIMEKEEP_ROLE must be member or admin")?,
            None => Role::Member,
        };
        let currency = lookup("TIMEKEEP_CURRENCY").unwrap_or_else(|| "USD".to_string());
        let retry_delay_ms = match lookup("TIMEKEEP_RETRY_DELAY_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid TIMEKEEP_RETRY_DELAY_MS: {}", raw))?,
            None => 1000,
        };

        Ok(Self {
            database_path,
            principal: Principal::new(user_id, role),
            currency,
            retry_delay: Duration::from_millis(retry_delay_ms),
        })
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            retry: RetryPolicy::new(3, self.retry_delay),
            currency: self.currency.clone(),
        }
    }
}

/// `-v`の数からログレベルを決める。
pub fn log_level(verbose: u64) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use log::LevelFilter;
    use rstest::rstest;

    use super::{log_level, Config};
    use crate::time_entry::Role;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_with_all_variables() {
        let config = Config::from_lookup(lookup(&[
            ("TIMEKEEP_DATABASE", "/tmp/tk.db"),
            ("TIMEKEEP_USER", "alice"),
            ("TIMEKEEP_ROLE", "admin"),
            ("TIMEKEEP_CURRENCY", "JPY"),
            ("TIMEKEEP_RETRY_DELAY_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/tk.db"));
        assert_eq!(config.principal.user_id, "alice");
        assert_eq!(config.principal.role, Role::Admin);
        assert_eq!(config.currency, "JPY");
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.service_options().retry.max_attempts, 3);
    }

    #[test]
    fn test_from_lookup_falls_back_to_user() {
        let config = Config::from_lookup(lookup(&[
            ("TIMEKEEP_DATABASE", "/tmp/tk.db"),
            ("USER", "bob"),
        ]))
        .unwrap();

        assert_eq!(config.principal.user_id, "bob");
        assert_eq!(config.principal.role, Role::Member);
        assert_eq!(config.currency, "USD");
        assert_eq!(config.retry_delay, Duration::from_secs(1));
    }

    #[rstest]
    #[case::no_user(&[("TIMEKEEP_DATABASE", "/tmp/tk.db")])]
    #[case::bad_role(&[("TIMEKEEP_DATABASE", "/tmp/tk.db"), ("USER", "bob"), ("TIMEKEEP_ROLE", "root")])]
    #[case::bad_delay(&[("TIMEKEEP_DATABASE", "/tmp/tk.db"), ("USER", "bob"), ("TIMEKEEP_RETRY_DELAY_MS", "soon")])]
    fn test_from_lookup_errors(#[case] vars: &[(&str, &str)]) {
        assert!(Config::from_lookup(lookup(vars)).is_err());
    }

    #[rstest]
    #[case(0, LevelFilter::Warn)]
    #[case(1, LevelFilter::Info)]
    #[case(2, LevelFilter::Debug)]
    #[case(5, LevelFilter::Trace)]
    fn test_log_level(#[case] verbose: u64, #[case] expected: LevelFilter) {
        assert_eq!(log_level(verbose), expected);
    }
}
